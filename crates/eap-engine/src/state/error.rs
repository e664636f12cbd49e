//! Error types for session store operations

use thiserror::Error;

/// Errors that can occur while loading or storing sessions
#[derive(Error, Debug)]
pub enum StateError {
    /// Store is unreachable or failed internally
    #[error("Backend error: {0}")]
    BackendError(String),

    /// Token or stored value rejected by the store
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            StateError::BackendError("down".into()).to_string(),
            "Backend error: down"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(StateError::InvalidInput("token".into()));
        assert_eq!(boxed.to_string(), "Invalid input: token");
    }
}
