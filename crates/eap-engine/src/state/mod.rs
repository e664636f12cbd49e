//! Session state shared across RADIUS round trips
//!
//! A session is keyed by an opaque token that travels in the RADIUS State
//! attribute. The store owns every [`SessionState`]; method handlers only
//! borrow their own [`MethodState`] slot for the duration of one packet.
//!
//! # Usage
//!
//! ```rust
//! use eap_engine::state::{MemoryStateManager, MethodConfiguration, StateManager};
//! use eap_proto::EapType;
//!
//! let store = MemoryStateManager::new(MethodConfiguration::new(vec![
//!     EapType::Identity,
//!     EapType::Peap,
//! ]));
//! assert_eq!(store.get_settings().method_priority[0], EapType::Identity);
//! ```

pub mod error;
pub mod memory;

pub use error::StateError;
pub use memory::MemoryStateManager;

use crate::conversation::Conversation;
use crate::methods::gtc::GtcState;
use crate::methods::mschapv2::MsChapV2State;
use crate::methods::peap::PeapState;
use crate::tunnel::TunnelState;
use async_trait::async_trait;
use eap_proto::{Attribute, EapType};
use rand::Rng;

/// Outcome of one method invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    /// Still mid-conversation with the current method
    #[default]
    Unknown,
    Success,
    Error,
    /// Current method is satisfied, continue with the next pending one
    NextProtocol,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Success | Status::Error)
    }
}

/// Method settings handed out by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodConfiguration {
    /// Methods offered to a new session, in order
    pub method_priority: Vec<EapType>,
}

impl MethodConfiguration {
    pub fn new(method_priority: Vec<EapType>) -> Self {
        MethodConfiguration { method_priority }
    }
}

/// Key material derived by the concluding method
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub msk: [u8; 64],
    pub emsk: Option<[u8; 64]>,
    /// Bytes of each MSK half carried in an MPPE attribute
    mppe_key_length: usize,
}

const MSK_HALF: usize = 32;

impl SessionKeys {
    pub fn from_msk(msk: [u8; 64]) -> Self {
        SessionKeys {
            msk,
            emsk: None,
            mppe_key_length: MSK_HALF,
        }
    }

    /// Carry only the first `length` bytes of each half, for methods whose
    /// keys are shorter than 32 bytes
    pub fn with_mppe_key_length(mut self, length: usize) -> Self {
        self.mppe_key_length = length.min(MSK_HALF);
        self
    }

    /// Split 128 bytes of TLS exporter output into MSK and EMSK
    pub fn from_exported(material: &[u8; 128]) -> Self {
        let mut msk = [0u8; 64];
        let mut emsk = [0u8; 64];
        msk.copy_from_slice(&material[..64]);
        emsk.copy_from_slice(&material[64..]);
        SessionKeys {
            msk,
            emsk: Some(emsk),
            mppe_key_length: MSK_HALF,
        }
    }

    /// MS-MPPE-Recv-Key
    pub fn mppe_recv(&self) -> &[u8] {
        &self.msk[..self.mppe_key_length]
    }

    /// MS-MPPE-Send-Key
    pub fn mppe_send(&self) -> &[u8] {
        &self.msk[MSK_HALF..MSK_HALF + self.mppe_key_length]
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// Per-method state slot
#[derive(Debug, Clone)]
pub enum MethodState {
    Gtc(GtcState),
    MsChapV2(MsChapV2State),
    Tls(TunnelState),
    Peap(Box<PeapState>),
}

/// Session-wide values that method handlers may read and write
#[derive(Debug, Clone, Default)]
pub struct MethodContext {
    pub token: String,
    /// Identity presented in the Identity exchange
    pub identity: Option<String>,
    pub keys: Option<SessionKeys>,
    /// Extra attributes for the Access-Accept
    pub attributes: Vec<Attribute>,
}

impl MethodContext {
    pub fn new(token: impl Into<String>) -> Self {
        MethodContext {
            token: token.into(),
            ..Default::default()
        }
    }
}

/// Everything stored for one session token
#[derive(Debug, Clone)]
pub struct SessionState {
    pub conversation: Conversation,
    pub context: MethodContext,
}

impl SessionState {
    pub fn new(token: impl Into<String>, method_priority: Vec<EapType>) -> Self {
        SessionState {
            conversation: Conversation::new(method_priority),
            context: MethodContext::new(token),
        }
    }

    pub fn token(&self) -> &str {
        &self.context.token
    }
}

/// Generate a fresh session token (16 random bytes, hex encoded)
pub fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Session store consulted by the engine on every round trip
///
/// Implementations must be safe to share between tasks. Expiry of
/// abandoned sessions is up to the implementation.
#[async_trait]
pub trait StateManager: Send + Sync {
    fn get_settings(&self) -> MethodConfiguration;

    async fn get_state(&self, token: &str) -> Result<Option<SessionState>, StateError>;

    async fn put_state(&self, state: SessionState) -> Result<(), StateError>;

    async fn remove_state(&self, token: &str) -> Result<(), StateError>;

    /// Load the session for `token`, or start a new one when the token is
    /// absent, empty or unknown
    async fn begin_or_resume(&self, token: Option<&str>) -> Result<SessionState, StateError> {
        if let Some(token) = token.filter(|t| !t.is_empty())
            && let Some(state) = self.get_state(token).await?
        {
            return Ok(state);
        }

        let settings = self.get_settings();
        Ok(SessionState::new(generate_token(), settings.method_priority))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_split() {
        let mut material = [0u8; 128];
        for (i, b) in material.iter_mut().enumerate() {
            *b = i as u8;
        }
        let keys = SessionKeys::from_exported(&material);
        assert_eq!(keys.mppe_recv(), &material[..32]);
        assert_eq!(keys.mppe_send(), &material[32..64]);
        assert_eq!(keys.emsk.unwrap()[0], 64);
    }

    #[test]
    fn test_short_mppe_keys() {
        let mut msk = [0u8; 64];
        msk[..16].fill(0xAA);
        msk[32..48].fill(0xBB);
        let keys = SessionKeys::from_msk(msk).with_mppe_key_length(16);
        assert_eq!(keys.mppe_recv(), &[0xAA; 16]);
        assert_eq!(keys.mppe_send(), &[0xBB; 16]);

        let keys = SessionKeys::from_msk(msk).with_mppe_key_length(100);
        assert_eq!(keys.mppe_send().len(), 32);
    }

    #[test]
    fn test_generate_token() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_terminal() {
        assert!(Status::Success.is_terminal());
        assert!(Status::Error.is_terminal());
        assert!(!Status::NextProtocol.is_terminal());
        assert!(!Status::Unknown.is_terminal());
    }
}
