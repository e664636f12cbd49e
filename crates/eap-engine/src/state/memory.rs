//! In-memory session store

use super::{MethodConfiguration, SessionState, StateError, StateManager};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

/// In-memory session store
///
/// Sessions live in a local HashMap and are lost on restart. Every
/// `put_state` refreshes the session's time-to-live.
///
/// # Thread Safety
///
/// Uses `tokio::sync::RwLock` for concurrent access from multiple async tasks.
#[derive(Debug, Clone)]
pub struct MemoryStateManager {
    settings: MethodConfiguration,
    ttl: Option<Duration>,
    store: Arc<RwLock<HashMap<String, StoredValue>>>,
}

#[derive(Debug, Clone)]
struct StoredValue {
    state: SessionState,
    expires_at: Option<SystemTime>,
}

impl StoredValue {
    fn new(state: SessionState, ttl: Option<Duration>) -> Self {
        let expires_at = ttl.map(|duration| SystemTime::now() + duration);
        Self { state, expires_at }
    }

    fn is_expired(&self) -> bool {
        if let Some(expires_at) = self.expires_at {
            SystemTime::now() > expires_at
        } else {
            false
        }
    }
}

impl MemoryStateManager {
    /// Create a store whose sessions never expire
    pub fn new(settings: MethodConfiguration) -> Self {
        Self {
            settings,
            ttl: None,
            store: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Expire sessions `ttl` after their last update
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Remove expired sessions
    ///
    /// This should be called periodically to prevent memory leaks.
    pub async fn cleanup_expired(&self) -> usize {
        let mut store = self.store.write().await;
        let before = store.len();
        store.retain(|_, value| !value.is_expired());
        before - store.len()
    }

    /// Number of stored sessions (including expired)
    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }
}

#[async_trait]
impl StateManager for MemoryStateManager {
    fn get_settings(&self) -> MethodConfiguration {
        self.settings.clone()
    }

    async fn get_state(&self, token: &str) -> Result<Option<SessionState>, StateError> {
        let store = self.store.read().await;
        Ok(store
            .get(token)
            .filter(|value| !value.is_expired())
            .map(|value| value.state.clone()))
    }

    async fn put_state(&self, state: SessionState) -> Result<(), StateError> {
        if state.token().is_empty() {
            return Err(StateError::InvalidInput("empty session token".to_string()));
        }

        let mut store = self.store.write().await;
        let token = state.token().to_string();
        store.insert(token, StoredValue::new(state, self.ttl));
        Ok(())
    }

    async fn remove_state(&self, token: &str) -> Result<(), StateError> {
        self.store.write().await.remove(token);
        Ok(())
    }
}
