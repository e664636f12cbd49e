//! EAP method handlers
//!
//! Each handler is stateless across calls: whatever it needs to remember
//! between round trips goes back out in [`MethodResult::state`] and is handed
//! in again with the next [`MethodCall`].

pub mod gtc;
pub mod identity;
pub mod mschapv2;
pub mod nak;
pub mod peap;
pub mod tls;

use crate::state::{MethodContext, MethodState, Status};
use crate::tunnel::TunnelError;
use crate::verifier::VerifierError;
use async_trait::async_trait;
use eap_proto::{EapError, EapPacket, EapType, PayloadRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MethodError {
    #[error("EAP error: {0}")]
    Eap(#[from] EapError),
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),
    #[error("Verifier error: {0}")]
    Verifier(#[from] VerifierError),
    #[error("Unexpected packet: {0}")]
    UnexpectedPacket(String),
}

impl MethodError {
    pub(crate) fn unexpected(reason: impl Into<String>) -> Self {
        MethodError::UnexpectedPacket(reason.into())
    }
}

/// One invocation of a method handler
pub struct MethodCall<'a> {
    /// Inbound response; `None` asks the method to issue its first request
    pub packet: Option<&'a EapPacket>,
    /// Identifier to use for a reply request
    pub identifier: u8,
    /// The method's state slot, taken out of the session
    pub state: Option<MethodState>,
    pub context: &'a mut MethodContext,
}

#[derive(Debug)]
pub struct MethodResult {
    pub reply: Option<EapPacket>,
    pub status: Status,
    /// Written back into the method's slot
    pub state: Option<MethodState>,
}

impl MethodResult {
    /// Send `reply` and stay in the current method
    pub fn reply(reply: EapPacket, state: Option<MethodState>) -> Self {
        MethodResult {
            reply: Some(reply),
            status: Status::Unknown,
            state,
        }
    }

    /// Conclude (or hand over) without a reply
    pub fn status(status: Status) -> Self {
        MethodResult {
            reply: None,
            status,
            state: None,
        }
    }
}

#[async_trait]
pub trait MethodHandler: Send + Sync {
    fn method(&self) -> EapType;

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError>;
}

/// Handlers by method type plus the payload registry used for routing
#[derive(Clone)]
pub struct MethodTable {
    handlers: HashMap<EapType, Arc<dyn MethodHandler>>,
    registry: PayloadRegistry,
}

impl MethodTable {
    pub fn new(registry: PayloadRegistry) -> Self {
        MethodTable {
            handlers: HashMap::new(),
            registry,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn MethodHandler>) {
        self.handlers.insert(handler.method(), handler);
    }

    pub fn with(mut self, handler: Arc<dyn MethodHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, method: EapType) -> Option<&Arc<dyn MethodHandler>> {
        self.handlers.get(&method)
    }

    pub fn registry(&self) -> &PayloadRegistry {
        &self.registry
    }

    /// Whether a response of type `inbound` belongs to the `current` method,
    /// either directly or as the type that method wraps
    pub fn routes_to(&self, current: EapType, inbound: EapType) -> bool {
        current == inbound || self.registry.wraps(current) == Some(inbound)
    }
}

impl std::fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.handlers.keys().collect();
        methods.sort();
        f.debug_struct("MethodTable")
            .field("methods", &methods)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_follows_wrapped_type() {
        let table = MethodTable::new(PayloadRegistry::standard())
            .with(Arc::new(identity::IdentityMethod))
            .with(Arc::new(nak::LegacyNakMethod));

        assert!(table.routes_to(EapType::Peap, EapType::Peap));
        assert!(table.routes_to(EapType::Peap, EapType::Tls));
        assert!(!table.routes_to(EapType::Tls, EapType::Peap));
        assert!(!table.routes_to(EapType::MsChapV2, EapType::Gtc));

        assert!(table.get(EapType::Identity).is_some());
        assert!(table.get(EapType::Gtc).is_none());
    }
}
