//! Legacy Nak (RFC 3748 Section 5.3.1)
//!
//! Method renegotiation is not offered: a Nak ends the exchange.

use super::{MethodCall, MethodError, MethodHandler, MethodResult};
use crate::state::Status;
use async_trait::async_trait;
use eap_proto::{EapType, Payload};
use tracing::info;

#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyNakMethod;

#[async_trait]
impl MethodHandler for LegacyNakMethod {
    fn method(&self) -> EapType {
        EapType::Nak
    }

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError> {
        let desired: Vec<String> = match call.packet.and_then(|p| p.payload.as_ref()) {
            Some(Payload::Nak(types)) => types
                .iter()
                .map(|t| match EapType::from_u8(*t) {
                    Some(method) => method.to_string(),
                    None => t.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        info!(
            session = %call.context.token,
            desired = ?desired,
            "Peer refused the offered method"
        );
        Ok(MethodResult::status(Status::Error))
    }
}
