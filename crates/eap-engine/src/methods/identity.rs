//! Identity exchange (RFC 3748 Section 5.1)

use super::{MethodCall, MethodError, MethodHandler, MethodResult};
use crate::state::Status;
use async_trait::async_trait;
use eap_proto::{EapPacket, EapType, Payload};
use tracing::debug;

/// Asks for the peer identity and hands over to the next method
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMethod;

#[async_trait]
impl MethodHandler for IdentityMethod {
    fn method(&self) -> EapType {
        EapType::Identity
    }

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError> {
        let Some(packet) = call.packet else {
            let request = EapPacket::request(
                call.identifier,
                EapType::Identity,
                Payload::Identity(String::new()),
            );
            return Ok(MethodResult::reply(request, None));
        };

        let identity = packet
            .identity()
            .ok_or_else(|| MethodError::unexpected("identity response without payload"))?;
        debug!(session = %call.context.token, identity, "Peer identity received");
        call.context.identity = Some(identity.to_string());

        Ok(MethodResult::status(Status::NextProtocol))
    }
}
