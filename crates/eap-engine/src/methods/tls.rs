//! EAP-TLS (RFC 5216, RFC 9190)
//!
//! The tunnel bridge with no inner method. Once the handshake completes the
//! peer's certificate chain goes to the [`CredentialVerifier`]; the outcome
//! is reported after the server's last flight has been delivered.

use super::{MethodCall, MethodError, MethodHandler, MethodResult};
use crate::state::{MethodContext, MethodState, SessionKeys, Status};
use crate::tunnel::{Received, TunnelSettings, TunnelState};
use crate::verifier::{CredentialVerifier, PeerIdentity, Verdict};
use async_trait::async_trait;
use eap_proto::eap::tls::TlsPayload;
use eap_proto::{EapPacket, EapType, Payload};
use std::sync::Arc;
use tracing::{info, warn};

/// Wrap one fragment in a request of the tunnel method's type
pub(crate) fn fragment_request(method: EapType, identifier: u8, fragment: TlsPayload) -> EapPacket {
    EapPacket::request(identifier, method, Payload::Tls(fragment))
}

pub(crate) fn inbound_fragment(packet: &EapPacket) -> Result<&TlsPayload, MethodError> {
    match &packet.payload {
        Some(Payload::Tls(fragment)) => Ok(fragment),
        _ => Err(MethodError::unexpected("tunnel response without TLS payload")),
    }
}

pub struct TlsMethod {
    settings: TunnelSettings,
    verifier: Arc<dyn CredentialVerifier>,
}

impl TlsMethod {
    pub fn new(settings: TunnelSettings, verifier: Arc<dyn CredentialVerifier>) -> Self {
        TlsMethod { settings, verifier }
    }

    /// Handshake finished: consult the verifier and export keys
    async fn conclude(
        &self,
        tunnel: &mut TunnelState,
        context: &mut MethodContext,
    ) -> Result<Status, MethodError> {
        let Some(summary) = tunnel.summary().cloned() else {
            return Ok(Status::Error);
        };

        if summary.peer_certificates.is_empty() {
            warn!(session = %context.token, "EAP-TLS peer sent no certificate");
            return Ok(Status::Error);
        }

        let peer = PeerIdentity {
            method: EapType::Tls,
            identity: context.identity.as_deref(),
            certificates: &summary.peer_certificates,
        };
        match self.verifier.verify(peer).await? {
            Verdict::Accept { attributes } => {
                context.attributes.extend(attributes);
                context.keys = Some(SessionKeys::from_exported(&summary.keying_material));
                if summary.tls13 {
                    // Protected success indication (RFC 9190 Section 2.5)
                    tunnel.send_plaintext(vec![0]).await?;
                }
                Ok(Status::Success)
            }
            Verdict::Reject => {
                info!(session = %context.token, identity = ?context.identity, "EAP-TLS peer rejected");
                Ok(Status::Error)
            }
        }
    }
}

#[async_trait]
impl MethodHandler for TlsMethod {
    fn method(&self) -> EapType {
        EapType::Tls
    }

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError> {
        let mut tunnel = match call.state {
            Some(MethodState::Tls(tunnel)) => tunnel,
            Some(_) => return Err(MethodError::unexpected("foreign state in EAP-TLS slot")),
            None => {
                if call.packet.is_some() {
                    return Err(MethodError::unexpected("EAP-TLS response before start"));
                }
                let tunnel = TunnelState::new(EapType::Tls, self.settings.clone());
                let start = fragment_request(EapType::Tls, call.identifier, tunnel.start());
                return Ok(MethodResult::reply(start, Some(MethodState::Tls(tunnel))));
            }
        };

        let Some(packet) = call.packet else {
            return Err(MethodError::unexpected("EAP-TLS restarted mid-handshake"));
        };

        let flight = match tunnel.receive(&call.context.token, inbound_fragment(packet)?).await? {
            Received::Fragment(fragment) => {
                let reply = fragment_request(EapType::Tls, call.identifier, fragment);
                return Ok(MethodResult::reply(reply, Some(MethodState::Tls(tunnel))));
            }
            Received::Flight(flight) => flight,
        };

        if flight.established {
            let status = self.conclude(&mut tunnel, call.context).await?;
            tunnel.set_final_status(status);
            if status == Status::Error {
                return Ok(MethodResult::status(Status::Error));
            }
        }

        if !tunnel.has_outbound() && tunnel.final_status().is_terminal() {
            return Ok(MethodResult::status(tunnel.final_status()));
        }

        let reply = fragment_request(EapType::Tls, call.identifier, tunnel.next_fragment());
        Ok(MethodResult::reply(reply, Some(MethodState::Tls(tunnel))))
    }
}
