//! PEAPv0
//!
//! Runs a second EAP conversation inside the TLS tunnel. Inner packets are
//! carried without the EAP header (type and data only) except Extensions,
//! which keep the full header. After the inner conversation succeeds the
//! server sends a Result TLV and waits for the peer's own Result TLV before
//! concluding.

use super::tls::{fragment_request, inbound_fragment};
use super::{MethodCall, MethodError, MethodHandler, MethodResult, MethodTable};
use crate::conversation::{Conversation, Step};
use crate::state::{MethodContext, MethodState, SessionKeys, Status};
use crate::tunnel::{Received, TunnelSettings, TunnelState};
use crate::verifier::{CredentialVerifier, PeerIdentity, Verdict};
use async_trait::async_trait;
use eap_proto::eap::extensions::{ResultCode, Tlv, find_result};
use eap_proto::{EapCode, EapError, EapPacket, EapType, Payload, PayloadRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeapPhase {
    Handshake,
    Inner,
    /// Result TLV sent, waiting for the peer's
    Result,
}

#[derive(Debug, Clone)]
pub struct PeapState {
    tunnel: TunnelState,
    phase: PeapPhase,
    inner: Conversation,
    inner_context: MethodContext,
    /// Identifier of the Result request
    result_identifier: Option<u8>,
}

impl PeapState {
    pub fn phase(&self) -> PeapPhase {
        self.phase
    }
}

/// Inner packet as carried in the tunnel
pub fn encode_inner(packet: &EapPacket) -> Result<Vec<u8>, EapError> {
    let encoded = packet.encode()?;
    if packet.method_type == Some(EapType::Extensions) || encoded.len() <= EapPacket::HEADER_LENGTH {
        return Ok(encoded);
    }
    Ok(encoded[EapPacket::HEADER_LENGTH..].to_vec())
}

/// Parse tunnel plaintext into an inner response
///
/// A header-less packet gets a Response header with `identifier`.
pub fn decode_inner(
    plaintext: &[u8],
    identifier: u8,
    registry: &PayloadRegistry,
) -> Result<EapPacket, EapError> {
    let full_header = plaintext.len() > EapPacket::HEADER_LENGTH
        && plaintext[0] == EapCode::Response.as_u8()
        && plaintext[EapPacket::HEADER_LENGTH] == EapType::Extensions.as_u8()
        && u16::from_be_bytes([plaintext[2], plaintext[3]]) as usize == plaintext.len();
    if full_header {
        return EapPacket::decode(plaintext, registry);
    }

    let length = u16::try_from(plaintext.len() + EapPacket::HEADER_LENGTH)
        .map_err(|_| EapError::EncodingError(format!("inner packet of {} bytes", plaintext.len())))?;
    let mut raw = Vec::with_capacity(plaintext.len() + EapPacket::HEADER_LENGTH);
    raw.extend_from_slice(&[EapCode::Response.as_u8(), identifier]);
    raw.extend_from_slice(&length.to_be_bytes());
    raw.extend_from_slice(plaintext);
    EapPacket::decode(&raw, registry)
}

pub struct PeapMethod {
    settings: TunnelSettings,
    verifier: Arc<dyn CredentialVerifier>,
    inner: Arc<MethodTable>,
    inner_priority: Vec<EapType>,
}

impl PeapMethod {
    pub fn new(
        settings: TunnelSettings,
        verifier: Arc<dyn CredentialVerifier>,
        inner: Arc<MethodTable>,
        inner_priority: Vec<EapType>,
    ) -> Self {
        PeapMethod {
            settings,
            verifier,
            inner,
            inner_priority,
        }
    }

    async fn send_inner(state: &mut PeapState, packet: &EapPacket) -> Result<(), MethodError> {
        state.tunnel.send_plaintext(encode_inner(packet)?).await?;
        Ok(())
    }

    /// Drive the tunnel payload of one complete flight; returns a status
    /// once PEAP has concluded
    async fn on_flight(
        &self,
        state: &mut PeapState,
        plaintext: &[u8],
        established: bool,
        context: &mut MethodContext,
    ) -> Result<Option<Status>, MethodError> {
        match state.phase {
            PeapPhase::Handshake => {
                if !established {
                    return Ok(None);
                }
                match state
                    .inner
                    .step(&self.inner, None, &mut state.inner_context)
                    .await
                {
                    Step::Reply(request) => {
                        Self::send_inner(state, &request).await?;
                        state.phase = PeapPhase::Inner;
                        Ok(None)
                    }
                    Step::Done(_) => Ok(Some(Status::Error)),
                }
            }
            PeapPhase::Inner => {
                if plaintext.is_empty() {
                    return Ok(None);
                }
                let identifier = state.inner.last_identifier().unwrap_or_default();
                let response = decode_inner(plaintext, identifier, self.inner.registry())?;

                match state
                    .inner
                    .step(&self.inner, Some(&response), &mut state.inner_context)
                    .await
                {
                    Step::Reply(request) => {
                        Self::send_inner(state, &request).await?;
                        Ok(None)
                    }
                    Step::Done(Status::Success) => {
                        let identifier = response.identifier.wrapping_add(1);
                        let result = EapPacket::request(
                            identifier,
                            EapType::Extensions,
                            Payload::Extensions(vec![Tlv::result(ResultCode::Success)]),
                        );
                        Self::send_inner(state, &result).await?;
                        state.result_identifier = Some(identifier);
                        state.phase = PeapPhase::Result;
                        debug!(session = %context.token, "PEAP inner method succeeded");
                        Ok(None)
                    }
                    Step::Done(_) => {
                        info!(session = %context.token, "PEAP inner method failed");
                        Ok(Some(Status::Error))
                    }
                }
            }
            PeapPhase::Result => {
                if plaintext.is_empty() {
                    return Ok(None);
                }
                let identifier = state.result_identifier.unwrap_or_default();
                let response = decode_inner(plaintext, identifier, self.inner.registry())?;
                if response.identifier != identifier {
                    return Err(MethodError::unexpected("result TLV identifier mismatch"));
                }

                let result = match &response.payload {
                    Some(Payload::Extensions(tlvs)) => find_result(tlvs),
                    _ => None,
                };
                match result {
                    Some(ResultCode::Success) => self.conclude(state, context).await.map(Some),
                    Some(ResultCode::Failure) => {
                        info!(session = %context.token, "Peer reported PEAP failure");
                        Ok(Some(Status::Error))
                    }
                    None => Err(MethodError::unexpected("expected a Result TLV")),
                }
            }
        }
    }

    async fn conclude(
        &self,
        state: &PeapState,
        context: &mut MethodContext,
    ) -> Result<Status, MethodError> {
        let Some(summary) = state.tunnel.summary() else {
            return Ok(Status::Error);
        };

        let peer = PeerIdentity {
            method: EapType::Peap,
            identity: state.inner_context.identity.as_deref(),
            certificates: &summary.peer_certificates,
        };
        match self.verifier.verify(peer).await? {
            Verdict::Accept { attributes } => {
                context.attributes.extend(attributes);
                context.keys = Some(SessionKeys::from_exported(&summary.keying_material));
                info!(
                    session = %context.token,
                    identity = ?state.inner_context.identity,
                    "PEAP authentication succeeded"
                );
                Ok(Status::Success)
            }
            Verdict::Reject => {
                info!(session = %context.token, identity = ?state.inner_context.identity, "PEAP peer rejected");
                Ok(Status::Error)
            }
        }
    }
}

#[async_trait]
impl MethodHandler for PeapMethod {
    fn method(&self) -> EapType {
        EapType::Peap
    }

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError> {
        let mut state = match call.state {
            Some(MethodState::Peap(state)) => state,
            Some(_) => return Err(MethodError::unexpected("foreign state in PEAP slot")),
            None => {
                if call.packet.is_some() {
                    return Err(MethodError::unexpected("PEAP response before start"));
                }
                let state = PeapState {
                    tunnel: TunnelState::new(EapType::Peap, self.settings.clone()),
                    phase: PeapPhase::Handshake,
                    inner: Conversation::new(self.inner_priority.clone()),
                    inner_context: MethodContext::new(call.context.token.clone()),
                    result_identifier: None,
                };
                let start = fragment_request(EapType::Peap, call.identifier, state.tunnel.start());
                return Ok(MethodResult::reply(start, Some(MethodState::Peap(Box::new(state)))));
            }
        };

        let Some(packet) = call.packet else {
            return Err(MethodError::unexpected("PEAP restarted mid-handshake"));
        };

        let received = state
            .tunnel
            .receive(&call.context.token, inbound_fragment(packet)?)
            .await?;
        let flight = match received {
            Received::Fragment(fragment) => {
                let reply = fragment_request(EapType::Peap, call.identifier, fragment);
                return Ok(MethodResult::reply(reply, Some(MethodState::Peap(state))));
            }
            Received::Flight(flight) => flight,
        };

        if state.tunnel.final_status().is_terminal() {
            if !state.tunnel.has_outbound() {
                return Ok(MethodResult::status(state.tunnel.final_status()));
            }
            let reply = fragment_request(EapType::Peap, call.identifier, state.tunnel.next_fragment());
            return Ok(MethodResult::reply(reply, Some(MethodState::Peap(state))));
        }

        let concluded = self
            .on_flight(&mut state, &flight.plaintext, flight.established, call.context)
            .await;
        match concluded {
            Ok(Some(status)) => return Ok(MethodResult::status(status)),
            Ok(None) => {}
            Err(e) => {
                warn!(session = %call.context.token, phase = ?state.phase, error = %e, "PEAP tunnel payload rejected");
                return Ok(MethodResult::status(Status::Error));
            }
        }

        let reply = fragment_request(EapType::Peap, call.identifier, state.tunnel.next_fragment());
        Ok(MethodResult::reply(reply, Some(MethodState::Peap(state))))
    }
}
