//! EAP-MSCHAPv2 authenticator side

use super::{MethodCall, MethodError, MethodHandler, MethodResult};
use crate::state::{MethodState, SessionKeys, Status};
use crate::verifier::ChallengeVerifier;
use async_trait::async_trait;
use eap_proto::eap::mschapv2::{
    CHALLENGE_LENGTH, MPPE_KEY_LENGTH, MsChapV2Packet, generate_authenticator_response,
    generate_nt_response, session_key_material,
};
use eap_proto::{EapPacket, EapType, Payload};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingResponse,
    /// Success request sent, waiting for the peer's acknowledgement
    AwaitingAck,
}

#[derive(Debug, Clone)]
pub struct MsChapV2State {
    challenge: [u8; CHALLENGE_LENGTH],
    phase: Phase,
}

impl MsChapV2State {
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

pub struct MsChapV2Method {
    verifier: Arc<dyn ChallengeVerifier>,
    server_name: String,
}

impl MsChapV2Method {
    pub fn new(verifier: Arc<dyn ChallengeVerifier>, server_name: impl Into<String>) -> Self {
        MsChapV2Method {
            verifier,
            server_name: server_name.into(),
        }
    }
}

/// Account name used in the challenge hash: anything up to the last
/// backslash is a Windows domain and is dropped
fn account_name(name: &str) -> &str {
    name.rsplit_once('\\').map_or(name, |(_, user)| user)
}

fn request(identifier: u8, packet: MsChapV2Packet) -> EapPacket {
    EapPacket::request(identifier, EapType::MsChapV2, Payload::MsChapV2(packet))
}

#[async_trait]
impl MethodHandler for MsChapV2Method {
    fn method(&self) -> EapType {
        EapType::MsChapV2
    }

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError> {
        let state = match call.state {
            Some(MethodState::MsChapV2(state)) => Some(state),
            Some(_) => return Err(MethodError::unexpected("foreign state in MSCHAPv2 slot")),
            None => None,
        };

        let Some(packet) = call.packet else {
            let mut challenge = [0u8; CHALLENGE_LENGTH];
            rand::rng().fill(&mut challenge);

            let reply = request(
                call.identifier,
                MsChapV2Packet::Challenge {
                    ms_id: call.identifier,
                    challenge,
                    name: self.server_name.clone(),
                },
            );
            let state = MsChapV2State {
                challenge,
                phase: Phase::AwaitingResponse,
            };
            return Ok(MethodResult::reply(reply, Some(MethodState::MsChapV2(state))));
        };

        let Some(state) = state else {
            return Err(MethodError::unexpected("MSCHAPv2 response before a challenge"));
        };
        let Some(Payload::MsChapV2(message)) = &packet.payload else {
            return Err(MethodError::unexpected("MSCHAPv2 response without payload"));
        };

        match (state.phase, message) {
            (Phase::AwaitingResponse, MsChapV2Packet::Response { ms_id, response, name }) => {
                let username = account_name(name);
                if let Some(identity) = call.context.identity.as_deref()
                    && account_name(identity) != username
                {
                    info!(
                        session = %call.context.token,
                        identity,
                        username,
                        "MSCHAPv2 name does not match the EAP identity"
                    );
                    return Ok(MethodResult::status(Status::Error));
                }
                let Some(password_hash) = self.verifier.nt_password_hash(username).await? else {
                    info!(session = %call.context.token, username, "MSCHAPv2 user unknown");
                    return Ok(MethodResult::status(Status::Error));
                };

                let expected = generate_nt_response(
                    &state.challenge,
                    &response.peer_challenge,
                    username,
                    &password_hash,
                );
                if expected != response.nt_response {
                    info!(session = %call.context.token, username, "MSCHAPv2 NT-Response mismatch");
                    return Ok(MethodResult::status(Status::Error));
                }

                let authenticator = generate_authenticator_response(
                    &password_hash,
                    &response.nt_response,
                    &response.peer_challenge,
                    &state.challenge,
                    username,
                );
                call.context.keys = Some(
                    SessionKeys::from_msk(session_key_material(&password_hash, &response.nt_response))
                        .with_mppe_key_length(MPPE_KEY_LENGTH),
                );
                debug!(session = %call.context.token, username, "MSCHAPv2 response verified");

                let reply = request(
                    call.identifier,
                    MsChapV2Packet::SuccessRequest {
                        ms_id: *ms_id,
                        message: authenticator,
                    },
                );
                let state = MsChapV2State {
                    phase: Phase::AwaitingAck,
                    ..state
                };
                Ok(MethodResult::reply(reply, Some(MethodState::MsChapV2(state))))
            }
            (Phase::AwaitingAck, MsChapV2Packet::SuccessResponse) => {
                Ok(MethodResult::status(Status::Success))
            }
            (_, MsChapV2Packet::FailureResponse) => Ok(MethodResult::status(Status::Error)),
            (phase, other) => Err(MethodError::unexpected(format!(
                "{:?} while {:?}",
                other.op_code(),
                phase
            ))),
        }
    }
}
