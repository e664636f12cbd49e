//! Generic Token Card (RFC 3748 Section 5.6)
//!
//! The challenge text and the check of the answer both come from the
//! [`ChallengeVerifier`]; this handler only relays them.

use super::{MethodCall, MethodError, MethodHandler, MethodResult};
use crate::state::{MethodState, Status};
use crate::verifier::{ChallengeVerifier, GtcValidator};
use async_trait::async_trait;
use eap_proto::{EapPacket, EapType, Payload};
use std::sync::Arc;
use tracing::debug;

/// Validator waiting for the peer's answer
#[derive(Clone)]
pub struct GtcState {
    validator: GtcValidator,
}

impl std::fmt::Debug for GtcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GtcState").finish_non_exhaustive()
    }
}

pub struct GtcMethod {
    verifier: Arc<dyn ChallengeVerifier>,
}

impl GtcMethod {
    pub fn new(verifier: Arc<dyn ChallengeVerifier>) -> Self {
        GtcMethod { verifier }
    }
}

#[async_trait]
impl MethodHandler for GtcMethod {
    fn method(&self) -> EapType {
        EapType::Gtc
    }

    async fn handle(&self, call: MethodCall<'_>) -> Result<MethodResult, MethodError> {
        let state = match call.state {
            Some(MethodState::Gtc(state)) => Some(state),
            Some(_) => return Err(MethodError::unexpected("foreign state in GTC slot")),
            None => None,
        };

        match (call.packet, state) {
            (None, _) => {
                let identity = call.context.identity.as_deref().unwrap_or_default();
                let challenge = self.verifier.gtc_challenge(identity).await?;
                let request =
                    EapPacket::request(call.identifier, EapType::Gtc, Payload::Gtc(challenge.challenge));
                Ok(MethodResult::reply(
                    request,
                    Some(MethodState::Gtc(GtcState {
                        validator: challenge.validator,
                    })),
                ))
            }
            (Some(packet), Some(state)) => {
                let Some(Payload::Gtc(answer)) = &packet.payload else {
                    return Err(MethodError::unexpected("GTC response without payload"));
                };

                let step = (state.validator)(answer);
                debug!(session = %call.context.token, status = ?step.status, "GTC answer checked");

                match (step.status, step.challenge) {
                    (Status::Unknown, Some(challenge)) => {
                        let request =
                            EapPacket::request(call.identifier, EapType::Gtc, Payload::Gtc(challenge));
                        Ok(MethodResult::reply(request, Some(MethodState::Gtc(state))))
                    }
                    (Status::Unknown, None) => Ok(MethodResult::status(Status::Error)),
                    (status, _) => Ok(MethodResult::status(status)),
                }
            }
            (Some(_), None) => Err(MethodError::unexpected("GTC response before a challenge")),
        }
    }
}
