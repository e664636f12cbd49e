//! EAP over RADIUS (RFC 3579)
//!
//! Turns Access-Requests carrying EAP-Message attributes into engine calls
//! and the engine's outcome into Access-Challenge, Access-Accept or
//! Access-Reject.

use crate::engine::{EapEngine, Outcome};
use eap_proto::eap::{add_eap_to_radius_packet, eap_bytes_from_radius_packet};
use eap_proto::{
    Attribute, AttributeType, Code, EapError, IntegrityError, Packet, PacketError,
    attach_integrity, calculate_response_authenticator, mppe_key_attributes, verify_integrity,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("EAP error: {0}")]
    Eap(#[from] EapError),
    #[error("Unexpected RADIUS code {0}")]
    UnexpectedCode(u8),
}

pub struct RadiusAdapter {
    engine: Arc<EapEngine>,
}

impl RadiusAdapter {
    pub fn new(engine: Arc<EapEngine>) -> Self {
        RadiusAdapter { engine }
    }

    pub fn engine(&self) -> &Arc<EapEngine> {
        &self.engine
    }

    /// Answer one Access-Request
    pub async fn handle(&self, request: &Packet, secret: &[u8]) -> Result<Packet, AdapterError> {
        if request.code != Code::AccessRequest {
            return Err(AdapterError::UnexpectedCode(request.code.as_u8()));
        }

        if let Err(e) = verify_integrity(request, secret) {
            warn!(identifier = request.identifier, error = %e, "Rejecting Access-Request");
            return finalize(reject(request), request, secret);
        }

        let Some(eap) = eap_bytes_from_radius_packet(request) else {
            debug!(identifier = request.identifier, "Access-Request without EAP-Message");
            return finalize(reject(request), request, secret);
        };

        let token = request
            .find_attribute(AttributeType::State as u8)
            .and_then(|attr| String::from_utf8(attr.value.clone()).ok());

        let outcome = self.engine.handle(token.as_deref(), &eap).await;
        let response = match outcome {
            Outcome::Challenge { token, packet } => {
                let mut response =
                    Packet::new(Code::AccessChallenge, request.identifier, request.authenticator);
                add_eap_to_radius_packet(&mut response, &packet)?;
                response.add_attribute(Attribute::new(
                    AttributeType::State as u8,
                    token.into_bytes(),
                )?);
                response
            }
            Outcome::Accept {
                packet,
                keys,
                attributes,
            } => {
                let mut response =
                    Packet::new(Code::AccessAccept, request.identifier, request.authenticator);
                add_eap_to_radius_packet(&mut response, &packet)?;
                if let Some(keys) = keys {
                    for attr in mppe_key_attributes(
                        keys.mppe_recv(),
                        keys.mppe_send(),
                        secret,
                        &request.authenticator,
                    )? {
                        response.add_attribute(attr);
                    }
                }
                for attr in attributes {
                    response.add_attribute(attr);
                }
                response
            }
            Outcome::Reject { packet } => {
                let mut response = reject(request);
                add_eap_to_radius_packet(&mut response, &packet)?;
                response
            }
        };

        finalize(response, request, secret)
    }
}

/// Bare Access-Reject without EAP payload
fn reject(request: &Packet) -> Packet {
    Packet::new(Code::AccessReject, request.identifier, request.authenticator)
}

/// Message-Authenticator first (over the request authenticator), then the
/// Response Authenticator
fn finalize(mut response: Packet, request: &Packet, secret: &[u8]) -> Result<Packet, AdapterError> {
    attach_integrity(&mut response, secret)?;
    response.authenticator = calculate_response_authenticator(&response, &request.authenticator, secret)?;
    Ok(response)
}
