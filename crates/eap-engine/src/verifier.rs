//! Credential and challenge verification collaborators
//!
//! The engine never decides on its own whether an identity is valid. TLS
//! based methods ask a [`CredentialVerifier`] once the tunnel is up; GTC and
//! MSCHAPv2 ask a [`ChallengeVerifier`] for challenges and password hashes.

use crate::config::UserEntry;
use crate::state::Status;
use async_trait::async_trait;
use eap_proto::eap::certs::peer_common_name;
use eap_proto::eap::mschapv2::nt_password_hash;
use eap_proto::{Attribute, AttributeType, EapType, PacketError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("Certificate error: {0}")]
    Certificate(String),
    #[error("Attribute error: {0}")]
    Attribute(#[from] PacketError),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Peer presented to a [`CredentialVerifier`]
#[derive(Debug, Clone, Copy)]
pub struct PeerIdentity<'a> {
    pub method: EapType,
    /// EAP identity (the inner identity for PEAP)
    pub identity: Option<&'a str>,
    /// Verified DER certificate chain, leaf first; empty without client auth
    pub certificates: &'a [Vec<u8>],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Attributes are merged into the Access-Accept
    Accept { attributes: Vec<Attribute> },
    Reject,
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, peer: PeerIdentity<'_>) -> Result<Verdict, VerifierError>;
}

/// Result of feeding a GTC response to its validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GtcStep {
    pub status: Status,
    /// Sent as the next GTC request when the status is `Unknown`
    pub challenge: Option<Vec<u8>>,
}

pub type GtcValidator = Arc<dyn Fn(&[u8]) -> GtcStep + Send + Sync>;

pub struct GtcChallenge {
    pub challenge: Vec<u8>,
    pub validator: GtcValidator,
}

#[async_trait]
pub trait ChallengeVerifier: Send + Sync {
    /// Challenge text for a GTC exchange and the validator for its answer
    async fn gtc_challenge(&self, identity: &str) -> Result<GtcChallenge, VerifierError>;

    /// NT password hash (MD4 of the UTF-16LE password) of a known user
    async fn nt_password_hash(&self, username: &str) -> Result<Option<[u8; 16]>, VerifierError>;
}

/// Verifier backed by the static user list of the configuration
///
/// Certificates are accepted when the leaf's subject CN equals the EAP
/// identity. Accepted peers get a `User-Name` attribute.
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    users: HashMap<String, String>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: &[UserEntry]) -> Self {
        let mut verifier = Self::new();
        for user in users {
            verifier.add_user(&user.username, &user.password);
        }
        verifier
    }

    pub fn add_user(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    fn accept(identity: &str) -> Result<Verdict, VerifierError> {
        Ok(Verdict::Accept {
            attributes: vec![Attribute::string(AttributeType::UserName as u8, identity)?],
        })
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, peer: PeerIdentity<'_>) -> Result<Verdict, VerifierError> {
        let Some(identity) = peer.identity.filter(|i| !i.is_empty()) else {
            return Ok(Verdict::Reject);
        };

        match peer.certificates.first() {
            Some(leaf) => {
                let common_name = peer_common_name(leaf)
                    .map_err(|e| VerifierError::Certificate(e.to_string()))?;
                if common_name.as_deref() == Some(identity) {
                    Self::accept(identity)
                } else {
                    debug!(
                        identity,
                        common_name = ?common_name,
                        "Certificate subject does not match identity"
                    );
                    Ok(Verdict::Reject)
                }
            }
            // The inner method already proved the password
            None if self.users.contains_key(identity) => Self::accept(identity),
            None => Ok(Verdict::Reject),
        }
    }
}

#[async_trait]
impl ChallengeVerifier for StaticVerifier {
    async fn gtc_challenge(&self, identity: &str) -> Result<GtcChallenge, VerifierError> {
        let expected = self.users.get(identity).cloned();
        let validator: GtcValidator = Arc::new(move |response: &[u8]| {
            let status = match &expected {
                Some(password) if password.as_bytes() == response => Status::Success,
                _ => Status::Error,
            };
            GtcStep {
                status,
                challenge: None,
            }
        });

        Ok(GtcChallenge {
            challenge: b"Password: ".to_vec(),
            validator,
        })
    }

    async fn nt_password_hash(&self, username: &str) -> Result<Option<[u8; 16]>, VerifierError> {
        Ok(self.users.get(username).map(|password| nt_password_hash(password)))
    }
}
