//! The EAP engine: one call per inbound EAP-Message
//!
//! Every error is resolved here into one of three outcomes: continue with a
//! challenge, accept or reject. Callers never see decode or handshake errors.

use crate::config::{ConfigError, EngineConfig};
use crate::conversation::Step;
use crate::methods::gtc::GtcMethod;
use crate::methods::identity::IdentityMethod;
use crate::methods::mschapv2::MsChapV2Method;
use crate::methods::nak::LegacyNakMethod;
use crate::methods::peap::PeapMethod;
use crate::methods::tls::TlsMethod;
use crate::methods::MethodTable;
use crate::state::{SessionKeys, StateManager, Status};
use crate::tunnel::TunnelSettings;
use crate::verifier::StaticVerifier;
use dashmap::DashMap;
use eap_proto::eap::certs::build_server_config;
use eap_proto::{Attribute, EapCode, EapError, EapPacket, PayloadRegistry};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] EapError),
}

/// What the transport should answer
#[derive(Debug)]
pub enum Outcome {
    /// Send `packet` and echo `token` back as State
    Challenge { token: String, packet: Vec<u8> },
    Accept {
        packet: Vec<u8>,
        keys: Option<SessionKeys>,
        attributes: Vec<Attribute>,
    },
    Reject { packet: Vec<u8> },
}

impl Outcome {
    fn reject(identifier: u8) -> Self {
        Outcome::Reject {
            packet: encode_bare(EapPacket::failure(identifier)),
        }
    }
}

/// Success and Failure have no payload and always fit
fn encode_bare(packet: EapPacket) -> Vec<u8> {
    packet
        .encode()
        .unwrap_or_else(|_| vec![packet.code.as_u8(), packet.identifier, 0, 4])
}

pub struct EapEngine {
    store: Arc<dyn StateManager>,
    table: Arc<MethodTable>,
    /// Serializes requests of one session
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EapEngine {
    pub fn new(store: Arc<dyn StateManager>, table: Arc<MethodTable>) -> Self {
        EapEngine {
            store,
            table,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, token: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop locks no request is holding
    pub fn prune_locks(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Handle one EAP packet; an empty `eap` (EAP-Start) opens a session
    pub async fn handle(&self, token: Option<&str>, eap: &[u8]) -> Outcome {
        let token = token.filter(|t| !t.is_empty());

        let inbound = if eap.is_empty() {
            None
        } else {
            match EapPacket::decode(eap, self.table.registry()) {
                Ok(packet) => Some(packet),
                Err(e) => {
                    debug!(session = ?token, error = %e, "Rejecting undecodable EAP packet");
                    return Outcome::reject(eap.get(1).copied().unwrap_or_default());
                }
            }
        };

        if let Some(packet) = &inbound
            && packet.code != EapCode::Response
        {
            warn!(session = ?token, code = ?packet.code, "Peer sent a non-response EAP packet");
            return Outcome::reject(packet.identifier);
        }

        let lock = token.map(|t| self.lock_for(t));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let session = self.store.begin_or_resume(token).await;
        if let Some(stale) = token
            && !matches!(&session, Ok(s) if s.token() == stale)
        {
            // Unknown token
            self.locks.remove_if(stale, |_, lock| Arc::strong_count(lock) <= 2);
        }
        let mut session = match session {
            Ok(session) => session,
            Err(e) => {
                warn!(session = ?token, error = %e, "Session store unavailable");
                return Outcome::reject(inbound.as_ref().map_or(0, |p| p.identifier));
            }
        };

        let step = session
            .conversation
            .step(&self.table, inbound.as_ref(), &mut session.context)
            .await;

        let identifier = inbound
            .as_ref()
            .map(|p| p.identifier)
            .or(session.conversation.last_identifier())
            .unwrap_or_default();

        let status = match step {
            Step::Reply(request) => {
                let packet = match request.encode() {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!(session = %session.token(), error = %e, "Could not encode EAP request");
                        self.finish(session.token()).await;
                        return Outcome::reject(identifier);
                    }
                };
                let token = session.token().to_string();
                if let Err(e) = self.store.put_state(session).await {
                    warn!(session = %token, error = %e, "Could not store session");
                    self.finish(&token).await;
                    return Outcome::reject(identifier);
                }
                return Outcome::Challenge { token, packet };
            }
            Step::Done(status) => status,
        };

        self.finish(session.token()).await;
        match status {
            Status::Success => {
                info!(
                    session = %session.token(),
                    identity = ?session.context.identity,
                    "EAP authentication succeeded"
                );
                Outcome::Accept {
                    packet: encode_bare(EapPacket::success(identifier)),
                    keys: session.context.keys,
                    attributes: session.context.attributes,
                }
            }
            _ => {
                info!(
                    session = %session.token(),
                    identity = ?session.context.identity,
                    "EAP authentication failed"
                );
                Outcome::reject(identifier)
            }
        }
    }

    async fn finish(&self, token: &str) {
        if let Err(e) = self.store.remove_state(token).await {
            warn!(session = %token, error = %e, "Could not remove session");
        }
        self.locks.remove(token);
    }
}

/// Handlers for the outer conversation; TLS based methods are registered
/// only when certificates are configured
pub fn build_method_table(config: &EngineConfig) -> Result<MethodTable, EngineError> {
    let verifier = Arc::new(StaticVerifier::from_users(&config.users));

    let inner = MethodTable::new(PayloadRegistry::standard())
        .with(Arc::new(IdentityMethod))
        .with(Arc::new(LegacyNakMethod))
        .with(Arc::new(GtcMethod::new(verifier.clone())))
        .with(Arc::new(MsChapV2Method::new(
            verifier.clone(),
            config.mschapv2_server_name.clone(),
        )));
    let mut outer = inner.clone();

    if let Some(certificates) = config.tls_certificate_config() {
        let settings = TunnelSettings {
            server_config: Arc::new(build_server_config(&certificates)?),
            fragment_size: config.fragment_size,
            handshake_timeout: config.handshake_timeout(),
        };
        outer.register(Arc::new(TlsMethod::new(settings.clone(), verifier.clone())));
        outer.register(Arc::new(PeapMethod::new(
            settings,
            verifier,
            Arc::new(inner),
            config.peap_inner_priority.clone(),
        )));
    }

    Ok(outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TlsSettings, UserEntry};
    use crate::state::{MemoryStateManager, MethodConfiguration};
    use eap_proto::eap::certs::load_certificates_from_pem;
    use eap_proto::eap::tls::{TlsFlags, TlsPayload};
    use eap_proto::{EapType, Payload};

    fn engine() -> EapEngine {
        let config = EngineConfig {
            method_priority: vec![EapType::Identity, EapType::Gtc],
            users: vec![UserEntry {
                username: "alice".into(),
                password: "password".into(),
            }],
            ..Default::default()
        };
        let store = MemoryStateManager::new(MethodConfiguration::new(config.method_priority.clone()));
        EapEngine::new(
            Arc::new(store),
            Arc::new(build_method_table(&config).unwrap()),
        )
    }

    fn registry() -> PayloadRegistry {
        PayloadRegistry::standard()
    }

    #[tokio::test]
    async fn test_gtc_session() {
        let engine = engine();

        let Outcome::Challenge { token, packet } = engine.handle(None, &[]).await else {
            panic!("expected identity request");
        };
        let request = EapPacket::decode(&packet, &registry()).unwrap();
        assert_eq!(request.method_type, Some(EapType::Identity));

        let identity = EapPacket::response(
            request.identifier,
            EapType::Identity,
            Payload::Identity("alice".into()),
        );
        let Outcome::Challenge { token: next, packet } =
            engine.handle(Some(&token), &identity.encode().unwrap()).await
        else {
            panic!("expected GTC request");
        };
        assert_eq!(next, token);
        let request = EapPacket::decode(&packet, &registry()).unwrap();
        assert_eq!(request.identifier, identity.identifier.wrapping_add(1));
        assert_eq!(request.method_type, Some(EapType::Gtc));

        let answer = EapPacket::response(
            request.identifier,
            EapType::Gtc,
            Payload::Gtc(b"password".to_vec()),
        );
        match engine.handle(Some(&token), &answer.encode().unwrap()).await {
            Outcome::Accept {
                packet, attributes, ..
            } => {
                let success = EapPacket::decode(&packet, &registry()).unwrap();
                assert_eq!(success.code, EapCode::Success);
                assert_eq!(success.identifier, answer.identifier);
                assert_eq!(attributes.len(), 0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.lock_count(), 0);

        // Session is gone: the same token starts over
        assert!(matches!(
            engine.handle(Some(&token), &answer.encode().unwrap()).await,
            Outcome::Reject { .. }
        ));
    }

    #[tokio::test]
    async fn test_identity_without_state_starts_session() {
        let engine = engine();
        let identity = EapPacket::response(17, EapType::Identity, Payload::Identity("alice".into()));
        let Outcome::Challenge { packet, .. } = engine.handle(None, &identity.encode().unwrap()).await
        else {
            panic!("expected GTC request");
        };
        let request = EapPacket::decode(&packet, &registry()).unwrap();
        assert_eq!(request.identifier, 18);
        assert_eq!(request.method_type, Some(EapType::Gtc));
    }

    #[tokio::test]
    async fn test_wrong_password_rejects() {
        let engine = engine();
        let identity = EapPacket::response(1, EapType::Identity, Payload::Identity("alice".into()));
        let Outcome::Challenge { token, .. } = engine.handle(None, &identity.encode().unwrap()).await
        else {
            panic!("expected GTC request");
        };

        let answer = EapPacket::response(2, EapType::Gtc, Payload::Gtc(b"wrong".to_vec()));
        match engine.handle(Some(&token), &answer.encode().unwrap()).await {
            Outcome::Reject { packet } => {
                let failure = EapPacket::decode(&packet, &registry()).unwrap();
                assert_eq!(failure.code, EapCode::Failure);
                assert_eq!(failure.identifier, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_packets_reject() {
        let engine = engine();

        // Length field disagrees with the buffer
        assert!(matches!(
            engine.handle(None, &[2, 5, 0, 9, 1]).await,
            Outcome::Reject { .. }
        ));

        // Requests are not accepted from the peer
        let request = EapPacket::request(5, EapType::Identity, Payload::Identity(String::new()));
        assert!(matches!(
            engine.handle(None, &request.encode().unwrap()).await,
            Outcome::Reject { .. }
        ));
    }

    #[tokio::test]
    async fn test_prune_locks() {
        let engine = engine();
        let held = engine.lock_for("busy");
        engine.lock_for("idle");
        assert_eq!(engine.lock_count(), 2);

        engine.prune_locks();
        assert_eq!(engine.lock_count(), 1);
        drop(held);
        engine.prune_locks();
        assert_eq!(engine.lock_count(), 0);
    }

    #[test]
    fn test_tls_methods_need_certificates() {
        let table = build_method_table(&EngineConfig::default()).unwrap();
        assert!(table.get(EapType::Peap).is_none());
        assert!(table.get(EapType::MsChapV2).is_some());
    }

    fn fixture(name: &str) -> String {
        format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
    }

    fn tls_engine(fragment_size: usize) -> (EapEngine, Arc<MemoryStateManager>) {
        let config = EngineConfig {
            method_priority: vec![EapType::Identity, EapType::Tls],
            tls: Some(TlsSettings {
                cert_path: fixture("server.pem"),
                key_path: fixture("server-key.pem"),
                ca_path: None,
                require_client_cert: false,
            }),
            fragment_size,
            ..Default::default()
        };
        let store = Arc::new(MemoryStateManager::new(MethodConfiguration::new(
            config.method_priority.clone(),
        )));
        let engine = EapEngine::new(store.clone(), Arc::new(build_method_table(&config).unwrap()));
        (engine, store)
    }

    fn client_hello() -> Vec<u8> {
        let mut roots = rustls::RootCertStore::empty();
        for cert in load_certificates_from_pem(&fixture("ca.pem")).unwrap() {
            roots.add(cert).unwrap();
        }
        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
        let name = pki_types::ServerName::try_from("radius.test").unwrap();
        let mut client = rustls::ClientConnection::new(Arc::new(config), name).unwrap();

        let mut records = Vec::new();
        while client.wants_write() {
            client.write_tls(&mut records).unwrap();
        }
        records
    }

    async fn pending(store: &MemoryStateManager, token: &str) -> Vec<EapType> {
        let session = store.get_state(token).await.unwrap().expect("stored session");
        assert_eq!(session.token(), token);
        session.conversation.pending().copied().collect()
    }

    fn tls_fragment(packet: &[u8]) -> (u8, TlsPayload) {
        let request = EapPacket::decode(packet, &registry()).unwrap();
        assert_eq!(request.method_type, Some(EapType::Tls));
        match request.payload {
            Some(Payload::Tls(fragment)) => (request.identifier, fragment),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tls_session_continuity_through_store() {
        let (engine, store) = tls_engine(300);

        let identity = EapPacket::response(1, EapType::Identity, Payload::Identity("alice".into()));
        let Outcome::Challenge { token, packet } = engine.handle(None, &identity.encode().unwrap()).await
        else {
            panic!("expected EAP-TLS start");
        };
        let (mut identifier, start) = tls_fragment(&packet);
        assert!(start.flags.start());
        assert_eq!(pending(&store, &token).await, vec![EapType::Tls]);

        let hello = EapPacket::response(
            identifier,
            EapType::Tls,
            Payload::Tls(TlsPayload::new(TlsFlags::new(false, false, false), None, client_hello())),
        );
        let Outcome::Challenge { token: next, packet } =
            engine.handle(Some(&token), &hello.encode().unwrap()).await
        else {
            panic!("expected the first server fragment");
        };
        assert_eq!(next, token);
        let (id, mut fragment) = tls_fragment(&packet);
        identifier = id;
        assert!(fragment.flags.more_fragments());
        assert!(fragment.data.len() <= 300);
        assert_eq!(pending(&store, &token).await, vec![EapType::Tls]);

        let mut fragments = 1;
        while fragment.flags.more_fragments() {
            let ack = EapPacket::response(identifier, EapType::Tls, Payload::Tls(TlsPayload::ack()));
            let Outcome::Challenge { token: next, packet } =
                engine.handle(Some(&token), &ack.encode().unwrap()).await
            else {
                panic!("expected another server fragment");
            };
            assert_eq!(next, token);
            (identifier, fragment) = tls_fragment(&packet);
            assert_eq!(pending(&store, &token).await, vec![EapType::Tls]);
            fragments += 1;
        }
        assert!(fragments > 1);
        assert_eq!(engine.lock_count(), 1);

        // Refusing the method mid-handshake ends the session
        let nak = EapPacket::response(identifier, EapType::Nak, Payload::Nak(vec![EapType::Peap.as_u8()]));
        match engine.handle(Some(&token), &nak.encode().unwrap()).await {
            Outcome::Reject { packet } => {
                let failure = EapPacket::decode(&packet, &registry()).unwrap();
                assert_eq!(failure.code, EapCode::Failure);
                assert_eq!(failure.identifier, identifier);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(store.get_state(&token).await.unwrap().is_none());
        assert_eq!(engine.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_token_leaves_no_lock() {
        let engine = engine();
        let identity = EapPacket::response(1, EapType::Identity, Payload::Identity("alice".into()));

        let Outcome::Challenge { token, .. } =
            engine.handle(Some("stale"), &identity.encode().unwrap()).await
        else {
            panic!("expected GTC request");
        };
        assert_ne!(token, "stale");
        assert_eq!(engine.lock_count(), 0);

        // Undecodable packets are refused before any lock is taken
        assert!(matches!(
            engine.handle(Some("stale"), &[2, 5, 0, 9, 1]).await,
            Outcome::Reject { .. }
        ));
        assert_eq!(engine.lock_count(), 0);
    }
}
