//! End-to-end EAP-TLS and PEAP exchanges through the RADIUS adapter
//!
//! A rustls client plays the supplicant. Tests cover:
//! - PEAPv0 with inner EAP-MSCHAPv2 on TLS 1.2 and TLS 1.3
//! - EAP-TLS with a client certificate on TLS 1.2 and TLS 1.3
//! - Fragmentation of TLS flights in both directions
//! - MS-MPPE keys matching the peer's own exporter output
//! - Access-Reject on a wrong inner password or a missing client certificate
//! - Access-Reject when the MSCHAPv2 name differs from the inner identity
//! - Alerts reaching the peer and idle tunnels timing out

use eap_engine::engine::build_method_table;
use eap_engine::{
    EapEngine, EngineConfig, MemoryStateManager, MethodConfiguration, RadiusAdapter, TlsSettings,
    UserEntry,
};
use eap_proto::attributes::{MICROSOFT_VENDOR_ID, MsVendorType};
use eap_proto::eap::certs::{load_certificates_from_pem, load_private_key_from_pem};
use eap_proto::eap::extensions::{ResultCode, Tlv, decode_tlvs, find_result};
use eap_proto::eap::mschapv2::{
    MsChapV2Packet, MsChapV2Response, generate_authenticator_response, generate_nt_response,
    nt_password_hash,
};
use eap_proto::eap::tls::{TlsFlags, TlsPayload};
use eap_proto::eap::{add_eap_to_radius_packet, eap_bytes_from_radius_packet};
use eap_proto::mppe::decrypt_key;
use eap_proto::{
    Attribute, AttributeType, Code, EapCode, EapPacket, EapType, Packet, Payload, PayloadRegistry,
    attach_integrity, verify_integrity, verify_response_authenticator,
};
use pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, ProtocolVersion, RootCertStore, SupportedProtocolVersion};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

const SECRET: &[u8] = b"testing123";
const CLIENT_FRAGMENT: usize = 400;

fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

fn engine_config(method: EapType, fragment_size: usize, ca: bool) -> EngineConfig {
    EngineConfig {
        method_priority: vec![EapType::Identity, method],
        peap_inner_priority: vec![EapType::Identity, EapType::MsChapV2],
        tls: Some(TlsSettings {
            cert_path: fixture("server.pem"),
            key_path: fixture("server-key.pem"),
            ca_path: ca.then(|| fixture("ca.pem")),
            require_client_cert: false,
        }),
        fragment_size,
        users: vec![
            UserEntry {
                username: "alice".into(),
                password: "password".into(),
            },
            UserEntry {
                username: "bob".into(),
                password: "hunter2".into(),
            },
        ],
        ..Default::default()
    }
}

fn create_adapter(config: &EngineConfig) -> RadiusAdapter {
    config.validate().expect("valid configuration");
    let table = build_method_table(config).expect("method table");
    let store = MemoryStateManager::new(MethodConfiguration::new(config.method_priority.clone()));
    let engine = EapEngine::new(Arc::new(store), Arc::new(table));
    RadiusAdapter::new(Arc::new(engine))
}

fn client_config(version: &'static SupportedProtocolVersion, with_certificate: bool) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates_from_pem(&fixture("ca.pem")).expect("CA") {
        roots.add(cert).expect("CA certificate");
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_protocol_versions(&[version])
        .expect("protocol versions")
        .with_root_certificates(roots);

    let config = if with_certificate {
        let chain = load_certificates_from_pem(&fixture("client.pem")).expect("client certificate");
        let key = load_private_key_from_pem(&fixture("client-key.pem")).expect("client key");
        builder.with_client_auth_cert(chain, key).expect("client auth")
    } else {
        builder.with_no_client_auth()
    };
    Arc::new(config)
}

/// NAS side: signs Access-Requests, carries State, checks every answer
struct Nas {
    adapter: RadiusAdapter,
    state: Option<Attribute>,
    radius_id: u8,
}

struct Answer {
    code: Code,
    eap: EapPacket,
    response: Packet,
    request_authenticator: [u8; 16],
}

impl Nas {
    fn new(adapter: RadiusAdapter) -> Self {
        Nas {
            adapter,
            state: None,
            radius_id: 0,
        }
    }

    async fn send(&mut self, eap: &EapPacket) -> Answer {
        self.radius_id = self.radius_id.wrapping_add(1);
        let authenticator: [u8; 16] = rand::random();

        let mut request = Packet::new(Code::AccessRequest, self.radius_id, authenticator);
        request.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice").unwrap());
        add_eap_to_radius_packet(&mut request, &eap.encode().unwrap()).unwrap();
        if let Some(state) = &self.state {
            request.add_attribute(state.clone());
        }
        attach_integrity(&mut request, SECRET).unwrap();

        let response = self
            .adapter
            .handle(&request, SECRET)
            .await
            .expect("adapter answers");
        assert_eq!(response.identifier, self.radius_id);
        assert!(verify_response_authenticator(&response, &authenticator, SECRET));
        let mut unsigned = response.clone();
        unsigned.authenticator = authenticator;
        assert!(verify_integrity(&unsigned, SECRET).is_ok());

        self.state = response.find_attribute(AttributeType::State as u8).cloned();
        let bytes = eap_bytes_from_radius_packet(&response).expect("EAP-Message in answer");
        let eap_answer = EapPacket::decode(&bytes, &PayloadRegistry::standard()).expect("EAP answer");

        if response.code == Code::AccessChallenge {
            assert_eq!(eap_answer.code, EapCode::Request);
            assert_eq!(eap_answer.identifier, eap.identifier.wrapping_add(1));
        }

        Answer {
            code: response.code,
            eap: eap_answer,
            response,
            request_authenticator: authenticator,
        }
    }
}

/// Supplicant end of the tunnel: reassembles server fragments and splits
/// its own flights
struct TunnelPeer {
    method: EapType,
    tls: ClientConnection,
    inbound: Vec<u8>,
    outbound: VecDeque<TlsPayload>,
    /// Largest server fragment seen
    largest_fragment: usize,
    server_fragments: usize,
    /// Error raised while processing a server flight, such as a received alert
    failure: Option<rustls::Error>,
}

impl TunnelPeer {
    fn new(method: EapType, config: Arc<ClientConfig>) -> Self {
        let name = ServerName::try_from("radius.test").expect("server name");
        TunnelPeer {
            method,
            tls: ClientConnection::new(config, name).expect("client connection"),
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            largest_fragment: 0,
            server_fragments: 0,
            failure: None,
        }
    }

    fn response(&self, identifier: u8, payload: TlsPayload) -> EapPacket {
        EapPacket::response(identifier, self.method, Payload::Tls(payload))
    }

    /// Split everything rustls wants to write into fragments
    fn queue_records(&mut self) {
        let mut records = Vec::new();
        while self.tls.wants_write() {
            self.tls.write_tls(&mut records).expect("write records");
        }
        if records.is_empty() {
            return;
        }

        let total = records.len() as u32;
        let mut chunks = records.chunks(CLIENT_FRAGMENT).peekable();
        let mut first = true;
        while let Some(chunk) = chunks.next() {
            let more = chunks.peek().is_some();
            let payload = if first {
                TlsPayload::new(TlsFlags::new(true, more, false), Some(total), chunk.to_vec())
            } else {
                TlsPayload::new(TlsFlags::new(false, more, false), None, chunk.to_vec())
            };
            first = false;
            self.outbound.push_back(payload);
        }
    }

    /// Feed the reassembled server flight and collect any application data
    fn process_flight(&mut self) -> Vec<u8> {
        let flight = std::mem::take(&mut self.inbound);
        let mut reader = &flight[..];
        while !reader.is_empty() {
            self.tls.read_tls(&mut reader).expect("read records");
            if let Err(e) = self.tls.process_new_packets() {
                self.failure = Some(e);
                return Vec::new();
            }
        }

        let mut plaintext = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.tls.reader().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => plaintext.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("reading tunnel plaintext: {}", e),
            }
        }
        plaintext
    }

    fn next_payload(&mut self) -> TlsPayload {
        self.outbound.pop_front().unwrap_or_else(TlsPayload::ack)
    }

    fn exporter_output(&self) -> [u8; 128] {
        let method = [self.method.as_u8()];
        let (label, context): (&[u8], Option<&[u8]>) = match self.tls.protocol_version() {
            Some(ProtocolVersion::TLSv1_3) => (b"EXPORTER_EAP_TLS_Key_Material", Some(&method[..])),
            _ => (b"client EAP encryption", None),
        };
        self.tls
            .export_keying_material([0u8; 128], label, context)
            .expect("exporter")
    }
}

/// Supplicant side of the PEAPv0 inner conversation
struct InnerPeer {
    identity: String,
    username: String,
    password: String,
    peer_challenge: [u8; 16],
    expected_authenticator: Option<String>,
    saw_success_request: bool,
    saw_result: Option<ResultCode>,
}

impl InnerPeer {
    fn new(username: &str, password: &str) -> Self {
        Self::with_identity(username, username, password)
    }

    /// Inner Identity answered with `identity`, MSCHAPv2 run as `username`
    fn with_identity(identity: &str, username: &str, password: &str) -> Self {
        InnerPeer {
            identity: identity.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            peer_challenge: [0x5A; 16],
            expected_authenticator: None,
            saw_success_request: false,
            saw_result: None,
        }
    }

    /// Answer one decrypted inner request with the plaintext to send back
    fn answer(&mut self, plaintext: &[u8]) -> Vec<u8> {
        let extensions = plaintext.len() > 4
            && plaintext[0] == EapCode::Request.as_u8()
            && plaintext[4] == EapType::Extensions.as_u8();
        if extensions {
            let identifier = plaintext[1];
            let tlvs = decode_tlvs(&plaintext[5..]).expect("result TLVs");
            self.saw_result = find_result(&tlvs);
            let response = EapPacket::response(
                identifier,
                EapType::Extensions,
                Payload::Extensions(vec![Tlv::result(ResultCode::Success)]),
            );
            return response.encode().unwrap();
        }

        match EapType::from_u8(plaintext[0]) {
            Some(EapType::Identity) => {
                let mut reply = vec![EapType::Identity.as_u8()];
                reply.extend_from_slice(self.identity.as_bytes());
                reply
            }
            Some(EapType::MsChapV2) => match MsChapV2Packet::decode(&plaintext[1..]).expect("MSCHAPv2") {
                MsChapV2Packet::Challenge { ms_id, challenge, .. } => {
                    let password_hash = nt_password_hash(&self.password);
                    let nt_response =
                        generate_nt_response(&challenge, &self.peer_challenge, &self.username, &password_hash);
                    self.expected_authenticator = Some(generate_authenticator_response(
                        &password_hash,
                        &nt_response,
                        &self.peer_challenge,
                        &challenge,
                        &self.username,
                    ));
                    let response = MsChapV2Packet::Response {
                        ms_id,
                        response: MsChapV2Response {
                            peer_challenge: self.peer_challenge,
                            nt_response,
                            flags: 0,
                        },
                        name: self.username.clone(),
                    };
                    let mut reply = vec![EapType::MsChapV2.as_u8()];
                    reply.extend(response.encode());
                    reply
                }
                MsChapV2Packet::SuccessRequest { message, .. } => {
                    assert_eq!(Some(&message), self.expected_authenticator.as_ref());
                    self.saw_success_request = true;
                    let mut reply = vec![EapType::MsChapV2.as_u8()];
                    reply.extend(MsChapV2Packet::SuccessResponse.encode());
                    reply
                }
                other => panic!("unexpected MSCHAPv2 packet {:?}", other),
            },
            other => panic!("unexpected inner type {:?}", other),
        }
    }
}

struct Finished {
    answer: Answer,
    peer: TunnelPeer,
    plaintext: Vec<u8>,
}

/// Run a whole conversation; `inner` answers tunnel plaintext (PEAP only)
async fn authenticate(nas: &mut Nas, peer: TunnelPeer, inner: Option<&mut InnerPeer>) -> Finished {
    let identity = EapPacket::response(1, EapType::Identity, Payload::Identity("alice".into()));
    let answer = nas.send(&identity).await;
    resume(nas, peer, inner, answer).await
}

/// Keep answering challenges from `answer` on until the exchange ends
async fn resume(
    nas: &mut Nas,
    mut peer: TunnelPeer,
    mut inner: Option<&mut InnerPeer>,
    mut answer: Answer,
) -> Finished {
    let mut received_plaintext = Vec::new();

    for _ in 0..64 {
        if answer.code != Code::AccessChallenge {
            return Finished {
                answer,
                peer,
                plaintext: received_plaintext,
            };
        }

        let request = &answer.eap;
        assert_eq!(request.method_type, Some(peer.method));
        let Some(Payload::Tls(fragment)) = &request.payload else {
            panic!("challenge without TLS payload: {:?}", request);
        };

        let payload = if !peer.outbound.is_empty() {
            assert!(fragment.is_ack(), "server must acknowledge our fragments");
            peer.next_payload()
        } else if fragment.flags.start() {
            peer.queue_records();
            peer.next_payload()
        } else {
            peer.server_fragments += 1;
            peer.largest_fragment = peer.largest_fragment.max(fragment.data.len());
            peer.inbound.extend_from_slice(&fragment.data);
            if fragment.flags.more_fragments() {
                TlsPayload::ack()
            } else {
                let plaintext = peer.process_flight();
                if !plaintext.is_empty() {
                    received_plaintext.extend_from_slice(&plaintext);
                    if let Some(inner) = inner.as_deref_mut() {
                        let reply = inner.answer(&plaintext);
                        peer.tls.writer().write_all(&reply).expect("tunnel write");
                    }
                }
                peer.queue_records();
                peer.next_payload()
            }
        };

        let response = peer.response(request.identifier, payload);
        answer = nas.send(&response).await;
    }
    panic!("conversation did not finish");
}

fn mppe_keys(answer: &Answer) -> (Vec<u8>, Vec<u8>) {
    let mut recv = None;
    let mut send = None;
    for attr in &answer.response.attributes {
        let Ok(vendor) = attr.as_vendor() else {
            continue;
        };
        assert_eq!(vendor.vendor_id, MICROSOFT_VENDOR_ID);
        let key = decrypt_key(&vendor.value, SECRET, &answer.request_authenticator).expect("MPPE key");
        if vendor.vendor_type == MsVendorType::MppeRecvKey as u8 {
            recv = Some(key);
        } else if vendor.vendor_type == MsVendorType::MppeSendKey as u8 {
            send = Some(key);
        }
    }
    (recv.expect("MS-MPPE-Recv-Key"), send.expect("MS-MPPE-Send-Key"))
}

fn assert_accepted(finished: &Finished) {
    assert_eq!(finished.answer.code, Code::AccessAccept);
    assert_eq!(finished.answer.eap.code, EapCode::Success);
    let user_name = finished
        .answer
        .response
        .find_attribute(AttributeType::UserName as u8)
        .expect("User-Name");
    assert_eq!(user_name.value, b"alice".to_vec());

    let exported = finished.peer.exporter_output();
    let (recv, send) = mppe_keys(&finished.answer);
    assert_eq!(recv, exported[..32].to_vec());
    assert_eq!(send, exported[32..64].to_vec());
}

async fn run_peap(version: &'static SupportedProtocolVersion, password: &str) -> (Finished, InnerPeer) {
    let config = engine_config(EapType::Peap, 1000, false);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Peap, client_config(version, false));
    let mut inner = InnerPeer::new("alice", password);
    let finished = authenticate(&mut nas, peer, Some(&mut inner)).await;
    (finished, inner)
}

#[tokio::test]
async fn test_peap_mschapv2_tls12() {
    let (finished, inner) = run_peap(&rustls::version::TLS12, "password").await;
    assert_accepted(&finished);
    assert!(inner.saw_success_request);
    assert_eq!(inner.saw_result, Some(ResultCode::Success));
    assert_eq!(finished.peer.tls.protocol_version(), Some(ProtocolVersion::TLSv1_2));
}

#[tokio::test]
async fn test_peap_mschapv2_tls13() {
    let (finished, inner) = run_peap(&rustls::version::TLS13, "password").await;
    assert_accepted(&finished);
    assert!(inner.saw_success_request);
    assert_eq!(inner.saw_result, Some(ResultCode::Success));
    assert_eq!(finished.peer.tls.protocol_version(), Some(ProtocolVersion::TLSv1_3));
}

#[tokio::test]
async fn test_peap_wrong_password_rejected() {
    let (finished, inner) = run_peap(&rustls::version::TLS12, "not-the-password").await;
    assert_eq!(finished.answer.code, Code::AccessReject);
    assert_eq!(finished.answer.eap.code, EapCode::Failure);
    assert!(!inner.saw_success_request);
    assert!(inner.saw_result.is_none());
    assert!(
        finished
            .answer
            .response
            .attributes
            .iter()
            .all(|a| a.attr_type != AttributeType::VendorSpecific as u8)
    );
}

#[tokio::test]
async fn test_peap_inner_name_must_match_inner_identity() {
    // Valid credentials for bob cannot authenticate an inner identity of alice
    let config = engine_config(EapType::Peap, 1000, false);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Peap, client_config(&rustls::version::TLS12, false));
    let mut inner = InnerPeer::with_identity("alice", "bob", "hunter2");

    let finished = authenticate(&mut nas, peer, Some(&mut inner)).await;
    assert_eq!(finished.answer.code, Code::AccessReject);
    assert_eq!(finished.answer.eap.code, EapCode::Failure);
    assert!(!inner.saw_success_request);
    assert!(inner.saw_result.is_none());
    assert!(
        finished
            .answer
            .response
            .find_attribute(AttributeType::UserName as u8)
            .is_none()
    );
    assert!(
        finished
            .answer
            .response
            .attributes
            .iter()
            .all(|a| a.attr_type != AttributeType::VendorSpecific as u8)
    );
}

#[tokio::test]
async fn test_peap_matching_names_for_second_user() {
    let config = engine_config(EapType::Peap, 1000, false);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Peap, client_config(&rustls::version::TLS13, false));
    let mut inner = InnerPeer::new("bob", "hunter2");

    let finished = authenticate(&mut nas, peer, Some(&mut inner)).await;
    assert_eq!(finished.answer.code, Code::AccessAccept);
    assert!(inner.saw_success_request);
    assert_eq!(inner.saw_result, Some(ResultCode::Success));
}

#[tokio::test]
async fn test_eap_tls_tls12() {
    let config = engine_config(EapType::Tls, 1000, true);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Tls, client_config(&rustls::version::TLS12, true));

    let finished = authenticate(&mut nas, peer, None).await;
    assert_accepted(&finished);
    assert!(finished.plaintext.is_empty());
}

#[tokio::test]
async fn test_eap_tls_tls13_success_indication() {
    let config = engine_config(EapType::Tls, 1000, true);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Tls, client_config(&rustls::version::TLS13, true));

    let finished = authenticate(&mut nas, peer, None).await;
    assert_accepted(&finished);
    assert_eq!(finished.plaintext, vec![0]);
}

#[tokio::test]
async fn test_eap_tls_fragmented_flights() {
    let config = engine_config(EapType::Tls, 300, true);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Tls, client_config(&rustls::version::TLS12, true));

    let finished = authenticate(&mut nas, peer, None).await;
    assert_accepted(&finished);
    assert!(finished.peer.largest_fragment <= 300);
    // Server certificate alone spans several fragments
    assert!(finished.peer.server_fragments > 3);
}

#[tokio::test]
async fn test_eap_tls_without_client_certificate_rejected() {
    let config = engine_config(EapType::Tls, 1000, true);
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Tls, client_config(&rustls::version::TLS13, false));

    let finished = authenticate(&mut nas, peer, None).await;
    assert_eq!(finished.answer.code, Code::AccessReject);
    assert_eq!(finished.answer.eap.code, EapCode::Failure);
}

#[tokio::test]
async fn test_required_client_certificate_alert_reaches_peer() {
    let mut config = engine_config(EapType::Tls, 1000, true);
    if let Some(tls) = config.tls.as_mut() {
        tls.require_client_cert = true;
    }
    let mut nas = Nas::new(create_adapter(&config));
    let peer = TunnelPeer::new(EapType::Tls, client_config(&rustls::version::TLS13, false));

    let finished = authenticate(&mut nas, peer, None).await;
    assert_eq!(finished.answer.code, Code::AccessReject);
    assert_eq!(finished.answer.eap.code, EapCode::Failure);
    assert!(
        matches!(finished.peer.failure, Some(rustls::Error::AlertReceived(_))),
        "peer saw {:?}",
        finished.peer.failure
    );
}

#[tokio::test]
async fn test_idle_tunnel_times_out() {
    let mut config = engine_config(EapType::Tls, 1000, true);
    config.handshake_timeout_secs = 1;
    let mut nas = Nas::new(create_adapter(&config));
    let mut peer = TunnelPeer::new(EapType::Tls, client_config(&rustls::version::TLS12, true));

    let identity = EapPacket::response(1, EapType::Identity, Payload::Identity("alice".into()));
    let start = nas.send(&identity).await;
    assert!(matches!(
        &start.eap.payload,
        Some(Payload::Tls(fragment)) if fragment.flags.start()
    ));

    peer.queue_records();
    let payload = peer.next_payload();
    let hello = peer.response(start.eap.identifier, payload);
    assert!(peer.outbound.is_empty());
    let answer = nas.send(&hello).await;
    assert_eq!(answer.code, Code::AccessChallenge);

    // Let the tunnel task expire before the peer's next flight
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;

    let finished = resume(&mut nas, peer, None, answer).await;
    assert_eq!(finished.answer.code, Code::AccessReject);
    assert_eq!(finished.answer.eap.code, EapCode::Failure);
    assert!(finished.peer.failure.is_none());
}

#[tokio::test]
async fn test_state_is_required_to_continue() {
    let config = engine_config(EapType::Peap, 1000, false);
    let mut nas = Nas::new(create_adapter(&config));

    let identity = EapPacket::response(1, EapType::Identity, Payload::Identity("alice".into()));
    let start = nas.send(&identity).await;
    assert_eq!(start.code, Code::AccessChallenge);
    assert!(matches!(
        &start.eap.payload,
        Some(Payload::Tls(fragment)) if fragment.flags.start()
    ));

    // Without State the engine starts over and cannot place a PEAP response
    nas.state = None;
    let hello = EapPacket::response(start.eap.identifier, EapType::Peap, Payload::Tls(TlsPayload::ack()));
    let answer = nas.send(&hello).await;
    assert_eq!(answer.code, Code::AccessReject);
}
