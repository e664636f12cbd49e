//! Per-session task owning the rustls server connection
//!
//! The request path never touches the connection directly. It sends a
//! command over a bounded channel and waits for the reply; the task exits
//! once it has been idle for longer than the handshake timeout or when the
//! last handle is dropped.

use super::TunnelError;
use eap_proto::EapType;
use rustls::{ProtocolVersion, ServerConfig, ServerConnection};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const COMMAND_QUEUE: usize = 4;
const KEYING_MATERIAL_LENGTH: usize = 128;

/// RFC 5216 Section 2.3
const EAP_TLS_LABEL: &[u8] = b"client EAP encryption";
/// RFC 9190 Section 2.3
const EAP_TLS13_LABEL: &[u8] = b"EXPORTER_EAP_TLS_Key_Material";

/// Facts about a completed handshake
#[derive(Clone)]
pub struct HandshakeSummary {
    pub keying_material: Box<[u8; KEYING_MATERIAL_LENGTH]>,
    /// DER certificates presented by the peer, leaf first
    pub peer_certificates: Vec<Vec<u8>>,
    pub tls13: bool,
    pub cipher_suite: Option<String>,
    pub server_name: Option<String>,
}

impl std::fmt::Debug for HandshakeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeSummary")
            .field("peer_certificates", &self.peer_certificates.len())
            .field("tls13", &self.tls13)
            .field("cipher_suite", &self.cipher_suite)
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Result of feeding one complete TLS flight
#[derive(Debug, Default)]
pub struct FeedOutcome {
    /// Records to send back to the peer
    pub ciphertext: Vec<u8>,
    /// Application data decrypted from the flight
    pub plaintext: Vec<u8>,
    pub handshaking: bool,
    /// Present on the flight that completed the handshake
    pub summary: Option<HandshakeSummary>,
}

enum Command {
    Feed {
        ciphertext: Vec<u8>,
        reply: oneshot::Sender<Result<FeedOutcome, TunnelError>>,
    },
    Seal {
        plaintext: Vec<u8>,
        reply: oneshot::Sender<Result<Vec<u8>, TunnelError>>,
    },
}

/// Handle to a running tunnel task
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    commands: mpsc::Sender<Command>,
    idle_timeout: Duration,
    last_used: Instant,
}

impl TunnelHandle {
    /// Create the server connection and start its task
    pub fn spawn(
        config: Arc<ServerConfig>,
        method: EapType,
        idle_timeout: Duration,
        token: String,
    ) -> Result<Self, TunnelError> {
        let connection = ServerConnection::new(config)?;
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE);

        tokio::spawn(run(connection, receiver, method, idle_timeout, token));

        Ok(TunnelHandle {
            commands,
            idle_timeout,
            last_used: Instant::now(),
        })
    }

    /// Feed one reassembled TLS flight from the peer
    pub async fn feed(&mut self, ciphertext: Vec<u8>) -> Result<FeedOutcome, TunnelError> {
        let (reply, response) = oneshot::channel();
        self.request(Command::Feed { ciphertext, reply }, response)
            .await
    }

    /// Encrypt application data for the peer
    pub async fn seal(&mut self, plaintext: Vec<u8>) -> Result<Vec<u8>, TunnelError> {
        let (reply, response) = oneshot::channel();
        self.request(Command::Seal { plaintext, reply }, response)
            .await
    }

    async fn request<T>(
        &mut self,
        command: Command,
        response: oneshot::Receiver<Result<T, TunnelError>>,
    ) -> Result<T, TunnelError> {
        if self.commands.send(command).await.is_err() {
            return Err(self.gone());
        }
        let result = response.await.map_err(|_| self.gone())?;
        self.last_used = Instant::now();
        result
    }

    fn gone(&self) -> TunnelError {
        if self.last_used.elapsed() >= self.idle_timeout {
            TunnelError::Timeout
        } else {
            TunnelError::Closed
        }
    }
}

async fn run(
    mut connection: ServerConnection,
    mut commands: mpsc::Receiver<Command>,
    method: EapType,
    idle_timeout: Duration,
    token: String,
) {
    let mut summarized = false;

    loop {
        let command = match tokio::time::timeout(idle_timeout, commands.recv()).await {
            Ok(Some(command)) => command,
            Ok(None) => break,
            Err(_) => {
                if connection.is_handshaking() {
                    warn!(session = %token, method = %method, "TLS handshake timed out");
                } else {
                    debug!(session = %token, method = %method, "Tunnel idle, closing");
                }
                break;
            }
        };

        match command {
            Command::Feed { ciphertext, reply } => {
                let result = feed(&mut connection, &ciphertext, method, &mut summarized);
                let failed = result.is_err();
                let _ = reply.send(result);
                if failed {
                    break;
                }
            }
            Command::Seal { plaintext, reply } => {
                let _ = reply.send(seal(&mut connection, &plaintext));
            }
        }
    }
}

fn feed(
    connection: &mut ServerConnection,
    mut ciphertext: &[u8],
    method: EapType,
    summarized: &mut bool,
) -> Result<FeedOutcome, TunnelError> {
    while !ciphertext.is_empty() {
        if connection.read_tls(&mut ciphertext)? == 0 {
            break;
        }
        if let Err(error) = connection.process_new_packets() {
            let alert = drain(connection).unwrap_or_default();
            return Err(TunnelError::Handshake { error, alert });
        }
    }

    let mut outcome = FeedOutcome {
        plaintext: read_plaintext(connection)?,
        ciphertext: drain(connection)?,
        handshaking: connection.is_handshaking(),
        summary: None,
    };

    if !outcome.handshaking && !*summarized {
        outcome.summary = Some(summarize(connection, method)?);
        *summarized = true;
    }
    Ok(outcome)
}

fn seal(connection: &mut ServerConnection, plaintext: &[u8]) -> Result<Vec<u8>, TunnelError> {
    connection.writer().write_all(plaintext)?;
    drain(connection)
}

fn read_plaintext(connection: &mut ServerConnection) -> Result<Vec<u8>, TunnelError> {
    let mut plaintext = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match connection.reader().read(&mut buf) {
            Ok(0) => break,
            Ok(n) => plaintext.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(plaintext)
}

fn drain(connection: &mut ServerConnection) -> Result<Vec<u8>, TunnelError> {
    let mut out = Vec::new();
    while connection.wants_write() {
        connection.write_tls(&mut out)?;
    }
    Ok(out)
}

/// Export 128 bytes of keying material with the label for the negotiated
/// version; TLS 1.3 binds the EAP method type as exporter context
fn summarize(
    connection: &ServerConnection,
    method: EapType,
) -> Result<HandshakeSummary, TunnelError> {
    let tls13 = connection.protocol_version() == Some(ProtocolVersion::TLSv1_3);
    let method_context = [method.as_u8()];
    let (label, context) = if tls13 {
        (EAP_TLS13_LABEL, Some(&method_context[..]))
    } else {
        (EAP_TLS_LABEL, None)
    };

    let keying_material = connection
        .export_keying_material([0u8; KEYING_MATERIAL_LENGTH], label, context)
        .map_err(|e| TunnelError::Exporter(e.to_string()))?;

    Ok(HandshakeSummary {
        keying_material: Box::new(keying_material),
        peer_certificates: connection
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
            .unwrap_or_default(),
        tls13,
        cipher_suite: connection
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite())),
        server_name: connection.server_name().map(str::to_string),
    })
}
