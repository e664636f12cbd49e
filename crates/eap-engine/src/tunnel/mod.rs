//! TLS tunnel bridge for EAP-TLS and PEAP
//!
//! Adapts a rustls server connection to a transport that carries one
//! bounded fragment per RADIUS round trip. Inbound fragments are
//! reassembled into complete flights and fed to the per-session tunnel
//! task; the records it produces are split into fragments no larger than
//! the configured size and handed out one per round trip.

pub mod actor;
pub mod fragment;

pub use actor::{FeedOutcome, HandshakeSummary, TunnelHandle};
pub use fragment::{OutboundQueue, Reassembly};

use crate::state::Status;
use eap_proto::EapType;
use eap_proto::eap::tls::TlsPayload;
use rustls::ServerConfig;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    /// The peer's flight was refused; `alert` holds the records rustls
    /// queued to tell the peer why
    #[error("TLS handshake failed: {error}")]
    Handshake { error: rustls::Error, alert: Vec<u8> },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Tunnel timed out")]
    Timeout,
    #[error("Tunnel closed")]
    Closed,
    #[error("Key export failed: {0}")]
    Exporter(String),
    #[error("Fragment error: {0}")]
    Fragment(String),
}

/// Settings shared by every tunnel of one method
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    /// Loaded once at start-up and passed in explicitly
    pub server_config: Arc<ServerConfig>,
    pub fragment_size: usize,
    pub handshake_timeout: Duration,
}

/// What the bridge made of one inbound fragment
#[derive(Debug)]
pub enum Received {
    /// Reply is fixed by the fragmentation layer: an acknowledgement for a
    /// partial inbound flight or the next queued outbound fragment
    Fragment(TlsPayload),
    /// A complete flight was processed (or the peer acknowledged our last one)
    Flight(Flight),
}

#[derive(Debug, Default)]
pub struct Flight {
    /// Decrypted application data
    pub plaintext: Vec<u8>,
    /// True only for the flight that completed the handshake
    pub established: bool,
}

/// Per-session tunnel state, stored in the method's state slot
#[derive(Debug, Clone)]
pub struct TunnelState {
    method: EapType,
    settings: TunnelSettings,
    handle: Option<TunnelHandle>,
    inbound: Reassembly,
    /// Records not yet split into fragments
    outbound: Vec<u8>,
    queue: OutboundQueue,
    handshake_done: bool,
    final_status: Status,
    summary: Option<HandshakeSummary>,
}

impl TunnelState {
    pub fn new(method: EapType, settings: TunnelSettings) -> Self {
        let queue = OutboundQueue::new(settings.fragment_size);
        TunnelState {
            method,
            settings,
            handle: None,
            inbound: Reassembly::default(),
            outbound: Vec::new(),
            queue,
            handshake_done: false,
            final_status: Status::Unknown,
            summary: None,
        }
    }

    /// Fragment that opens the conversation (S flag, no data)
    pub fn start(&self) -> TlsPayload {
        TlsPayload::start()
    }

    /// Process one inbound fragment
    ///
    /// The handshake engine is started on the first complete flight.
    pub async fn receive(&mut self, token: &str, payload: &TlsPayload) -> Result<Received, TunnelError> {
        if !self.queue.is_empty() {
            if !payload.is_ack() {
                return Err(TunnelError::Fragment(
                    "data received while outbound fragments are pending".to_string(),
                ));
            }
            return Ok(Received::Fragment(self.next_fragment()));
        }

        if payload.flags.start() && payload.data.is_empty() {
            return Ok(Received::Fragment(self.start()));
        }

        let Some(flight) = self.inbound.push(payload)? else {
            debug!(
                session = %token,
                expected = self.inbound.expected_total(),
                "Waiting for more TLS fragments"
            );
            return Ok(Received::Fragment(TlsPayload::ack()));
        };

        if flight.is_empty() {
            return Ok(Received::Flight(Flight::default()));
        }

        if self.handle.is_none() {
            self.handle = Some(TunnelHandle::spawn(
                self.settings.server_config.clone(),
                self.method,
                self.settings.handshake_timeout,
                token.to_string(),
            )?);
        }
        let handle = self.handle.as_mut().ok_or(TunnelError::Closed)?;

        let outcome = match handle.feed(flight).await {
            Ok(outcome) => outcome,
            Err(TunnelError::Handshake { error, alert }) if !alert.is_empty() => {
                warn!(session = %token, error = %error, "TLS flight refused, sending alert");
                self.outbound.extend_from_slice(&alert);
                self.final_status = Status::Error;
                return Ok(Received::Flight(Flight::default()));
            }
            Err(e) => return Err(e),
        };
        self.outbound.extend_from_slice(&outcome.ciphertext);

        let mut established = false;
        if let Some(summary) = outcome.summary {
            debug!(
                session = %token,
                tls13 = summary.tls13,
                cipher_suite = ?summary.cipher_suite,
                server_name = ?summary.server_name,
                "TLS handshake complete"
            );
            self.summary = Some(summary);
            self.handshake_done = true;
            established = true;
        }

        Ok(Received::Flight(Flight {
            plaintext: outcome.plaintext,
            established,
        }))
    }

    /// Encrypt application data and append it to the outbound records
    pub async fn send_plaintext(&mut self, plaintext: Vec<u8>) -> Result<(), TunnelError> {
        let handle = self.handle.as_mut().ok_or(TunnelError::Closed)?;
        let records = handle.seal(plaintext).await?;
        self.outbound.extend_from_slice(&records);
        Ok(())
    }

    /// Next fragment to send; an empty fragment when nothing is pending
    pub fn next_fragment(&mut self) -> TlsPayload {
        if self.queue.is_empty() && !self.outbound.is_empty() {
            let flight = std::mem::take(&mut self.outbound);
            self.queue.load(&flight);
        }
        self.queue.next_fragment().unwrap_or_else(TlsPayload::ack)
    }

    /// True while records wait to be sent
    pub fn has_outbound(&self) -> bool {
        !self.queue.is_empty() || !self.outbound.is_empty()
    }

    pub fn handshake_done(&self) -> bool {
        self.handshake_done
    }

    pub fn summary(&self) -> Option<&HandshakeSummary> {
        self.summary.as_ref()
    }

    pub fn final_status(&self) -> Status {
        self.final_status
    }

    pub fn set_final_status(&mut self, status: Status) {
        self.final_status = status;
    }
}
