//! Inbound reassembly and outbound chunking of TLS records carried in
//! EAP-TLS/PEAP fragments

use super::TunnelError;
use eap_proto::eap::tls::{TlsFlags, TlsPayload};
use std::collections::VecDeque;

/// Collects a multi-fragment TLS message from the peer
#[derive(Debug, Clone, Default)]
pub struct Reassembly {
    buffer: Vec<u8>,
    /// Announced total length; 0 when not fragmenting
    expected_total: usize,
    written: usize,
}

impl Reassembly {
    /// Append one fragment; returns the full message once it is complete
    pub fn push(&mut self, payload: &TlsPayload) -> Result<Option<Vec<u8>>, TunnelError> {
        if let Some(total) = payload.message_length
            && self.expected_total == 0
        {
            self.expected_total = total as usize;
        }

        self.buffer.extend_from_slice(&payload.data);
        self.written += payload.data.len();

        if self.expected_total > 0 && self.written > self.expected_total {
            let error = TunnelError::Fragment(format!(
                "received {} bytes, {} announced",
                self.written, self.expected_total
            ));
            *self = Self::default();
            return Err(error);
        }

        if payload.flags.more_fragments() || self.written < self.expected_total {
            return Ok(None);
        }

        let message = std::mem::take(&mut self.buffer);
        *self = Self::default();
        Ok(Some(message))
    }

    pub fn in_progress(&self) -> bool {
        self.written > 0
    }

    pub fn expected_total(&self) -> usize {
        self.expected_total
    }
}

/// Fragments of one outbound TLS flight still to be sent
#[derive(Debug, Clone)]
pub struct OutboundQueue {
    max_fragment: usize,
    chunks: VecDeque<Vec<u8>>,
    /// Length announced on the first fragment
    total: usize,
    first_sent: bool,
}

impl OutboundQueue {
    pub fn new(max_fragment: usize) -> Self {
        OutboundQueue {
            max_fragment: max_fragment.max(1),
            chunks: VecDeque::new(),
            total: 0,
            first_sent: false,
        }
    }

    /// Split a flight into fragments no larger than the configured size
    pub fn load(&mut self, flight: &[u8]) {
        self.chunks = flight
            .chunks(self.max_fragment)
            .map(<[u8]>::to_vec)
            .collect();
        self.total = flight.len();
        self.first_sent = false;
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Dequeue the next fragment
    ///
    /// The first fragment announces the total length. Every fragment but the
    /// last carries the M flag; the queue is cleared with the last one.
    pub fn next_fragment(&mut self) -> Option<TlsPayload> {
        let data = self.chunks.pop_front()?;
        let more = !self.chunks.is_empty();
        let first = !self.first_sent;
        self.first_sent = true;

        let payload = if first {
            TlsPayload::new(
                TlsFlags::new(true, more, false),
                Some(self.total as u32),
                data,
            )
        } else {
            TlsPayload::new(TlsFlags::new(false, more, false), None, data)
        };

        if !more {
            self.total = 0;
            self.first_sent = false;
        }
        Some(payload)
    }
}
