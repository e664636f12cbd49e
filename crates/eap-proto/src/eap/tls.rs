//! EAP-TLS / PEAP fragment framing (RFC 5216 Section 3.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Flags     |      TLS Message Length (only when L is set)
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               |     TLS Data...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::{EapError, EapType};

/// EAP-TLS flags (first byte of Type-Data)
///
/// ```text
///  0 1 2 3 4 5 6 7
/// +-+-+-+-+-+-+-+-+
/// |L M S R R V V V|
/// +-+-+-+-+-+-+-+-+
/// ```
///
/// The low three bits carry the PEAP version; they are zero for EAP-TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsFlags(u8);

impl TlsFlags {
    /// Length included flag (L bit)
    pub const LENGTH_INCLUDED: u8 = 0x80;
    /// More fragments flag (M bit)
    pub const MORE_FRAGMENTS: u8 = 0x40;
    /// Start flag (S bit)
    pub const START: u8 = 0x20;
    const VERSION_MASK: u8 = 0x07;

    pub fn new(length_included: bool, more_fragments: bool, start: bool) -> Self {
        let mut flags = 0u8;
        if length_included {
            flags |= Self::LENGTH_INCLUDED;
        }
        if more_fragments {
            flags |= Self::MORE_FRAGMENTS;
        }
        if start {
            flags |= Self::START;
        }
        TlsFlags(flags)
    }

    /// Create from raw byte; reserved bits are dropped
    pub fn from_u8(value: u8) -> Self {
        TlsFlags(value & 0xE7)
    }

    pub fn as_u8(self) -> u8 {
        self.0
    }

    pub fn length_included(self) -> bool {
        (self.0 & Self::LENGTH_INCLUDED) != 0
    }

    pub fn more_fragments(self) -> bool {
        (self.0 & Self::MORE_FRAGMENTS) != 0
    }

    pub fn start(self) -> bool {
        (self.0 & Self::START) != 0
    }

    pub fn version(self) -> u8 {
        self.0 & Self::VERSION_MASK
    }

    pub fn with_version(self, version: u8) -> Self {
        TlsFlags((self.0 & !Self::VERSION_MASK) | (version & Self::VERSION_MASK))
    }
}

/// One EAP-TLS/PEAP fragment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsPayload {
    pub flags: TlsFlags,
    /// Total TLS message length; present exactly when the L flag is set
    pub message_length: Option<u32>,
    pub data: Vec<u8>,
}

impl TlsPayload {
    pub fn new(flags: TlsFlags, message_length: Option<u32>, data: Vec<u8>) -> Self {
        TlsPayload {
            flags,
            message_length,
            data,
        }
    }

    /// Start fragment: S flag, no data
    pub fn start() -> Self {
        Self::new(TlsFlags::new(false, false, true), None, Vec::new())
    }

    /// Empty fragment with no flags, used to request the next fragment
    pub fn ack() -> Self {
        Self::default()
    }

    /// True for a flag-less fragment without data
    pub fn is_ack(&self) -> bool {
        self.data.is_empty() && !self.flags.start() && !self.flags.more_fragments()
    }

    pub fn decode(data: &[u8]) -> Result<Self, EapError> {
        let (&first, rest) = data
            .split_first()
            .ok_or(EapError::PacketTooShort {
                expected: 1,
                actual: 0,
            })?;
        let flags = TlsFlags::from_u8(first);

        if !flags.length_included() {
            return Ok(Self::new(flags, None, rest.to_vec()));
        }

        if rest.len() < 4 {
            return Err(EapError::payload(
                EapType::Tls,
                format!("length flag set but only {} bytes follow", rest.len()),
            ));
        }
        let length = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        Ok(Self::new(flags, Some(length), rest[4..].to_vec()))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(5 + self.data.len());
        data.push(self.flags.as_u8());
        if let Some(length) = self.message_length {
            data.extend_from_slice(&length.to_be_bytes());
        }
        data.extend_from_slice(&self.data);
        data
    }
}
