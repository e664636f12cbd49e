//! EAP (Extensible Authentication Protocol) Support
//!
//! EAP packet structures as defined in RFC 3748 and EAP over RADIUS
//! as defined in RFC 3579.
//!
//! # EAP Packet Format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Code      |  Identifier   |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Type-Data ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Type-Data is decoded by the codec registered for the method type in a
//! [`PayloadRegistry`].

#[cfg(feature = "tls")]
pub mod certs;
pub mod extensions;
pub mod mschapv2;
mod payload;
mod registry;
pub mod tls;

pub use payload::Payload;
pub use registry::{MethodDescriptor, PayloadConstructor, PayloadRegistry};

use crate::attributes::{Attribute, AttributeType};
use crate::packet::Packet;
use thiserror::Error;

/// EAP packet code (first byte of EAP packet)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EapCode {
    Request = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

impl EapCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapCode::Request),
            2 => Some(EapCode::Response),
            3 => Some(EapCode::Success),
            4 => Some(EapCode::Failure),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Request and Response packets carry a Type field
    pub fn carries_type(self) -> bool {
        matches!(self, EapCode::Request | EapCode::Response)
    }
}

/// EAP method types handled by this crate (RFC 3748 and IANA registry)
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EapType {
    /// Identity (Type 1) - RFC 3748
    Identity = 1,
    /// Legacy Nak (Type 3) - RFC 3748
    /// Response only, sent in response to an unacceptable authentication type
    Nak = 3,
    /// Generic Token Card (Type 6) - RFC 3748
    Gtc = 6,
    /// EAP-TLS (Type 13) - RFC 5216
    Tls = 13,
    /// PEAP (Type 25) - draft-josefsson-pppext-eap-tls-eap
    Peap = 25,
    /// EAP-MSCHAPv2 (Type 26) - draft-kamath-pppext-eap-mschapv2
    MsChapV2 = 26,
    /// Extensions (Type 33) - carries the PEAP Result TLV
    Extensions = 33,
}

impl EapType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(EapType::Identity),
            3 => Some(EapType::Nak),
            6 => Some(EapType::Gtc),
            13 => Some(EapType::Tls),
            25 => Some(EapType::Peap),
            26 => Some(EapType::MsChapV2),
            33 => Some(EapType::Extensions),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for EapType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EapType::Identity => "Identity",
            EapType::Nak => "Legacy-Nak",
            EapType::Gtc => "GTC",
            EapType::Tls => "EAP-TLS",
            EapType::Peap => "PEAP",
            EapType::MsChapV2 => "MSCHAPv2",
            EapType::Extensions => "Extensions",
        };
        f.write_str(name)
    }
}

/// EAP-related errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EapError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Length field says {declared} bytes but packet has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Invalid EAP code: {0}")]
    InvalidCode(u8),

    #[error("Unsupported EAP method type: {0}")]
    UnsupportedMethodType(u8),

    #[error("Malformed {method} payload: {reason}")]
    InvalidPayload { method: EapType, reason: String },

    #[error("MSCHAPv2 reserved bytes are not zero")]
    ReservedBytesNotZero,

    #[error("Encoding error: {0}")]
    EncodingError(String),

    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    TlsError(String),

    #[cfg(feature = "tls")]
    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[cfg(feature = "tls")]
    #[error("IO error: {0}")]
    IoError(String),
}

impl EapError {
    pub(crate) fn payload(method: EapType, reason: impl Into<String>) -> Self {
        EapError::InvalidPayload {
            method,
            reason: reason.into(),
        }
    }
}

/// EAP packet
///
/// `length` is not stored: it is always derived from the encoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapPacket {
    pub code: EapCode,
    /// Identifier for matching requests and responses (0-255)
    pub identifier: u8,
    /// Method type (only present for Request/Response)
    pub method_type: Option<EapType>,
    pub payload: Option<Payload>,
}

impl EapPacket {
    /// EAP header length (code, identifier, length)
    pub const HEADER_LENGTH: usize = 4;

    pub fn new(
        code: EapCode,
        identifier: u8,
        method_type: Option<EapType>,
        payload: Option<Payload>,
    ) -> Self {
        EapPacket {
            code,
            identifier,
            method_type,
            payload,
        }
    }

    pub fn request(identifier: u8, method_type: EapType, payload: Payload) -> Self {
        Self::new(EapCode::Request, identifier, Some(method_type), Some(payload))
    }

    pub fn response(identifier: u8, method_type: EapType, payload: Payload) -> Self {
        Self::new(EapCode::Response, identifier, Some(method_type), Some(payload))
    }

    pub fn success(identifier: u8) -> Self {
        Self::new(EapCode::Success, identifier, None, None)
    }

    pub fn failure(identifier: u8) -> Self {
        Self::new(EapCode::Failure, identifier, None, None)
    }

    /// Parse an EAP packet, delegating Type-Data to the registry
    ///
    /// The Length field must equal `raw.len()` exactly.
    pub fn decode(raw: &[u8], registry: &PayloadRegistry) -> Result<Self, EapError> {
        if raw.len() < Self::HEADER_LENGTH {
            return Err(EapError::PacketTooShort {
                expected: Self::HEADER_LENGTH,
                actual: raw.len(),
            });
        }

        let code = EapCode::from_u8(raw[0]).ok_or(EapError::InvalidCode(raw[0]))?;
        let identifier = raw[1];
        let declared = u16::from_be_bytes([raw[2], raw[3]]) as usize;
        if declared != raw.len() {
            return Err(EapError::LengthMismatch {
                declared,
                actual: raw.len(),
            });
        }

        if !code.carries_type() || raw.len() == Self::HEADER_LENGTH {
            return Ok(Self::new(code, identifier, None, None));
        }

        let type_byte = raw[Self::HEADER_LENGTH];
        let descriptor = registry
            .lookup(type_byte)
            .ok_or(EapError::UnsupportedMethodType(type_byte))?;
        let method_type =
            EapType::from_u8(type_byte).ok_or(EapError::UnsupportedMethodType(type_byte))?;
        let payload = (descriptor.constructor)(&raw[Self::HEADER_LENGTH + 1..])?;

        Ok(Self::new(code, identifier, Some(method_type), Some(payload)))
    }

    /// Encode to bytes; the Length field is backfilled with the true total
    pub fn encode(&self) -> Result<Vec<u8>, EapError> {
        let mut bytes = vec![self.code.as_u8(), self.identifier, 0, 0];

        if let (Some(method_type), Some(payload)) = (self.method_type, &self.payload) {
            bytes.push(method_type.as_u8());
            bytes.extend_from_slice(&payload.encode());
        }

        let length = u16::try_from(bytes.len())
            .map_err(|_| EapError::EncodingError(format!("packet of {} bytes", bytes.len())))?;
        bytes[2..4].copy_from_slice(&length.to_be_bytes());
        Ok(bytes)
    }

    /// Identity string carried by an Identity packet
    pub fn identity(&self) -> Option<&str> {
        match &self.payload {
            Some(Payload::Identity(identity)) => Some(identity.as_str()),
            _ => None,
        }
    }
}

/// Split encoded EAP bytes into EAP-Message attributes (RFC 3579 Section 3.1)
pub fn eap_to_radius_attributes(eap_bytes: &[u8]) -> Result<Vec<Attribute>, EapError> {
    eap_bytes
        .chunks(Attribute::MAX_VALUE_LENGTH)
        .map(|chunk| {
            Attribute::new(AttributeType::EapMessage as u8, chunk.to_vec()).map_err(|e| {
                EapError::EncodingError(format!("Failed to create EAP-Message attribute: {}", e))
            })
        })
        .collect()
}

/// Concatenate all EAP-Message attributes of a RADIUS packet in order
///
/// Returns `None` when the packet carries no EAP-Message at all.
pub fn eap_bytes_from_radius_packet(radius_packet: &Packet) -> Option<Vec<u8>> {
    let chunks = radius_packet.find_all_attributes(AttributeType::EapMessage as u8);
    if chunks.is_empty() {
        return None;
    }
    Some(chunks.iter().flat_map(|a| a.value.iter().copied()).collect())
}

/// Add an encoded EAP packet to a RADIUS packet as EAP-Message attribute(s)
pub fn add_eap_to_radius_packet(radius_packet: &mut Packet, eap_bytes: &[u8]) -> Result<(), EapError> {
    for attr in eap_to_radius_attributes(eap_bytes)? {
        radius_packet.add_attribute(attr);
    }
    Ok(())
}
