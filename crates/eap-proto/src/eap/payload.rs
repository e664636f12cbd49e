use super::extensions::{self, Tlv};
use super::mschapv2::MsChapV2Packet;
use super::tls::TlsPayload;
use super::{EapError, EapType};

/// Decoded Type-Data of an EAP Request/Response
///
/// PEAP and EAP-TLS share the [`TlsPayload`] framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Identity string (RFC 3748 Section 5.1)
    Identity(String),
    /// Desired authentication types of a Legacy Nak (RFC 3748 Section 5.3.1)
    Nak(Vec<u8>),
    /// Free-form GTC challenge or response
    Gtc(Vec<u8>),
    Tls(TlsPayload),
    MsChapV2(MsChapV2Packet),
    Extensions(Vec<Tlv>),
}

impl Payload {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Identity(identity) => identity.as_bytes().to_vec(),
            Payload::Nak(desired) | Payload::Gtc(desired) => desired.clone(),
            Payload::Tls(tls) => tls.encode(),
            Payload::MsChapV2(packet) => packet.encode(),
            Payload::Extensions(tlvs) => extensions::encode_tlvs(tlvs),
        }
    }

    pub fn decode_identity(data: &[u8]) -> Result<Self, EapError> {
        String::from_utf8(data.to_vec())
            .map(Payload::Identity)
            .map_err(|e| EapError::payload(EapType::Identity, e.to_string()))
    }

    pub fn decode_nak(data: &[u8]) -> Result<Self, EapError> {
        if data.is_empty() {
            return Err(EapError::payload(EapType::Nak, "no desired type"));
        }
        Ok(Payload::Nak(data.to_vec()))
    }

    pub fn decode_gtc(data: &[u8]) -> Result<Self, EapError> {
        Ok(Payload::Gtc(data.to_vec()))
    }

    pub fn decode_tls(data: &[u8]) -> Result<Self, EapError> {
        TlsPayload::decode(data).map(Payload::Tls)
    }

    pub fn decode_mschapv2(data: &[u8]) -> Result<Self, EapError> {
        MsChapV2Packet::decode(data).map(Payload::MsChapV2)
    }

    pub fn decode_extensions(data: &[u8]) -> Result<Self, EapError> {
        extensions::decode_tlvs(data).map(Payload::Extensions)
    }
}
