//! EAP-TLV / Extensions payload used to close a PEAPv0 tunnel
//!
//! ```text
//! |M|R|   TLV Type (14 bits)  |        Length         |  Value ...
//! ```

use super::{EapError, EapType};

/// Result TLV type
pub const RESULT_TLV: u16 = 3;

const MANDATORY: u16 = 0x8000;
const TYPE_MASK: u16 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ResultCode {
    Success = 1,
    Failure = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub mandatory: bool,
    pub tlv_type: u16,
    pub value: Vec<u8>,
}

impl Tlv {
    /// Mandatory Result TLV
    pub fn result(code: ResultCode) -> Self {
        Tlv {
            mandatory: true,
            tlv_type: RESULT_TLV,
            value: (code as u16).to_be_bytes().to_vec(),
        }
    }

    pub fn as_result(&self) -> Option<ResultCode> {
        if self.tlv_type != RESULT_TLV || self.value.len() != 2 {
            return None;
        }
        match u16::from_be_bytes([self.value[0], self.value[1]]) {
            1 => Some(ResultCode::Success),
            2 => Some(ResultCode::Failure),
            _ => None,
        }
    }
}

/// First Result TLV in a list
pub fn find_result(tlvs: &[Tlv]) -> Option<ResultCode> {
    tlvs.iter().find_map(Tlv::as_result)
}

pub fn decode_tlvs(mut data: &[u8]) -> Result<Vec<Tlv>, EapError> {
    let mut tlvs = Vec::new();
    while !data.is_empty() {
        if data.len() < 4 {
            return Err(EapError::payload(EapType::Extensions, "truncated TLV header"));
        }
        let header = u16::from_be_bytes([data[0], data[1]]);
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() < 4 + length {
            return Err(EapError::payload(
                EapType::Extensions,
                format!("TLV declares {} bytes, {} available", length, data.len() - 4),
            ));
        }

        tlvs.push(Tlv {
            mandatory: header & MANDATORY != 0,
            tlv_type: header & TYPE_MASK,
            value: data[4..4 + length].to_vec(),
        });
        data = &data[4 + length..];
    }
    Ok(tlvs)
}

pub fn encode_tlvs(tlvs: &[Tlv]) -> Vec<u8> {
    let mut out = Vec::new();
    for tlv in tlvs {
        let mut header = tlv.tlv_type & TYPE_MASK;
        if tlv.mandatory {
            header |= MANDATORY;
        }
        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(&(tlv.value.len() as u16).to_be_bytes());
        out.extend_from_slice(&tlv.value);
    }
    out
}
