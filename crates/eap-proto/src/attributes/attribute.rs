use super::AttributeType;
use crate::packet::PacketError;
use std::io::{Cursor, Read, Write};

/// RADIUS Attribute structure as defined in RFC 2865 Section 5
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |    Length     |  Value ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    /// Attribute value (0-253 bytes)
    pub value: Vec<u8>,
}

impl Attribute {
    /// Minimum attribute length (type + length fields = 2 bytes)
    pub const MIN_LENGTH: usize = 2;
    /// Maximum attribute length (255 bytes including type and length)
    pub const MAX_LENGTH: usize = 255;
    /// Maximum value length (253 bytes)
    pub const MAX_VALUE_LENGTH: usize = 253;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Attribute value too long: {} bytes (max {})",
                value.len(),
                Self::MAX_VALUE_LENGTH
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    /// Create a string attribute
    pub fn string(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// Create an integer attribute (32-bit big-endian)
    pub fn integer(attr_type: u8, value: u32) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_be_bytes().to_vec())
    }

    /// Wrap a vendor sub-attribute in a Vendor-Specific (26) attribute
    pub fn vendor(vsa: &VendorAttribute) -> Result<Self, PacketError> {
        Self::new(AttributeType::VendorSpecific as u8, vsa.encode()?)
    }

    /// Encode attribute to bytes
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let length = self.encoded_length();
        if length > Self::MAX_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Encoded attribute too long: {} bytes",
                length
            )));
        }

        let mut buffer = Vec::with_capacity(length);
        buffer.write_all(&[self.attr_type, length as u8])?;
        buffer.write_all(&self.value)?;

        Ok(buffer)
    }

    /// Decode attribute from bytes
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Attribute data too short: {} bytes",
                data.len()
            )));
        }

        let mut cursor = Cursor::new(data);
        let mut header = [0u8; 2];
        cursor.read_exact(&mut header)?;
        let attr_type = header[0];
        let length = header[1] as usize;

        if !(Self::MIN_LENGTH..=Self::MAX_LENGTH).contains(&length) {
            return Err(PacketError::AttributeError(format!(
                "Invalid attribute length: {}",
                length
            )));
        }

        if data.len() < length {
            return Err(PacketError::AttributeError(format!(
                "Insufficient data for attribute: expected {}, got {}",
                length,
                data.len()
            )));
        }

        let mut value = vec![0u8; length - Self::MIN_LENGTH];
        cursor.read_exact(&mut value)?;

        Ok(Attribute { attr_type, value })
    }

    /// Get the encoded length of this attribute
    pub fn encoded_length(&self) -> usize {
        Self::MIN_LENGTH + self.value.len()
    }

    /// Try to interpret value as a string
    pub fn as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.clone())
    }

    /// Try to interpret the value as a Vendor-Specific payload
    pub fn as_vendor(&self) -> Result<VendorAttribute, PacketError> {
        if self.attr_type != AttributeType::VendorSpecific as u8 {
            return Err(PacketError::AttributeError(format!(
                "Attribute {} is not Vendor-Specific",
                self.attr_type
            )));
        }
        VendorAttribute::decode(&self.value)
    }
}

/// A single vendor sub-attribute carried in Vendor-Specific (RFC 2865 Section 5.26)
///
/// ```text
/// | Vendor-Id (4) | Vendor type | Vendor length | Value ...
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAttribute {
    pub vendor_id: u32,
    pub vendor_type: u8,
    pub value: Vec<u8>,
}

impl VendorAttribute {
    const HEADER_LENGTH: usize = 6;

    pub fn new(vendor_id: u32, vendor_type: u8, value: Vec<u8>) -> Self {
        VendorAttribute {
            vendor_id,
            vendor_type,
            value,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let sub_length = 2 + self.value.len();
        if Self::HEADER_LENGTH + self.value.len() > Attribute::MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Vendor attribute too long: {} bytes",
                sub_length
            )));
        }

        let mut buffer = Vec::with_capacity(Self::HEADER_LENGTH + self.value.len());
        buffer.extend_from_slice(&self.vendor_id.to_be_bytes());
        buffer.push(self.vendor_type);
        buffer.push(sub_length as u8);
        buffer.extend_from_slice(&self.value);
        Ok(buffer)
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "Vendor attribute too short: {} bytes",
                data.len()
            )));
        }

        let vendor_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let vendor_type = data[4];
        let sub_length = data[5] as usize;
        if sub_length < 2 || 4 + sub_length > data.len() {
            return Err(PacketError::AttributeError(format!(
                "Invalid vendor attribute length: {}",
                sub_length
            )));
        }

        Ok(VendorAttribute {
            vendor_id,
            vendor_type,
            value: data[Self::HEADER_LENGTH..4 + sub_length].to_vec(),
        })
    }
}
