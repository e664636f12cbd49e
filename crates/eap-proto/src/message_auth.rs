//! Message-Authenticator Support (RFC 3579 Section 3.2)
//!
//! Message-Authenticator provides per-packet integrity using HMAC-MD5 keyed
//! with the RADIUS shared secret. It is mandatory on every packet that
//! carries EAP-Message.
//!
//! The digest is computed over the entire RADIUS packet with:
//! - the Request Authenticator in the authenticator field (for replies too)
//! - the Message-Authenticator value set to all zeros during calculation

use crate::attributes::{Attribute, AttributeType};
use crate::packet::{Packet, PacketError};
use hmac::{Hmac, Mac};
use md5_digest::Md5;
use thiserror::Error;

type HmacMd5 = Hmac<Md5>;

/// Length of the Message-Authenticator value
pub const MESSAGE_AUTHENTICATOR_LENGTH: usize = 16;

#[derive(Error, Debug)]
pub enum IntegrityError {
    #[error("Message-Authenticator attribute missing")]
    Missing,
    #[error("Message-Authenticator has invalid length {0}")]
    InvalidLength(usize),
    #[error("Message-Authenticator mismatch")]
    Mismatch,
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),
}

fn keyed_digest(secret: &[u8]) -> HmacMd5 {
    // HMAC accepts keys of any length
    match HmacMd5::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-MD5 rejects no key length"),
    }
}

/// Calculate Message-Authenticator for serialized packet bytes
///
/// `packet_bytes` must already carry a zeroed Message-Authenticator value.
pub fn calculate_message_authenticator(packet_bytes: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut mac = keyed_digest(secret);
    mac.update(packet_bytes);
    mac.finalize().into_bytes().into()
}

/// Verify Message-Authenticator in serialized packet bytes
///
/// `message_auth_offset` is the byte offset of the 16-byte value (after type+length).
pub fn verify_message_authenticator(
    packet_bytes: &[u8],
    secret: &[u8],
    message_auth_offset: usize,
) -> bool {
    let end = message_auth_offset + MESSAGE_AUTHENTICATOR_LENGTH;
    if end > packet_bytes.len() {
        return false;
    }

    let mut zeroed = packet_bytes.to_vec();
    zeroed[message_auth_offset..end].fill(0);

    let mut mac = keyed_digest(secret);
    mac.update(&zeroed);
    mac.verify_slice(&packet_bytes[message_auth_offset..end]).is_ok()
}

/// Attach (or refresh) the Message-Authenticator of `packet`
///
/// Must be the last mutation before the Response Authenticator is computed
/// and the packet is sent: any later attribute change invalidates it.
pub fn attach_integrity(packet: &mut Packet, secret: &[u8]) -> Result<(), IntegrityError> {
    let attr_type = AttributeType::MessageAuthenticator as u8;
    match packet.find_attribute_mut(attr_type) {
        Some(attr) => attr.value = vec![0u8; MESSAGE_AUTHENTICATOR_LENGTH],
        None => packet.add_attribute(Attribute::new(
            attr_type,
            vec![0u8; MESSAGE_AUTHENTICATOR_LENGTH],
        )?),
    }

    let digest = calculate_message_authenticator(&packet.encode()?, secret);
    if let Some(attr) = packet.find_attribute_mut(attr_type) {
        attr.value = digest.to_vec();
    }
    Ok(())
}

/// Verify the Message-Authenticator of a decoded packet
///
/// For replies, the caller must first put the Request Authenticator back
/// into `packet.authenticator`.
pub fn verify_integrity(packet: &Packet, secret: &[u8]) -> Result<(), IntegrityError> {
    let attr_type = AttributeType::MessageAuthenticator as u8;
    let received = packet
        .find_attribute(attr_type)
        .ok_or(IntegrityError::Missing)?;
    if received.value.len() != MESSAGE_AUTHENTICATOR_LENGTH {
        return Err(IntegrityError::InvalidLength(received.value.len()));
    }

    let mut zeroed = packet.clone();
    if let Some(attr) = zeroed.find_attribute_mut(attr_type) {
        attr.value.fill(0);
    }

    let mut mac = keyed_digest(secret);
    mac.update(&zeroed.encode()?);
    mac.verify_slice(&received.value)
        .map_err(|_| IntegrityError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Code;

    fn sample_packet() -> Packet {
        let mut packet = Packet::new(Code::AccessRequest, 9, [0x5A; 16]);
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice").unwrap());
        packet.add_attribute(Attribute::new(AttributeType::EapMessage as u8, vec![2, 9, 0, 10, 1, b'a', b'l', b'i', b'c', b'e']).unwrap());
        packet
    }

    #[test]
    fn test_calculate_message_authenticator() {
        let packet = vec![0u8; 20];
        let secret = b"testing123";

        let auth = calculate_message_authenticator(&packet, secret);
        assert_eq!(auth, calculate_message_authenticator(&packet, secret));
        assert_ne!(auth, calculate_message_authenticator(&packet, b"other"));
    }

    #[test]
    fn test_verify_message_authenticator_offsets() {
        let mut packet = vec![0u8; 40];
        let secret = b"testing123";

        let auth = calculate_message_authenticator(&packet, secret);
        packet[20..36].copy_from_slice(&auth);

        assert!(verify_message_authenticator(&packet, secret, 20));
        assert!(!verify_message_authenticator(&packet, b"secret2", 20));
        assert!(!verify_message_authenticator(&packet, secret, 100));
    }

    #[test]
    fn test_attach_integrity_then_verify() {
        let mut packet = sample_packet();
        attach_integrity(&mut packet, b"testing123").unwrap();

        let attrs = packet.find_all_attributes(AttributeType::MessageAuthenticator as u8);
        assert_eq!(attrs.len(), 1);
        assert!(verify_integrity(&packet, b"testing123").is_ok());
    }

    #[test]
    fn test_attach_integrity_is_idempotent() {
        let mut packet = sample_packet();
        attach_integrity(&mut packet, b"testing123").unwrap();
        let first = packet.clone();

        attach_integrity(&mut packet, b"testing123").unwrap();
        assert_eq!(packet, first);
    }

    #[test]
    fn test_any_bit_flip_invalidates() {
        let mut packet = sample_packet();
        let secret = b"testing123";
        attach_integrity(&mut packet, secret).unwrap();
        let encoded = packet.encode().unwrap();

        for byte in 0..encoded.len() {
            for bit in 0..8 {
                let mut mutated = encoded.clone();
                mutated[byte] ^= 1 << bit;
                let verdict = match Packet::decode(&mutated) {
                    Ok(decoded) => verify_integrity(&decoded, secret),
                    Err(e) => Err(IntegrityError::Packet(e)),
                };
                assert!(verdict.is_err(), "flip at byte {byte} bit {bit} went undetected");
            }
        }
    }

    #[test]
    fn test_verify_integrity_missing() {
        assert!(matches!(
            verify_integrity(&sample_packet(), b"x"),
            Err(IntegrityError::Missing)
        ));
    }
}
