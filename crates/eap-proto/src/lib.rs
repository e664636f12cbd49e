//! EAP over RADIUS wire formats
//!
//! This crate provides the protocol layer of an EAP authenticator as
//! defined in RFC 3748, RFC 3579 and RFC 2548.
//!
//! # Features
//!
//! - RADIUS packet and attribute encoding/decoding
//! - EAP packet codec with a pluggable payload registry
//! - EAP-TLS/PEAP fragment framing, EAP-MSCHAPv2 and PEAP Extensions payloads
//! - Message-Authenticator (HMAC-MD5) attach and verify
//! - Response Authenticator calculation
//! - MS-MPPE-Send-Key / MS-MPPE-Recv-Key encryption
//!
//! # Example
//!
//! ```rust
//! use eap_proto::{Code, EapPacket, EapType, Packet, PayloadRegistry};
//! use eap_proto::eap::{Payload, add_eap_to_radius_packet};
//! use eap_proto::message_auth::attach_integrity;
//!
//! let request = EapPacket::request(1, EapType::Identity, Payload::Identity(String::new()));
//! let bytes = request.encode().unwrap();
//! assert!(EapPacket::decode(&bytes, &PayloadRegistry::standard()).is_ok());
//!
//! let mut challenge = Packet::new(Code::AccessChallenge, 1, [0u8; 16]);
//! add_eap_to_radius_packet(&mut challenge, &bytes).unwrap();
//! attach_integrity(&mut challenge, b"secret").unwrap();
//! ```

pub mod attributes;
pub mod auth;
pub mod eap;
pub mod message_auth;
pub mod mppe;
pub mod packet;

pub use attributes::{Attribute, AttributeType, VendorAttribute};
pub use auth::{
    calculate_response_authenticator, generate_request_authenticator,
    verify_response_authenticator,
};
pub use eap::{EapCode, EapError, EapPacket, EapType, Payload, PayloadRegistry};
pub use message_auth::{
    IntegrityError, attach_integrity, calculate_message_authenticator, verify_integrity,
    verify_message_authenticator,
};
pub use mppe::mppe_key_attributes;
pub use packet::{Code, Packet, PacketError};
