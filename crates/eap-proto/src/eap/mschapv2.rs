//! EAP-MSCHAPv2 (draft-kamath-pppext-eap-mschapv2) framing and the
//! MS-CHAP-V2 cryptography of RFC 2759 and RFC 3079.
//!
//! ```text
//! | OpCode | MS-CHAPv2-ID | MS-Length (2) | Data ...
//! ```

use super::{EapError, EapType};
use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};
use md4::{Digest, Md4};
use sha1::Sha1;

pub const CHALLENGE_LENGTH: usize = 16;
pub const NT_RESPONSE_LENGTH: usize = 24;
/// Peer challenge, reserved, NT-Response and flags
pub const RESPONSE_VALUE_LENGTH: usize = 49;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Challenge = 1,
    Response = 2,
    Success = 3,
    Failure = 4,
}

/// The 49-byte Response value sent by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsChapV2Response {
    pub peer_challenge: [u8; CHALLENGE_LENGTH],
    pub nt_response: [u8; NT_RESPONSE_LENGTH],
    pub flags: u8,
}

impl MsChapV2Response {
    pub fn encode(&self) -> [u8; RESPONSE_VALUE_LENGTH] {
        let mut value = [0u8; RESPONSE_VALUE_LENGTH];
        value[..16].copy_from_slice(&self.peer_challenge);
        value[24..48].copy_from_slice(&self.nt_response);
        value[48] = self.flags;
        value
    }
}

/// Parse a Response value: challenge(16) reserved(8, zero) nt-response(24) flags(1)
pub fn parse_response(value: &[u8]) -> Result<MsChapV2Response, EapError> {
    if value.len() != RESPONSE_VALUE_LENGTH {
        return Err(EapError::payload(
            EapType::MsChapV2,
            format!("response value is {} bytes, expected 49", value.len()),
        ));
    }
    if value[16..24].iter().any(|b| *b != 0) {
        return Err(EapError::ReservedBytesNotZero);
    }

    let mut response = MsChapV2Response {
        peer_challenge: [0u8; CHALLENGE_LENGTH],
        nt_response: [0u8; NT_RESPONSE_LENGTH],
        flags: value[48],
    };
    response.peer_challenge.copy_from_slice(&value[..16]);
    response.nt_response.copy_from_slice(&value[24..48]);
    Ok(response)
}

/// One EAP-MSCHAPv2 packet
///
/// Success and Failure are multi-byte requests from the authenticator and
/// single-byte acknowledgements from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsChapV2Packet {
    Challenge {
        ms_id: u8,
        challenge: [u8; CHALLENGE_LENGTH],
        name: String,
    },
    Response {
        ms_id: u8,
        response: MsChapV2Response,
        name: String,
    },
    /// Carries the authenticator response string (`S=<40 hex>`)
    SuccessRequest { ms_id: u8, message: String },
    SuccessResponse,
    FailureRequest { ms_id: u8, message: String },
    FailureResponse,
}

fn utf8(bytes: &[u8]) -> Result<String, EapError> {
    String::from_utf8(bytes.to_vec()).map_err(|e| EapError::payload(EapType::MsChapV2, e.to_string()))
}

impl MsChapV2Packet {
    pub fn op_code(&self) -> OpCode {
        match self {
            MsChapV2Packet::Challenge { .. } => OpCode::Challenge,
            MsChapV2Packet::Response { .. } => OpCode::Response,
            MsChapV2Packet::SuccessRequest { .. } | MsChapV2Packet::SuccessResponse => {
                OpCode::Success
            }
            MsChapV2Packet::FailureRequest { .. } | MsChapV2Packet::FailureResponse => {
                OpCode::Failure
            }
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self, EapError> {
        let (&op_code, _) = data
            .split_first()
            .ok_or_else(|| EapError::payload(EapType::MsChapV2, "empty payload"))?;

        // Peer acknowledgements are a bare op-code
        if data.len() == 1 {
            return match op_code {
                3 => Ok(MsChapV2Packet::SuccessResponse),
                4 => Ok(MsChapV2Packet::FailureResponse),
                other => Err(EapError::payload(
                    EapType::MsChapV2,
                    format!("op-code {} without body", other),
                )),
            };
        }

        if data.len() < 4 {
            return Err(EapError::payload(EapType::MsChapV2, "truncated header"));
        }
        let ms_id = data[1];
        let body = &data[4..];

        match op_code {
            1 | 2 => {
                let (&value_size, rest) = body
                    .split_first()
                    .ok_or_else(|| EapError::payload(EapType::MsChapV2, "missing value size"))?;
                let value_size = value_size as usize;
                if rest.len() < value_size {
                    return Err(EapError::payload(
                        EapType::MsChapV2,
                        format!("value size {} exceeds {} bytes", value_size, rest.len()),
                    ));
                }
                let (value, name) = rest.split_at(value_size);
                let name = utf8(name)?;

                if op_code == 1 {
                    let challenge: [u8; CHALLENGE_LENGTH] = value.try_into().map_err(|_| {
                        EapError::payload(EapType::MsChapV2, "challenge must be 16 bytes")
                    })?;
                    Ok(MsChapV2Packet::Challenge {
                        ms_id,
                        challenge,
                        name,
                    })
                } else {
                    Ok(MsChapV2Packet::Response {
                        ms_id,
                        response: parse_response(value)?,
                        name,
                    })
                }
            }
            3 => Ok(MsChapV2Packet::SuccessRequest {
                ms_id,
                message: utf8(body)?,
            }),
            4 => Ok(MsChapV2Packet::FailureRequest {
                ms_id,
                message: utf8(body)?,
            }),
            other => Err(EapError::payload(
                EapType::MsChapV2,
                format!("unsupported op-code {}", other),
            )),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (ms_id, body) = match self {
            MsChapV2Packet::SuccessResponse | MsChapV2Packet::FailureResponse => {
                return vec![self.op_code() as u8];
            }
            MsChapV2Packet::Challenge {
                ms_id,
                challenge,
                name,
            } => {
                let mut body = vec![CHALLENGE_LENGTH as u8];
                body.extend_from_slice(challenge);
                body.extend_from_slice(name.as_bytes());
                (*ms_id, body)
            }
            MsChapV2Packet::Response {
                ms_id,
                response,
                name,
            } => {
                let mut body = vec![RESPONSE_VALUE_LENGTH as u8];
                body.extend_from_slice(&response.encode());
                body.extend_from_slice(name.as_bytes());
                (*ms_id, body)
            }
            MsChapV2Packet::SuccessRequest { ms_id, message }
            | MsChapV2Packet::FailureRequest { ms_id, message } => {
                (*ms_id, message.as_bytes().to_vec())
            }
        };

        let ms_length = (4 + body.len()) as u16;
        let mut out = vec![self.op_code() as u8, ms_id];
        out.extend_from_slice(&ms_length.to_be_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// NtPasswordHash: MD4 over the UTF-16LE password (RFC 2759 Section 8.3)
pub fn nt_password_hash(password: &str) -> [u8; 16] {
    let unicode: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
    md4(&unicode)
}

/// HashNtPasswordHash (RFC 2759 Section 8.4)
pub fn hash_nt_password_hash(password_hash: &[u8; 16]) -> [u8; 16] {
    md4(password_hash)
}

fn md4(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md4::digest(data));
    out
}

/// ChallengeHash (RFC 2759 Section 8.2)
pub fn challenge_hash(
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    authenticator_challenge: &[u8; CHALLENGE_LENGTH],
    username: &str,
) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(authenticator_challenge);
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();

    let mut challenge = [0u8; 8];
    challenge.copy_from_slice(&digest[..8]);
    challenge
}

/// Expand a 7-byte key to a DES key with parity bits
fn des_key(key: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0] = key[0];
    for i in 1..7 {
        out[i] = (key[i - 1] << (8 - i)) | (key[i] >> i);
    }
    out[7] = key[6] << 1;

    for byte in out.iter_mut() {
        *byte &= 0xFE;
        if byte.count_ones() % 2 == 0 {
            *byte |= 1;
        }
    }
    out
}

fn des_encrypt(key: &[u8], clear: &[u8; 8]) -> [u8; 8] {
    let cipher = Des::new(GenericArray::from_slice(&des_key(key)));
    let mut block = GenericArray::clone_from_slice(clear);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; 8];
    out.copy_from_slice(&block);
    out
}

/// ChallengeResponse (RFC 2759 Section 8.5)
pub fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; NT_RESPONSE_LENGTH] {
    let mut zpassword = [0u8; 21];
    zpassword[..16].copy_from_slice(password_hash);

    let mut response = [0u8; NT_RESPONSE_LENGTH];
    for (i, key) in zpassword.chunks(7).enumerate() {
        response[i * 8..i * 8 + 8].copy_from_slice(&des_encrypt(key, challenge));
    }
    response
}

/// GenerateNTResponse (RFC 2759 Section 8.1)
pub fn generate_nt_response(
    authenticator_challenge: &[u8; CHALLENGE_LENGTH],
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    username: &str,
    password_hash: &[u8; 16],
) -> [u8; NT_RESPONSE_LENGTH] {
    let challenge = challenge_hash(peer_challenge, authenticator_challenge, username);
    challenge_response(&challenge, password_hash)
}

const AUTH_MAGIC_1: &[u8; 39] = b"Magic server to client signing constant";
const AUTH_MAGIC_2: &[u8; 41] = b"Pad to make it do more than one iteration";

/// GenerateAuthenticatorResponse (RFC 2759 Section 8.7), formatted `S=<40 hex>`
pub fn generate_authenticator_response(
    password_hash: &[u8; 16],
    nt_response: &[u8; NT_RESPONSE_LENGTH],
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    authenticator_challenge: &[u8; CHALLENGE_LENGTH],
    username: &str,
) -> String {
    let mut hasher = Sha1::new();
    hasher.update(hash_nt_password_hash(password_hash));
    hasher.update(nt_response);
    hasher.update(AUTH_MAGIC_1);
    let digest = hasher.finalize();

    let challenge = challenge_hash(peer_challenge, authenticator_challenge, username);
    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(challenge);
    hasher.update(AUTH_MAGIC_2);

    format!("S={}", hex::encode_upper(hasher.finalize()))
}

const MASTER_MAGIC: &[u8; 27] = b"This is the MPPE Master Key";
const CLIENT_SEND_MAGIC: &[u8; 84] =
    b"On the client side, this is the send key; on the server side, it is the receive key.";
const CLIENT_RECEIVE_MAGIC: &[u8; 84] =
    b"On the client side, this is the receive key; on the server side, it is the send key.";

/// GetMasterKey (RFC 3079 Section 3.4)
pub fn master_key(password_hash_hash: &[u8; 16], nt_response: &[u8; NT_RESPONSE_LENGTH]) -> [u8; 16] {
    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MASTER_MAGIC);
    let digest = hasher.finalize();

    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    key
}

/// GetAsymmetricStartKey (RFC 3079 Section 3.4), for keys up to 20 bytes
pub fn asymmetric_start_key(master_key: &[u8; 16], length: usize, is_send: bool, is_server: bool) -> Vec<u8> {
    let magic = if is_send == is_server {
        CLIENT_RECEIVE_MAGIC
    } else {
        CLIENT_SEND_MAGIC
    };

    let mut hasher = Sha1::new();
    hasher.update(master_key);
    hasher.update([0u8; 40]);
    hasher.update(magic);
    hasher.update([0xF2u8; 40]);
    let digest = hasher.finalize();
    digest[..length.min(digest.len())].to_vec()
}

/// Length of the RFC 3079 128-bit MPPE session keys
pub const MPPE_KEY_LENGTH: usize = 16;

/// Authenticator-side MSK laid out as two 32-byte halves
///
/// ```text
/// | MasterReceiveKey (16) | zero (16) | MasterSendKey (16) | zero (16) |
/// ```
///
/// The first half is the MS-MPPE-Recv-Key, the second the MS-MPPE-Send-Key.
pub fn session_key_material(password_hash: &[u8; 16], nt_response: &[u8; NT_RESPONSE_LENGTH]) -> [u8; 64] {
    let master = master_key(&hash_nt_password_hash(password_hash), nt_response);
    let mut msk = [0u8; 64];
    msk[..MPPE_KEY_LENGTH].copy_from_slice(&asymmetric_start_key(&master, MPPE_KEY_LENGTH, false, true));
    msk[32..32 + MPPE_KEY_LENGTH]
        .copy_from_slice(&asymmetric_start_key(&master, MPPE_KEY_LENGTH, true, true));
    msk
}
