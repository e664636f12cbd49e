//! MS-MPPE-Send-Key / MS-MPPE-Recv-Key attributes (RFC 2548 Section 2.4)
//!
//! Keys are salt-encrypted with the shared secret and the Request
//! Authenticator of the Access-Request being answered:
//!
//! ```text
//! P    = key-length || key || zero padding to a multiple of 16
//! b(1) = MD5(secret || request-authenticator || salt)   c(1) = p(1) xor b(1)
//! b(i) = MD5(secret || c(i-1))                           c(i) = p(i) xor b(i)
//! ```

use crate::attributes::{Attribute, MICROSOFT_VENDOR_ID, MsVendorType, VendorAttribute};
use crate::packet::PacketError;
use rand::Rng;

const BLOCK: usize = 16;

/// Generate a salt with the mandatory high bit set
pub fn generate_salt() -> [u8; 2] {
    let mut salt = [0u8; 2];
    rand::rng().fill(&mut salt);
    salt[0] |= 0x80;
    salt
}

fn xor_chain(
    input: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; 16],
    salt: &[u8; 2],
    decrypting: bool,
) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    let mut seed = Vec::with_capacity(secret.len() + 18);
    seed.extend_from_slice(request_authenticator);
    seed.extend_from_slice(salt);

    for block in input.chunks(BLOCK) {
        let mut data = secret.to_vec();
        data.extend_from_slice(&seed);
        let b = md5::compute(&data);

        let c: Vec<u8> = block.iter().zip(b.0.iter()).map(|(p, k)| p ^ k).collect();
        // Chaining always uses the ciphertext block
        seed = if decrypting { block.to_vec() } else { c.clone() };
        output.extend_from_slice(&c);
    }
    output
}

/// Encrypt a key into the `salt || string` attribute value
pub fn encrypt_key(
    key: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; 16],
    salt: [u8; 2],
) -> Result<Vec<u8>, PacketError> {
    if key.len() > u8::MAX as usize {
        return Err(PacketError::AttributeError(format!(
            "MPPE key too long: {} bytes",
            key.len()
        )));
    }

    let mut plain = Vec::with_capacity(key.len() + BLOCK);
    plain.push(key.len() as u8);
    plain.extend_from_slice(key);
    plain.resize(plain.len().div_ceil(BLOCK) * BLOCK, 0);

    let mut value = salt.to_vec();
    value.extend(xor_chain(&plain, secret, request_authenticator, &salt, false));
    Ok(value)
}

/// Recover a key from an encrypted `salt || string` attribute value
pub fn decrypt_key(
    value: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; 16],
) -> Result<Vec<u8>, PacketError> {
    if value.len() < 2 + BLOCK || (value.len() - 2) % BLOCK != 0 {
        return Err(PacketError::AttributeError(format!(
            "Invalid MPPE key attribute length: {}",
            value.len()
        )));
    }

    let salt = [value[0], value[1]];
    let plain = xor_chain(&value[2..], secret, request_authenticator, &salt, true);
    let key_len = plain[0] as usize;
    if key_len + 1 > plain.len() {
        return Err(PacketError::AttributeError(format!(
            "MPPE key length {} exceeds payload",
            key_len
        )));
    }
    Ok(plain[1..1 + key_len].to_vec())
}

/// Build the MS-MPPE-Recv-Key and MS-MPPE-Send-Key vendor attributes
///
/// Each attribute gets its own salt.
pub fn mppe_key_attributes(
    recv_key: &[u8],
    send_key: &[u8],
    secret: &[u8],
    request_authenticator: &[u8; 16],
) -> Result<Vec<Attribute>, PacketError> {
    let recv_salt = generate_salt();
    let mut send_salt = generate_salt();
    if send_salt == recv_salt {
        send_salt[1] ^= 0x01;
    }

    let recv = VendorAttribute::new(
        MICROSOFT_VENDOR_ID,
        MsVendorType::MppeRecvKey as u8,
        encrypt_key(recv_key, secret, request_authenticator, recv_salt)?,
    );
    let send = VendorAttribute::new(
        MICROSOFT_VENDOR_ID,
        MsVendorType::MppeSendKey as u8,
        encrypt_key(send_key, secret, request_authenticator, send_salt)?,
    );

    Ok(vec![Attribute::vendor(&recv)?, Attribute::vendor(&send)?])
}
