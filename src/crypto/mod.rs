//! Cryptographic building blocks for the container.
//!
//! Provides key stretching, the block cipher selector, RFC 3394 key wrap and
//! the random sources used when sealing new containers.

pub mod cipher;
pub mod keywrap;
pub mod stretch;

pub use cipher::{BlockCipher, CipherSelector};
pub use stretch::{TagExtension, stretch};

use getrandom::fill;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

/// Length of a key block salt (32 bytes).
pub const SALT_LEN: usize = 32;
/// Length of the cipher key and of the authentication key (256 bits).
pub const KEY_LEN: usize = 32;
/// Length of a wrapped key: key plus the 8 byte integrity check.
pub const WRAPPED_KEY_LEN: usize = KEY_LEN + 8;
/// Length of the per-container nonce.
pub const NONCE_LEN: usize = 32;
/// Block size shared by Twofish and AES.
pub const BLOCK_LEN: usize = 16;
/// Output size of SHA-256, and therefore of the trailer HMAC.
pub const DIGEST_LEN: usize = 32;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Fill buffer with cryptographically secure random bytes
pub(crate) fn secure_random(buf: &mut [u8]) -> Result<()> {
    fill(buf).map_err(|_| Error::Random)
}

/// Generate salt
pub fn generate_salt() -> Result<[u8; SALT_LEN]> {
    let mut salt = [0u8; SALT_LEN];
    secure_random(&mut salt)?;
    Ok(salt)
}

/// Generate a fresh container nonce
pub fn generate_nonce() -> Result<[u8; NONCE_LEN]> {
    let mut nonce = [0u8; NONCE_LEN];
    secure_random(&mut nonce)?;
    Ok(nonce)
}

/// HMAC-SHA256 keyed with a 256-bit key.
pub(crate) fn hmac_sha256(key: &[u8; KEY_LEN]) -> HmacSha256 {
    let Ok(mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac
}

/// Compares two byte strings without an early exit on the first mismatch.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
