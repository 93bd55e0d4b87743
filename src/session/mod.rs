//! Container sessions.
//!
//! A [`ReadSession`] or [`WriteSession`] only exists once keys are recovered
//! and the header has been exchanged, so record operations cannot run in any
//! other state. Closing consumes the session; dropping an unclosed write
//! session emits nothing.

mod read;
mod write;

pub use read::ReadSession;
pub use write::{WriteOptions, WriteSession};

use hmac::Mac;
use tracing::debug;

use crate::crypto::{BLOCK_LEN, CipherSelector, NONCE_LEN, hmac_sha256};
use crate::error::{Error, Result};
use crate::format::{self, CURRENT_VERSION, SIGNATURE_LEN, TRAILER_LEN};
use crate::keyblock::KeyPair;
use crate::ring::{KeyRing, ParsedRing, Recovered};

const IV_LABEL: &[u8] = b"passvault-iv";

/// CBC starting block for a session, bound to the container nonce.
pub(crate) fn session_iv(nonce: &[u8; NONCE_LEN], keys: &KeyPair) -> [u8; BLOCK_LEN] {
    let mut mac = hmac_sha256(keys.auth_key());
    mac.update(IV_LABEL);
    mac.update(nonce);
    let digest = mac.finalize().into_bytes();

    let mut iv = [0u8; BLOCK_LEN];
    iv.copy_from_slice(&digest[..BLOCK_LEN]);
    iv
}

pub(crate) struct Unlocked {
    pub cipher: CipherSelector,
    pub parsed: ParsedRing,
    pub recovered: Recovered,
}

impl Unlocked {
    /// Offset of the first header frame.
    pub fn stream_start(&self) -> usize {
        SIGNATURE_LEN + self.parsed.len
    }
}

/// Signature check, sanity check and key recovery; no record is decrypted.
pub(crate) fn unlock(data: &[u8], passphrase: &str) -> Result<Unlocked> {
    let cipher = format::sanity_check(data)?;
    let limit = data.len() - TRAILER_LEN - BLOCK_LEN;
    // The file length is already known good; a missing marker means the
    // key area itself is damaged.
    let parsed = KeyRing::parse(&data[SIGNATURE_LEN..limit]).map_err(|e| {
        debug!(error = %e, "end of key blocks not found");
        Error::WrongPassword
    })?;
    debug!(?cipher, blocks = parsed.ring.len(), "parsed key blocks");

    let recovered = parsed.ring.recover(
        passphrase,
        cipher,
        CURRENT_VERSION.tag_extension(),
        &parsed.nonce,
        &parsed.marker,
    )?;

    Ok(Unlocked {
        cipher,
        parsed,
        recovered,
    })
}

/// Verify `passphrase` against a container image without opening a session.
///
/// Returns the iteration count of the key block that accepted it.
pub fn check_passkey(data: &[u8], passphrase: &str) -> Result<u32> {
    let unlocked = unlock(data, passphrase)?;
    Ok(unlocked.recovered.iterations)
}
