//! Passphrase stretching.
//!
//! ```text
//! h_0     = SHA-256(passphrase || salt)
//! h_{i+1} = SHA-256(h_i)                      for `iterations` rounds
//! out_j   = SHA-256(h_N || DISCRIMINATOR || j as u32 BE)
//! tag     = (out_0 || out_1 || ...)[..out_len]
//! ```

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use super::DIGEST_LEN;

const DISCRIMINATOR: &[u8] = b"passvault-stretch";

/// How a stretched digest is expanded past one SHA-256 width.
///
/// Stored implicitly by the format version; a future format may pick a
/// different rule without touching the iteration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TagExtension {
    /// One discriminated hash per 32 byte output block, indexed by a counter.
    CounterV1,
}

/// Stretch `passphrase` into `out_len` bytes of key material.
///
/// `iterations` must be at least 1; zero is a caller bug.
pub fn stretch(
    salt: &[u8],
    passphrase: &str,
    iterations: u32,
    out_len: usize,
    extension: TagExtension,
) -> Zeroizing<Vec<u8>> {
    debug_assert!(iterations >= 1, "stretch called with zero iterations");

    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(salt);
    let mut state: [u8; DIGEST_LEN] = hasher.finalize().into();

    for _ in 0..iterations {
        let next: [u8; DIGEST_LEN] = Sha256::digest(state).into();
        state.zeroize();
        state = next;
    }

    let mut out = Zeroizing::new(Vec::with_capacity(out_len.next_multiple_of(DIGEST_LEN)));
    match extension {
        TagExtension::CounterV1 => {
            let mut counter: u32 = 0;
            while out.len() < out_len {
                let mut block: [u8; DIGEST_LEN] = Sha256::new()
                    .chain_update(state)
                    .chain_update(DISCRIMINATOR)
                    .chain_update(counter.to_be_bytes())
                    .finalize()
                    .into();
                out.extend_from_slice(&block);
                block.zeroize();
                counter = counter.wrapping_add(1);
            }
        }
    }
    out.truncate(out_len);
    state.zeroize();

    out
}
