//! The key block ring and the end-of-keyblocks marker.
//!
//! A container carries one or more key blocks, each wrapping the same key
//! pair under its own salt, iteration count and possibly its own passphrase.
//! The blocks are followed by the container nonce and a two-part marker:
//! `SHA-256(nonce)` lets a reader find the end of the ring without keys, and
//! `HMAC(auth_key, SHA-256(nonce) || cipher_key)` confirms a recovered pair
//! belongs to this container.

use hmac::Mac;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::crypto::{CipherSelector, DIGEST_LEN, NONCE_LEN, TagExtension, ct_eq, hmac_sha256};
use crate::error::{Error, Result};
use crate::keyblock::{KeyBlock, KeyPair};

/// Lowest iteration count a key block may carry.
pub const MIN_HASH_ITERATIONS: u32 = 1;
/// Highest iteration count a key block may carry.
pub const MAX_HASH_ITERATIONS: u32 = 1 << 24;
/// Iterations used for new key blocks unless configured otherwise.
pub const DEFAULT_HASH_ITERATIONS: u32 = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndMarker {
    hashed_nonce: [u8; DIGEST_LEN],
    keyed: [u8; DIGEST_LEN],
}

impl EndMarker {
    pub const LEN: usize = 2 * DIGEST_LEN;

    pub fn compute(nonce: &[u8; NONCE_LEN], keys: &KeyPair) -> Self {
        let hashed_nonce: [u8; DIGEST_LEN] = Sha256::digest(nonce).into();
        let keyed = keyed_digest(&hashed_nonce, keys);
        Self {
            hashed_nonce,
            keyed,
        }
    }

    /// True when `keys` produced this marker for `nonce`.
    pub fn matches(&self, nonce: &[u8; NONCE_LEN], keys: &KeyPair) -> bool {
        let hashed_nonce: [u8; DIGEST_LEN] = Sha256::digest(nonce).into();
        let expected = keyed_digest(&hashed_nonce, keys);
        ct_eq(&hashed_nonce, &self.hashed_nonce) & ct_eq(&expected, &self.keyed)
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[..DIGEST_LEN].copy_from_slice(&self.hashed_nonce);
        buf[DIGEST_LEN..].copy_from_slice(&self.keyed);
        buf
    }
}

fn keyed_digest(hashed_nonce: &[u8; DIGEST_LEN], keys: &KeyPair) -> [u8; DIGEST_LEN] {
    let mut mac = hmac_sha256(keys.auth_key());
    mac.update(hashed_nonce);
    mac.update(keys.cipher_key());
    mac.finalize().into_bytes().into()
}

/// A successful key recovery.
#[derive(Debug)]
pub struct Recovered {
    pub keys: KeyPair,
    /// Position of the block that accepted the passphrase.
    pub index: usize,
    pub iterations: u32,
}

/// Key blocks read from, or destined for, a container.
#[derive(Debug)]
pub struct ParsedRing {
    pub ring: KeyRing,
    pub nonce: [u8; NONCE_LEN],
    pub marker: EndMarker,
    /// Bytes consumed, marker included.
    pub len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRing {
    blocks: Vec<KeyBlock>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<KeyBlock>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[KeyBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Reads key blocks from the start of `region` up to the marker.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` if the region ends before a marker is found.
    pub fn parse(region: &[u8]) -> Result<ParsedRing> {
        let mut blocks = Vec::new();
        let mut offset = 0;

        loop {
            let rest = &region[offset..];
            if let Some((nonce, marker)) = end_of_keyblocks(rest) {
                return Ok(ParsedRing {
                    ring: Self::from_blocks(blocks),
                    nonce,
                    marker,
                    len: offset + NONCE_LEN + EndMarker::LEN,
                });
            }

            let block = KeyBlock::from_bytes(rest).ok_or(Error::Truncated)?;
            blocks.push(block);
            offset += KeyBlock::LEN;
        }
    }

    /// Resolve `passphrase` to the container key pair.
    ///
    /// Blocks are tried in stored order and the first whose unwrap also
    /// reproduces `marker` wins.
    ///
    /// # Errors
    ///
    /// Returns `WrongPassword` when no block matches, whatever the reason.
    pub fn recover(
        &self,
        passphrase: &str,
        cipher: CipherSelector,
        extension: TagExtension,
        nonce: &[u8; NONCE_LEN],
        marker: &EndMarker,
    ) -> Result<Recovered> {
        for (index, block) in self.blocks.iter().enumerate() {
            let iterations = block.iterations();
            if !(MIN_HASH_ITERATIONS..=MAX_HASH_ITERATIONS).contains(&iterations) {
                debug!(index, iterations, "skipping key block with out-of-range iterations");
                continue;
            }

            let Some(keys) = block.open(passphrase, cipher, extension) else {
                continue;
            };

            if marker.matches(nonce, &keys) {
                debug!(index, iterations, "key block accepted passphrase");
                return Ok(Recovered {
                    keys,
                    index,
                    iterations,
                });
            }
            debug!(index, "key block unwrapped but end marker did not match");
        }

        debug!(blocks = self.blocks.len(), "no key block accepted passphrase");
        Err(Error::WrongPassword)
    }

    /// Seal `keys` under a new passphrase and append the block.
    ///
    /// Existing blocks are left as they are.
    pub fn append_block(
        &mut self,
        passphrase: &str,
        iterations: u32,
        cipher: CipherSelector,
        extension: TagExtension,
        keys: &KeyPair,
    ) -> Result<&KeyBlock> {
        check_iterations(iterations)?;
        let block = KeyBlock::seal(passphrase, iterations, cipher, extension, keys)?;
        self.blocks.push(block);
        debug!(index = self.blocks.len() - 1, iterations, "appended key block");
        Ok(&self.blocks[self.blocks.len() - 1])
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.blocks.len() * KeyBlock::LEN);
        for block in &self.blocks {
            buf.extend_from_slice(&block.to_bytes());
        }
        buf
    }
}

pub fn check_iterations(iterations: u32) -> Result<()> {
    if (MIN_HASH_ITERATIONS..=MAX_HASH_ITERATIONS).contains(&iterations) {
        Ok(())
    } else {
        Err(Error::InvalidIterations(iterations))
    }
}

/// Recognizes `nonce || SHA-256(nonce) || keyed` at the start of `data`.
fn end_of_keyblocks(data: &[u8]) -> Option<([u8; NONCE_LEN], EndMarker)> {
    let nonce: [u8; NONCE_LEN] = data.get(..NONCE_LEN)?.try_into().ok()?;
    let hashed: [u8; DIGEST_LEN] = data.get(NONCE_LEN..NONCE_LEN + DIGEST_LEN)?.try_into().ok()?;
    if Sha256::digest(nonce).as_slice() != hashed.as_slice() {
        return None;
    }
    let keyed: [u8; DIGEST_LEN] = data
        .get(NONCE_LEN + DIGEST_LEN..NONCE_LEN + EndMarker::LEN)?
        .try_into()
        .ok()?;

    Some((
        nonce,
        EndMarker {
            hashed_nonce: hashed,
            keyed,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;

    const EXT: TagExtension = TagExtension::CounterV1;
    const CIPHER: CipherSelector = CipherSelector::Twofish;

    fn keys() -> KeyPair {
        KeyPair::from_bytes([0x11; KEY_LEN], [0x22; KEY_LEN])
    }

    fn ring_with(passphrases: &[(&str, u32)]) -> KeyRing {
        let mut ring = KeyRing::new();
        for (pw, iters) in passphrases {
            ring.append_block(pw, *iters, CIPHER, EXT, &keys()).unwrap();
        }
        ring
    }

    fn serialized(ring: &KeyRing, nonce: &[u8; NONCE_LEN]) -> Vec<u8> {
        let mut buf = ring.to_bytes();
        buf.extend_from_slice(nonce);
        buf.extend_from_slice(&EndMarker::compute(nonce, &keys()).to_bytes());
        buf
    }

    #[test]
    fn recover_with_single_block() {
        let ring = ring_with(&[("pw", 16)]);
        let nonce = [7u8; NONCE_LEN];
        let marker = EndMarker::compute(&nonce, &keys());

        let rec = ring.recover("pw", CIPHER, EXT, &nonce, &marker).unwrap();
        assert_eq!(rec.index, 0);
        assert_eq!(rec.iterations, 16);
        assert_eq!(rec.keys.cipher_key(), keys().cipher_key());
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let ring = ring_with(&[("pw", 16), ("other", 8)]);
        let nonce = [7u8; NONCE_LEN];
        let marker = EndMarker::compute(&nonce, &keys());

        assert!(matches!(
            ring.recover("nope", CIPHER, EXT, &nonce, &marker),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn any_block_passphrase_opens_the_ring() {
        let ring = ring_with(&[("first", 4), ("second", 8), ("third", 12)]);
        let nonce = [1u8; NONCE_LEN];
        let marker = EndMarker::compute(&nonce, &keys());

        for (pw, index) in [("first", 0), ("second", 1), ("third", 2)] {
            let rec = ring.recover(pw, CIPHER, EXT, &nonce, &marker).unwrap();
            assert_eq!(rec.index, index);
        }
    }

    #[test]
    fn first_matching_block_wins() {
        let ring = ring_with(&[("pw", 4), ("pw", 9)]);
        let nonce = [1u8; NONCE_LEN];
        let marker = EndMarker::compute(&nonce, &keys());

        let rec = ring.recover("pw", CIPHER, EXT, &nonce, &marker).unwrap();
        assert_eq!(rec.index, 0);
        assert_eq!(rec.iterations, 4);
    }

    #[test]
    fn damaged_block_falls_through_to_next_match() {
        let ring = ring_with(&[("pw", 4), ("pw", 9)]);
        let mut bytes = ring.to_bytes();
        bytes[KeyBlock::LEN - 3] ^= 0x01;
        let damaged = KeyRing::from_blocks(vec![
            KeyBlock::from_bytes(&bytes).unwrap(),
            KeyBlock::from_bytes(&bytes[KeyBlock::LEN..]).unwrap(),
        ]);
        let nonce = [1u8; NONCE_LEN];
        let marker = EndMarker::compute(&nonce, &keys());

        let rec = damaged.recover("pw", CIPHER, EXT, &nonce, &marker).unwrap();
        assert_eq!(rec.index, 1);
    }

    #[test]
    fn marker_from_other_container_is_rejected() {
        let ring = ring_with(&[("pw", 4)]);
        let nonce = [1u8; NONCE_LEN];
        let foreign = EndMarker::compute(&[2u8; NONCE_LEN], &keys());

        assert!(matches!(
            ring.recover("pw", CIPHER, EXT, &nonce, &foreign),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn marker_from_other_keys_is_rejected() {
        let ring = ring_with(&[("pw", 4)]);
        let nonce = [1u8; NONCE_LEN];
        let other = KeyPair::from_bytes([0x33; KEY_LEN], [0x22; KEY_LEN]);
        let marker = EndMarker::compute(&nonce, &other);

        assert!(ring.recover("pw", CIPHER, EXT, &nonce, &marker).is_err());
    }

    #[test]
    fn parse_finds_the_marker_after_the_blocks() {
        let ring = ring_with(&[("a", 2), ("b", 3)]);
        let nonce = [9u8; NONCE_LEN];
        let mut bytes = serialized(&ring, &nonce);
        bytes.extend_from_slice(b"header bytes follow");

        let parsed = KeyRing::parse(&bytes).unwrap();
        assert_eq!(parsed.ring, ring);
        assert_eq!(parsed.nonce, nonce);
        assert_eq!(parsed.len, 2 * KeyBlock::LEN + 96);
        assert_eq!(parsed.marker, EndMarker::compute(&nonce, &keys()));
    }

    #[test]
    fn parse_without_marker_is_truncated() {
        let ring = ring_with(&[("a", 2)]);
        assert!(matches!(
            KeyRing::parse(&ring.to_bytes()),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn parse_with_cut_marker_is_truncated() {
        let ring = ring_with(&[("a", 2)]);
        let bytes = serialized(&ring, &[3u8; NONCE_LEN]);
        assert!(matches!(
            KeyRing::parse(&bytes[..bytes.len() - 1]),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn append_rejects_out_of_range_iterations() {
        let mut ring = KeyRing::new();
        assert!(matches!(
            ring.append_block("pw", 0, CIPHER, EXT, &keys()),
            Err(Error::InvalidIterations(0))
        ));
        assert!(ring.is_empty());
    }
}
