//! Typed records over a CBC chained block cipher with a running HMAC.
//!
//! Each record is `LENGTH | TYPE | PAYLOAD`, zero padded to whole cipher
//! blocks (at least one) and encrypted with the chaining state carried over
//! from the previous record. The stream ends with a plaintext sentinel block.
//! Every plaintext byte of every frame, except padding, and the sentinel
//! itself are fed to the authenticator.

use hmac::Mac;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{BLOCK_LEN, BlockCipher, DIGEST_LEN, HmacSha256, KEY_LEN, hmac_sha256};
use crate::error::{Error, Result};
use crate::format::{EOF_SENTINEL, FrameWidths};

const TYPE_LEN: usize = 1;

/// One typed payload exchanged with the record-level collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    record_type: u8,
    payload: Zeroizing<Vec<u8>>,
}

impl Record {
    pub fn new(record_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            record_type,
            payload: Zeroizing::new(payload.into()),
        }
    }

    pub fn record_type(&self) -> u8 {
        self.record_type
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// What the decoder found at the cursor.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Record(Record),
    EndOfStream,
}

struct Chain {
    cipher: BlockCipher,
    state: Zeroizing<[u8; BLOCK_LEN]>,
}

impl Chain {
    fn new(cipher: BlockCipher, iv: &[u8; BLOCK_LEN]) -> Self {
        Self {
            cipher,
            state: Zeroizing::new(*iv),
        }
    }

    fn encrypt(&mut self, block: &mut [u8; BLOCK_LEN]) {
        xor_in_place(block, &self.state);
        self.cipher.encrypt_block(block);
        self.state.copy_from_slice(&block[..]);
    }

    fn decrypt(&mut self, block: &mut [u8; BLOCK_LEN]) {
        let mut next = *block;
        self.cipher.decrypt_block(block);
        xor_in_place(block, &self.state);
        self.state.copy_from_slice(&next);
        next.zeroize();
    }
}

fn xor_in_place(block: &mut [u8; BLOCK_LEN], other: &[u8; BLOCK_LEN]) {
    for (b, o) in block.iter_mut().zip(other) {
        *b ^= o;
    }
}

fn header_len<W: FrameWidths>(widths: &W) -> usize {
    widths.length_field_len() + TYPE_LEN
}

pub struct FrameEncoder<W: FrameWidths> {
    chain: Chain,
    mac: HmacSha256,
    widths: W,
    out: Vec<u8>,
}

impl<W: FrameWidths> FrameEncoder<W> {
    pub fn new(cipher: BlockCipher, iv: &[u8; BLOCK_LEN], auth_key: &[u8; KEY_LEN], widths: W) -> Self {
        debug_assert!(widths.length_field_len() <= 8);
        debug_assert!(header_len(&widths) <= BLOCK_LEN);
        Self {
            chain: Chain::new(cipher, iv),
            mac: hmac_sha256(auth_key),
            widths,
            out: Vec::new(),
        }
    }

    /// Frame, authenticate and encrypt one record.
    ///
    /// # Errors
    ///
    /// Returns `RecordTooLarge` if the payload does not fit the length field.
    pub fn encode(&mut self, record_type: u8, payload: &[u8]) -> Result<()> {
        let max = self.widths.max_payload_len();
        if payload.len() as u64 > max {
            return Err(Error::RecordTooLarge {
                len: payload.len(),
                max,
            });
        }

        let length_len = self.widths.length_field_len();
        let total = header_len(&self.widths) + payload.len();
        let padded = total.div_ceil(BLOCK_LEN).max(1) * BLOCK_LEN;

        let mut plain = Zeroizing::new(Vec::with_capacity(padded));
        plain.extend_from_slice(&(payload.len() as u64).to_le_bytes()[..length_len]);
        plain.push(record_type);
        plain.extend_from_slice(payload);
        self.mac.update(&plain);
        plain.resize(padded, 0);

        let mut block = Zeroizing::new([0u8; BLOCK_LEN]);
        for chunk in plain.chunks_exact(BLOCK_LEN) {
            block.copy_from_slice(chunk);
            self.chain.encrypt(&mut block);
            self.out.extend_from_slice(&block[..]);
        }

        Ok(())
    }

    /// Ciphertext produced so far.
    pub fn ciphertext_len(&self) -> usize {
        self.out.len()
    }

    /// Close the stream: append the sentinel and finalize the authenticator.
    pub fn finish(mut self) -> (Vec<u8>, [u8; DIGEST_LEN]) {
        self.mac.update(EOF_SENTINEL);
        self.out.extend_from_slice(EOF_SENTINEL);
        let tag = self.mac.finalize().into_bytes().into();
        (self.out, tag)
    }
}

pub struct FrameDecoder<W: FrameWidths> {
    chain: Chain,
    mac: HmacSha256,
    widths: W,
    pos: usize,
}

impl<W: FrameWidths> FrameDecoder<W> {
    pub fn new(cipher: BlockCipher, iv: &[u8; BLOCK_LEN], auth_key: &[u8; KEY_LEN], widths: W) -> Self {
        debug_assert!(widths.length_field_len() <= 8);
        debug_assert!(header_len(&widths) <= BLOCK_LEN);
        Self {
            chain: Chain::new(cipher, iv),
            mac: hmac_sha256(auth_key),
            widths,
            pos: 0,
        }
    }

    /// Offset of the next unread byte in the stream.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Decode the frame at the cursor of `stream` and advance past it.
    ///
    /// # Errors
    ///
    /// - `Truncated` if the stream ends inside a frame or before the sentinel
    /// - `BadPadding` if pad bytes are not zero
    pub fn decode(&mut self, stream: &[u8]) -> Result<Frame> {
        let rest = stream.get(self.pos..).unwrap_or_default();
        if rest.len() < BLOCK_LEN {
            return Err(Error::Truncated);
        }

        if &rest[..BLOCK_LEN] == EOF_SENTINEL {
            self.mac.update(EOF_SENTINEL);
            self.pos += BLOCK_LEN;
            return Ok(Frame::EndOfStream);
        }

        let mut block = Zeroizing::new([0u8; BLOCK_LEN]);
        block.copy_from_slice(&rest[..BLOCK_LEN]);
        self.chain.decrypt(&mut block);

        let length_len = self.widths.length_field_len();
        let hdr = header_len(&self.widths);
        let mut length = [0u8; 8];
        length[..length_len].copy_from_slice(&block[..length_len]);
        let length = u64::from_le_bytes(length);
        let record_type = block[length_len];

        let total = (hdr as u64).saturating_add(length);
        let padded = total.div_ceil(BLOCK_LEN as u64).saturating_mul(BLOCK_LEN as u64);
        if padded > rest.len() as u64 {
            return Err(Error::Truncated);
        }
        let (total, padded) = (total as usize, padded as usize);

        let mut plain = Zeroizing::new(Vec::with_capacity(padded));
        plain.extend_from_slice(&block[..]);
        for chunk in rest[BLOCK_LEN..padded].chunks_exact(BLOCK_LEN) {
            block.copy_from_slice(chunk);
            self.chain.decrypt(&mut block);
            plain.extend_from_slice(&block[..]);
        }

        if plain[total..].iter().any(|&b| b != 0) {
            return Err(Error::BadPadding);
        }

        self.mac.update(&plain[..total]);
        self.pos += padded;

        Ok(Frame::Record(Record::new(record_type, &plain[hdr..total])))
    }

    /// Compare the authenticator over everything decoded so far with `trailer`.
    pub fn verify(self, trailer: &[u8]) -> bool {
        self.mac.verify_slice(trailer).is_ok()
    }
}
