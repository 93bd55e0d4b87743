use std::io::Write;

use tracing::debug;

use super::session_iv;
use crate::crypto::{BlockCipher, CipherSelector, NONCE_LEN, generate_nonce};
use crate::error::{Error, Result};
use crate::format::{self, CURRENT_VERSION, FieldWidths, TRAILER_LEN, v4};
use crate::framing::{FrameEncoder, Record};
use crate::keyblock::KeyPair;
use crate::ring::{DEFAULT_HASH_ITERATIONS, EndMarker, KeyRing, check_iterations};

/// Parameters for a new container.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub cipher: CipherSelector,
    /// Hash iterations for the first key block.
    pub iterations: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            cipher: CipherSelector::default(),
            iterations: DEFAULT_HASH_ITERATIONS,
        }
    }
}

/// An open container being written. Nothing reaches the sink before `close`.
pub struct WriteSession {
    cipher: CipherSelector,
    ring: KeyRing,
    keys: KeyPair,
    nonce: [u8; NONCE_LEN],
    encoder: FrameEncoder<FieldWidths>,
    records: usize,
}

impl WriteSession {
    /// Start a container with a fresh key pair sealed under `passphrase`.
    pub fn create(passphrase: &str, options: WriteOptions, header: &[Record]) -> Result<Self> {
        check_iterations(options.iterations)?;
        let keys = KeyPair::generate()?;
        let mut ring = KeyRing::new();
        ring.append_block(
            passphrase,
            options.iterations,
            options.cipher,
            CURRENT_VERSION.tag_extension(),
            &keys,
        )?;
        Self::resume(ring, keys, options.cipher, header)
    }

    /// Start a container that reuses an existing ring and key pair.
    ///
    /// A fresh nonce is drawn, so the body gets a new IV while every
    /// passphrase in `ring` keeps working.
    pub(crate) fn resume(
        ring: KeyRing,
        keys: KeyPair,
        cipher: CipherSelector,
        header: &[Record],
    ) -> Result<Self> {
        let nonce = generate_nonce()?;
        let iv = session_iv(&nonce, &keys);
        let mut encoder = FrameEncoder::new(
            BlockCipher::new(cipher, keys.cipher_key()),
            &iv,
            keys.auth_key(),
            CURRENT_VERSION.widths(),
        );

        encoder.encode(v4::VERSION_RECORD_TYPE, &CURRENT_VERSION.number().to_le_bytes())?;
        for record in header {
            let record_type = record.record_type();
            if record_type == v4::VERSION_RECORD_TYPE || record_type == v4::END_RECORD_TYPE {
                return Err(Error::ReservedRecordType(record_type));
            }
            encoder.encode(record_type, record.payload())?;
        }
        encoder.encode(v4::END_RECORD_TYPE, &[])?;
        debug!(?cipher, blocks = ring.len(), fields = header.len(), "header written");

        Ok(Self {
            cipher,
            ring,
            keys,
            nonce,
            encoder,
            records: 0,
        })
    }

    pub fn write_record(&mut self, record_type: u8, payload: &[u8]) -> Result<()> {
        self.encoder.encode(record_type, payload)?;
        self.records += 1;
        Ok(())
    }

    /// Add a key block for another passphrase; the body is unaffected.
    pub fn append_block(&mut self, passphrase: &str, iterations: u32) -> Result<()> {
        self.ring.append_block(
            passphrase,
            iterations,
            self.cipher,
            CURRENT_VERSION.tag_extension(),
            &self.keys,
        )?;
        Ok(())
    }

    pub fn cipher(&self) -> CipherSelector {
        self.cipher
    }

    pub fn key_blocks(&self) -> &KeyRing {
        &self.ring
    }

    /// Body records written so far.
    pub fn records_written(&self) -> usize {
        self.records
    }

    /// Finalize the authenticator and assemble the complete container.
    pub fn finish(self) -> Vec<u8> {
        let marker = EndMarker::compute(&self.nonce, &self.keys);
        let (stream, tag) = self.encoder.finish();
        let ring = self.ring.to_bytes();

        let mut out = Vec::with_capacity(
            format::SIGNATURE_LEN + ring.len() + NONCE_LEN + EndMarker::LEN + stream.len() + TRAILER_LEN,
        );
        out.extend_from_slice(&format::signature(self.cipher));
        out.extend_from_slice(&ring);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&marker.to_bytes());
        out.extend_from_slice(&stream);
        out.extend_from_slice(&tag);

        debug!(bytes = out.len(), records = self.records, "container finalized");
        out
    }

    /// Write the finished container to `sink` in one piece.
    pub fn close<W: Write>(self, mut sink: W) -> Result<()> {
        let bytes = self.finish();
        sink.write_all(&bytes)?;
        sink.flush()?;
        Ok(())
    }
}
