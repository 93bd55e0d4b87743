use std::io::Read;

use tracing::{debug, warn};

use super::write::WriteSession;
use super::{session_iv, unlock};
use crate::crypto::{BLOCK_LEN, BlockCipher, CipherSelector, NONCE_LEN};
use crate::error::{Error, Result};
use crate::format::{CURRENT_VERSION, FieldWidths, FormatVersion, TRAILER_LEN, v4};
use crate::framing::{Frame, FrameDecoder, Record};
use crate::keyblock::{KeyBlock, KeyPair};
use crate::ring::{EndMarker, KeyRing};

/// An open container being read.
///
/// The whole record stream is authenticated during [`ReadSession::open`];
/// if that fails the session refuses to hand out any plaintext and
/// [`ReadSession::close`] reports `TamperedOrCorrupt`.
pub struct ReadSession {
    data: Vec<u8>,
    cipher: CipherSelector,
    version: FormatVersion,
    ring: KeyRing,
    keys: KeyPair,
    matched_index: usize,
    iterations: u32,
    stream_start: usize,
    header: Vec<Record>,
    decoder: FrameDecoder<FieldWidths>,
    authentic: bool,
    finished: bool,
}

impl ReadSession {
    /// Read a whole container from `source` and open it.
    pub fn open<R: Read>(mut source: R, passphrase: &str) -> Result<Self> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Self::from_bytes(data, passphrase)
    }

    pub fn from_bytes(data: Vec<u8>, passphrase: &str) -> Result<Self> {
        let unlocked = unlock(&data, passphrase)?;
        let stream_start = unlocked.stream_start();
        let cipher = unlocked.cipher;
        let keys = unlocked.recovered.keys;
        let iv = session_iv(&unlocked.parsed.nonce, &keys);
        debug!(index = unlocked.recovered.index, "keys recovered");

        let (stream, trailer) = data[stream_start..].split_at(data.len() - stream_start - TRAILER_LEN);
        let authentic = authenticate(stream, trailer, cipher, &keys, &iv);

        let mut decoder = new_decoder(cipher, &keys, &iv);
        let (version, header) = if authentic {
            read_header(&mut decoder, stream)?
        } else {
            warn!("container trailer does not match its contents");
            (CURRENT_VERSION, Vec::new())
        };
        debug!(fields = header.len(), "header exchanged");

        Ok(Self {
            data,
            cipher,
            version,
            ring: unlocked.parsed.ring,
            keys,
            matched_index: unlocked.recovered.index,
            iterations: unlocked.recovered.iterations,
            stream_start,
            header,
            decoder,
            authentic,
            finished: false,
        })
    }

    /// Header records supplied by the writer, version and END excluded.
    pub fn header(&self) -> Result<&[Record]> {
        self.ensure_authentic()?;
        Ok(&self.header)
    }

    /// Next body record, or `None` once the end-of-stream sentinel is reached.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        self.ensure_authentic()?;
        if self.finished {
            return Ok(None);
        }

        let stream = &self.data[self.stream_start..self.data.len() - TRAILER_LEN];
        match self.decoder.decode(stream)? {
            Frame::Record(record) => Ok(Some(record)),
            Frame::EndOfStream => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    /// Finish reading and verify the trailer over everything decoded.
    pub fn close(self) -> Result<()> {
        let Self {
            data,
            stream_start,
            mut decoder,
            authentic,
            mut finished,
            ..
        } = self;
        if !authentic {
            return Err(Error::TamperedOrCorrupt);
        }

        let (stream, trailer) = data[stream_start..].split_at(data.len() - stream_start - TRAILER_LEN);
        while !finished {
            finished = decoder.decode(stream)? == Frame::EndOfStream;
        }

        if decoder.verify(trailer) {
            debug!("container closed");
            Ok(())
        } else {
            warn!("container trailer mismatch at close");
            Err(Error::TamperedOrCorrupt)
        }
    }

    /// Add a key block for another passphrase without touching the body.
    ///
    /// The change is applied to the in-memory image returned by
    /// [`ReadSession::container_bytes`]; persisting it is up to the caller.
    pub fn append_block(&mut self, passphrase: &str, iterations: u32) -> Result<()> {
        self.ensure_authentic()?;
        let block = self
            .ring
            .append_block(
                passphrase,
                iterations,
                self.cipher,
                self.version.tag_extension(),
                &self.keys,
            )?
            .to_bytes();

        let at = self.stream_start - NONCE_LEN - EndMarker::LEN;
        self.data.splice(at..at, block);
        self.stream_start += KeyBlock::LEN;
        Ok(())
    }

    /// Start a new container sharing this one's key ring and key pair.
    pub fn rewrite(&self) -> Result<WriteSession> {
        self.ensure_authentic()?;
        WriteSession::resume(self.ring.clone(), self.keys.duplicate(), self.cipher, &self.header)
    }

    pub fn container_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn cipher(&self) -> CipherSelector {
        self.cipher
    }

    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub fn widths(&self) -> FieldWidths {
        self.version.widths()
    }

    pub fn key_blocks(&self) -> &KeyRing {
        &self.ring
    }

    /// Index of the key block that accepted the passphrase.
    pub fn matched_index(&self) -> usize {
        self.matched_index
    }

    /// Hash iterations of the key block that accepted the passphrase.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn ensure_authentic(&self) -> Result<()> {
        if self.authentic {
            Ok(())
        } else {
            Err(Error::TamperedOrCorrupt)
        }
    }
}

fn new_decoder(cipher: CipherSelector, keys: &KeyPair, iv: &[u8; BLOCK_LEN]) -> FrameDecoder<FieldWidths> {
    FrameDecoder::new(
        BlockCipher::new(cipher, keys.cipher_key()),
        iv,
        keys.auth_key(),
        CURRENT_VERSION.widths(),
    )
}

/// Decode every frame, discarding plaintext, and compare the trailer.
///
/// The file length and sentinel were already checked, so a frame that does
/// not decode is damage inside the stream and counts as a failed check.
fn authenticate(
    stream: &[u8],
    trailer: &[u8],
    cipher: CipherSelector,
    keys: &KeyPair,
    iv: &[u8; BLOCK_LEN],
) -> bool {
    let mut decoder = new_decoder(cipher, keys, iv);
    loop {
        match decoder.decode(stream) {
            Ok(Frame::Record(_)) => {}
            Ok(Frame::EndOfStream) => break,
            Err(e) => {
                debug!(error = %e, at = decoder.position(), "record stream does not decode");
                return false;
            }
        }
    }

    if decoder.position() != stream.len() {
        debug!(at = decoder.position(), "sentinel found before end of stream");
        return false;
    }
    decoder.verify(trailer)
}

fn read_header(
    decoder: &mut FrameDecoder<FieldWidths>,
    stream: &[u8],
) -> Result<(FormatVersion, Vec<Record>)> {
    let version = match decoder.decode(stream)? {
        Frame::Record(r) if r.record_type() == v4::VERSION_RECORD_TYPE => {
            let number: [u8; 2] = r
                .payload()
                .try_into()
                .map_err(|_| Error::FramingCorrupt("malformed version record"))?;
            FormatVersion::from_number(u16::from_le_bytes(number))?
        }
        _ => return Err(Error::FramingCorrupt("missing version record")),
    };

    let mut header = Vec::new();
    loop {
        match decoder.decode(stream)? {
            Frame::Record(r) if r.record_type() == v4::END_RECORD_TYPE => break,
            Frame::Record(r) => header.push(r),
            Frame::EndOfStream => return Err(Error::FramingCorrupt("header is not terminated")),
        }
    }

    Ok((version, header))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WriteOptions;

    fn quick() -> WriteOptions {
        WriteOptions {
            cipher: CipherSelector::Aes256,
            iterations: 8,
        }
    }

    fn sample() -> Vec<u8> {
        let header = [Record::new(0x02, b"uuid".to_vec())];
        let mut ws = WriteSession::create("pw", quick(), &header).unwrap();
        ws.write_record(0x03, b"first").unwrap();
        ws.write_record(0x04, &[9u8; 40]).unwrap();
        ws.finish()
    }

    #[test]
    fn reads_back_header_and_records() {
        let mut rs = ReadSession::from_bytes(sample(), "pw").unwrap();
        assert_eq!(rs.cipher(), CipherSelector::Aes256);
        assert_eq!(rs.version(), FormatVersion::V4_0);
        assert_eq!(rs.iterations(), 8);
        assert_eq!(rs.matched_index(), 0);
        assert_eq!(rs.header().unwrap(), &[Record::new(0x02, b"uuid".to_vec())]);

        assert_eq!(rs.read_record().unwrap(), Some(Record::new(0x03, b"first".to_vec())));
        assert_eq!(rs.read_record().unwrap(), Some(Record::new(0x04, vec![9u8; 40])));
        assert_eq!(rs.read_record().unwrap(), None);
        assert_eq!(rs.read_record().unwrap(), None);
        rs.close().unwrap();
    }

    #[test]
    fn close_without_reading_drains_the_stream() {
        let rs = ReadSession::from_bytes(sample(), "pw").unwrap();
        rs.close().unwrap();
    }

    #[test]
    fn flipped_body_byte_is_reported_at_close() {
        let mut data = sample();
        let at = data.len() - TRAILER_LEN - BLOCK_LEN - 5;
        data[at] ^= 0x80;

        let mut rs = ReadSession::from_bytes(data, "pw").unwrap();
        assert!(matches!(rs.read_record(), Err(Error::TamperedOrCorrupt)));
        assert!(matches!(rs.close(), Err(Error::TamperedOrCorrupt)));
    }

    #[test]
    fn garbled_length_field_is_tampered_not_truncated() {
        let header = [Record::new(0x02, b"uuid".to_vec())];
        let mut data = WriteSession::create("pw", quick(), &header).unwrap().finish();
        let stream_start = crate::format::SIGNATURE_LEN + KeyBlock::LEN + NONCE_LEN + EndMarker::LEN;
        data[stream_start] ^= 0x01;

        let rs = ReadSession::from_bytes(data, "pw").unwrap();
        assert!(matches!(rs.header(), Err(Error::TamperedOrCorrupt)));
        assert!(matches!(rs.close(), Err(Error::TamperedOrCorrupt)));
    }

    #[test]
    fn append_and_rewrite_refuse_a_tampered_session() {
        let mut data = sample();
        let at = data.len() - TRAILER_LEN - BLOCK_LEN - 20;
        data[at] ^= 0x01;

        let mut rs = ReadSession::from_bytes(data, "pw").unwrap();
        assert!(matches!(rs.append_block("other", 2), Err(Error::TamperedOrCorrupt)));
        assert!(matches!(rs.rewrite(), Err(Error::TamperedOrCorrupt)));
    }

    #[test]
    fn flipped_trailer_is_tampered() {
        let mut data = sample();
        let last = data.len() - 1;
        data[last] ^= 0x01;

        let rs = ReadSession::from_bytes(data, "pw").unwrap();
        assert!(matches!(rs.header(), Err(Error::TamperedOrCorrupt)));
        assert!(matches!(rs.close(), Err(Error::TamperedOrCorrupt)));
    }

    #[test]
    fn wrong_password_is_rejected() {
        assert!(matches!(
            ReadSession::from_bytes(sample(), "nope"),
            Err(Error::WrongPassword)
        ));
    }

    #[test]
    fn appended_block_keeps_the_body() {
        let original = sample();
        let mut rs = ReadSession::from_bytes(original.clone(), "pw").unwrap();
        rs.append_block("second", 4).unwrap();
        let updated = rs.container_bytes().to_vec();
        assert_eq!(updated.len(), original.len() + KeyBlock::LEN);
        assert_eq!(
            updated[updated.len() - 100..],
            original[original.len() - 100..]
        );

        let mut other = ReadSession::from_bytes(updated.clone(), "second").unwrap();
        assert_eq!(other.matched_index(), 1);
        assert_eq!(other.iterations(), 4);
        assert_eq!(other.read_record().unwrap(), Some(Record::new(0x03, b"first".to_vec())));
        other.close().unwrap();

        ReadSession::from_bytes(updated, "pw").unwrap().close().unwrap();
    }

    #[test]
    fn rewrite_keeps_every_passphrase() {
        let mut ws = WriteSession::create("pw", quick(), &[]).unwrap();
        ws.append_block("spare", 2).unwrap();
        let rs = ReadSession::from_bytes(ws.finish(), "pw").unwrap();

        let mut next = rs.rewrite().unwrap();
        next.write_record(0x07, b"new").unwrap();
        let bytes = next.finish();

        let mut spare = ReadSession::from_bytes(bytes, "spare").unwrap();
        assert_eq!(spare.key_blocks().len(), 2);
        assert_eq!(spare.read_record().unwrap(), Some(Record::new(0x07, b"new".to_vec())));
        spare.close().unwrap();
    }

    #[test]
    fn reader_errors_surface_as_io() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("disk gone"))
            }
        }
        assert!(matches!(ReadSession::open(Broken, "pw"), Err(Error::Io(_))));
    }
}
