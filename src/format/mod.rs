//! Container format handling.
//!
//! Provides the leading signature, the cheap structural checks that run
//! before any key work, and the per-version field widths used by framing.

use crate::crypto::{BLOCK_LEN, CipherSelector, DIGEST_LEN, TagExtension};
use crate::error::{Error, Result};

pub mod v4;

/// Tag identifying a password container ("PWS4").
pub const TAG: &[u8; 4] = b"PWS4";
/// Length of the tag.
pub const TAG_LEN: usize = 4;
/// Length of the cipher selector byte following the tag.
pub const CIPHER_LEN: usize = 1;
/// Length of the whole signature.
pub const SIGNATURE_LEN: usize = TAG_LEN + CIPHER_LEN;
/// Plaintext sentinel block closing the record stream.
pub const EOF_SENTINEL: &[u8; BLOCK_LEN] = b"PWS4-EOFPWS4-EOF";
/// Width of the trailing authenticator.
pub const TRAILER_LEN: usize = DIGEST_LEN;
/// Latest format version
pub const CURRENT_VERSION: FormatVersion = FormatVersion::V4_0;

/// Low-level field widths that vary between format versions.
///
/// Framing asks this instead of hard-coding widths, so a format revision
/// only needs a new implementation.
pub trait FrameWidths {
    /// Bytes used to encode a record's payload length.
    fn length_field_len(&self) -> usize;

    /// Bytes a record-level collaborator should use for time fields.
    fn time_field_len(&self) -> usize;

    /// Largest payload the length field can describe.
    fn max_payload_len(&self) -> u64 {
        match self.length_field_len() {
            n if n >= 8 => u64::MAX,
            n => (1u64 << (8 * n)) - 1,
        }
    }
}

/// Field widths picked for one format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWidths {
    length: usize,
    time: usize,
}

impl FieldWidths {
    pub const fn new(length: usize, time: usize) -> Self {
        Self { length, time }
    }
}

impl FrameWidths for FieldWidths {
    fn length_field_len(&self) -> usize {
        self.length
    }

    fn time_field_len(&self) -> usize {
        self.time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FormatVersion {
    V4_0,
}

impl FormatVersion {
    /// Value stored in the header's version record.
    pub fn number(self) -> u16 {
        match self {
            FormatVersion::V4_0 => v4::VERSION_V4,
        }
    }

    /// Any minor revision of a known major version is readable.
    pub fn from_number(number: u16) -> Result<Self> {
        match number >> 8 {
            v4::MAJOR => Ok(FormatVersion::V4_0),
            _ => Err(Error::UnsupportedVersion(number)),
        }
    }

    pub fn widths(self) -> FieldWidths {
        match self {
            FormatVersion::V4_0 => v4::WIDTHS,
        }
    }

    pub fn tag_extension(self) -> TagExtension {
        match self {
            FormatVersion::V4_0 => TagExtension::CounterV1,
        }
    }
}

/// Checks the signature and the end-of-file structure without any key work.
///
/// Returns the declared cipher.
pub fn sanity_check(data: &[u8]) -> Result<CipherSelector> {
    if data.len() < SIGNATURE_LEN {
        return if !data.is_empty() && TAG.starts_with(&data[..data.len().min(TAG_LEN)]) {
            Err(Error::Truncated)
        } else {
            Err(Error::NotAPasswordFile)
        };
    }

    if &data[..TAG_LEN] != TAG {
        return Err(Error::NotAPasswordFile);
    }

    let cipher = CipherSelector::from_id(data[TAG_LEN]).ok_or(Error::NotAPasswordFile)?;

    if data.len() < v4::MIN_CONTAINER_LEN {
        return Err(Error::Truncated);
    }

    let eof_at = data.len() - TRAILER_LEN - BLOCK_LEN;
    if &data[eof_at..eof_at + BLOCK_LEN] != EOF_SENTINEL {
        return Err(Error::Truncated);
    }

    Ok(cipher)
}

/// Reports whether `data` looks like a container, without a passphrase.
pub fn probe(data: &[u8]) -> Option<(FormatVersion, CipherSelector)> {
    sanity_check(data)
        .ok()
        .map(|cipher| (CURRENT_VERSION, cipher))
}

/// Serializes the signature for `cipher`.
pub fn signature(cipher: CipherSelector) -> [u8; SIGNATURE_LEN] {
    let mut sig = [0u8; SIGNATURE_LEN];
    sig[..TAG_LEN].copy_from_slice(TAG);
    sig[TAG_LEN] = cipher.id();
    sig
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(cipher: CipherSelector) -> Vec<u8> {
        let mut data = signature(cipher).to_vec();
        data.resize(v4::MIN_CONTAINER_LEN - TRAILER_LEN - BLOCK_LEN, 0);
        data.extend_from_slice(EOF_SENTINEL);
        data.extend_from_slice(&[0u8; TRAILER_LEN]);
        data
    }

    #[test]
    fn well_formed_tail_passes() {
        assert_eq!(
            sanity_check(&minimal(CipherSelector::Aes256)).unwrap(),
            CipherSelector::Aes256
        );
    }

    #[test]
    fn invalid_tag_fails() {
        let mut data = minimal(CipherSelector::Twofish);
        data[..4].copy_from_slice(b"FAIL");
        assert!(matches!(sanity_check(&data), Err(Error::NotAPasswordFile)));
    }

    #[test]
    fn unknown_cipher_fails() {
        let mut data = minimal(CipherSelector::Twofish);
        data[TAG_LEN] = 9;
        assert!(matches!(sanity_check(&data), Err(Error::NotAPasswordFile)));
    }

    #[test]
    fn empty_input_is_not_a_container() {
        assert!(matches!(sanity_check(&[]), Err(Error::NotAPasswordFile)));
    }

    #[test]
    fn partial_tag_is_truncated() {
        assert!(matches!(sanity_check(b"PW"), Err(Error::Truncated)));
    }

    #[test]
    fn missing_eof_sentinel_is_truncated() {
        let data = minimal(CipherSelector::Twofish);
        assert!(matches!(
            sanity_check(&data[..data.len() - 1]),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn probe_reports_cipher() {
        assert_eq!(
            probe(&minimal(CipherSelector::Twofish)),
            Some((FormatVersion::V4_0, CipherSelector::Twofish))
        );
        assert_eq!(probe(b"hello world"), None);
    }

    #[test]
    fn version_numbers() {
        assert_eq!(FormatVersion::from_number(0x0400).unwrap(), FormatVersion::V4_0);
        assert_eq!(FormatVersion::from_number(0x0401).unwrap(), FormatVersion::V4_0);
        assert!(matches!(
            FormatVersion::from_number(0x0310),
            Err(Error::UnsupportedVersion(0x0310))
        ));
    }

    #[test]
    fn max_payload_follows_length_width() {
        assert_eq!(FieldWidths::new(2, 5).max_payload_len(), 0xffff);
        assert_eq!(FieldWidths::new(4, 5).max_payload_len(), u32::MAX as u64);
    }
}
