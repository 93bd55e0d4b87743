//! Container format v4.
//!
//! V4 layout:
//! ```text
//! TAG (4) | CIPHER (1) | KEY BLOCK (116) * n | NONCE (32) | SHA-256(NONCE) (32) | KEYED MARKER (32)
//! | HEADER RECORDS ... END | BODY RECORDS ... | EOF SENTINEL (16) | HMAC-SHA256 (32)
//! ```
//!
//! Every record is `LENGTH (4, LE) | TYPE (1) | PAYLOAD`, zero padded to the
//! 16 byte cipher block and CBC encrypted.

use super::{FieldWidths, SIGNATURE_LEN, TRAILER_LEN};
use crate::crypto::{BLOCK_LEN, DIGEST_LEN, NONCE_LEN};
use crate::keyblock::KeyBlock;

/// Version record value written by this engine.
pub const VERSION_V4: u16 = 0x0400;
/// Major version shared by every readable v4 revision.
pub const MAJOR: u16 = VERSION_V4 >> 8;

pub const WIDTHS: FieldWidths = FieldWidths::new(4, 5);

/// Header record carrying the format version; always first.
pub const VERSION_RECORD_TYPE: u8 = 0x00;
/// Record closing the header.
pub const END_RECORD_TYPE: u8 = 0xFF;

/// Nonce plus both halves of the end-of-keyblocks marker.
pub const END_OF_KEYBLOCKS_LEN: usize = NONCE_LEN + DIGEST_LEN + DIGEST_LEN;

/// Smallest structurally possible container: one key block, a header of
/// version and END records, no body.
pub const MIN_CONTAINER_LEN: usize = SIGNATURE_LEN
    + KeyBlock::LEN
    + END_OF_KEYBLOCKS_LEN
    + 2 * BLOCK_LEN
    + BLOCK_LEN
    + TRAILER_LEN;
