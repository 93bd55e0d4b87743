use thiserror::Error;

/// Failures surfaced by the container engine.
///
/// `WrongPassword` deliberately covers both "no key block accepts this
/// passphrase" and "key blocks are damaged"; callers cannot tell them apart.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not a password container")]
    NotAPasswordFile,

    #[error("container is truncated")]
    Truncated,

    #[error("wrong password or corrupted key blocks")]
    WrongPassword,

    #[error("record padding is inconsistent with its declared length")]
    BadPadding,

    #[error("record framing is corrupt: {0}")]
    FramingCorrupt(&'static str),

    #[error("container authentication failed; data tampered or corrupt")]
    TamperedOrCorrupt,

    #[error("unsupported container version: {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("record of {len} bytes exceeds the {max} byte limit")]
    RecordTooLarge { len: usize, max: u64 },

    #[error("record type {0:#04x} is reserved for the container header")]
    ReservedRecordType(u8),

    #[error("hash iterations out of range: {0}")]
    InvalidIterations(u32),

    #[error("OS random generator unavailable")]
    Random,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
