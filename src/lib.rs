//! Encrypted container engine for password databases.
//!
//! The core is [`session`]: a [`WriteSession`] turns typed records into a
//! sealed container, a [`ReadSession`] recovers the keys from any of the
//! container's key blocks and streams records back. [`Vault`] wraps both
//! around a file on disk.

pub mod crypto;
mod error;
pub mod format;
pub mod framing;
pub mod keyblock;
pub mod ring;
pub mod session;
mod storage;

pub use crate::crypto::CipherSelector;
pub use crate::error::{Error, Result as CoreResult};
pub use crate::format::{FormatVersion, probe};
pub use crate::framing::Record;
pub use crate::session::{ReadSession, WriteOptions, WriteSession, check_passkey};
pub use crate::storage::Storage;

use std::fmt;

use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::Serialize;
use tracing::info;
use zeroize::Zeroizing;

/// A container file opened with one passphrase.
///
/// Records are decrypted once at open; every change rewrites the whole
/// container through [`Storage::save`].
pub struct Vault {
    storage: Storage,
    passphrase: Zeroizing<String>,
    session: ReadSession,
    records: Vec<Record>,
}

impl Vault {
    pub fn create(passphrase: Zeroizing<String>, options: WriteOptions) -> Result<Self> {
        Self::create_with_storage(passphrase, default_storage()?, options)
    }

    pub fn create_with_storage(
        passphrase: Zeroizing<String>,
        storage: Storage,
        options: WriteOptions,
    ) -> Result<Self> {
        if storage.exists() {
            bail!("container already exists");
        }

        let session = WriteSession::create(&passphrase, options, &[])
            .context("failed to create container")?;
        let bytes = session.finish();
        storage.save(&bytes)?;
        info!(path = %storage.path().display(), "container created");

        let session = ReadSession::from_bytes(bytes, &passphrase)?;
        Ok(Self {
            storage,
            passphrase,
            session,
            records: Vec::new(),
        })
    }

    pub fn open(passphrase: Zeroizing<String>) -> Result<Self> {
        Self::open_with_storage(passphrase, default_storage()?)
    }

    pub fn open_with_storage(passphrase: Zeroizing<String>, storage: Storage) -> Result<Self> {
        if !storage.exists() {
            bail!("container does not exist");
        }

        let data = storage.load()?;
        let mut session =
            ReadSession::from_bytes(data, &passphrase).context("unable to open container")?;

        let mut records = Vec::new();
        while let Some(record) = session.read_record().context("unable to read records")? {
            records.push(record);
        }

        Ok(Self {
            storage,
            passphrase,
            session,
            records,
        })
    }

    /// Check a passphrase without decrypting any record.
    ///
    /// Returns the hash iterations of the key block that accepted it.
    pub fn check_with_storage(passphrase: &str, storage: &Storage) -> Result<u32> {
        if !storage.exists() {
            bail!("container does not exist");
        }
        let data = storage.load()?;
        check_passkey(&data, passphrase).context("passphrase check failed")
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn header(&self) -> Result<&[Record]> {
        Ok(self.session.header()?)
    }

    /// Append a record and rewrite the container.
    pub fn add(&mut self, record_type: u8, payload: &[u8]) -> Result<()> {
        self.records.push(Record::new(record_type, payload));
        self.save()
    }

    /// Seal the current key pair under another passphrase.
    ///
    /// Only the key ring grows; the record stream is written back unchanged.
    pub fn add_passphrase(&mut self, passphrase: &str, iterations: u32) -> Result<()> {
        self.session
            .append_block(passphrase, iterations)
            .context("failed to add key block")?;
        self.storage.save(self.session.container_bytes())?;
        info!(blocks = self.session.key_blocks().len(), "key block added");
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        let mut writer = self.session.rewrite()?;
        for record in &self.records {
            writer.write_record(record.record_type(), record.payload())?;
        }
        let bytes = writer.finish();
        self.storage.save(&bytes)?;

        self.session = ReadSession::from_bytes(bytes, &self.passphrase)?;
        while self.session.read_record()?.is_some() {}
        Ok(())
    }

    pub fn info(&self) -> VaultInfo {
        VaultInfo {
            path: self.storage.path().display().to_string(),
            size: self.session.container_bytes().len(),
            version: self.session.version(),
            cipher: self.session.cipher(),
            matched_block: self.session.matched_index(),
            key_blocks: self
                .session
                .key_blocks()
                .blocks()
                .iter()
                .map(|block| KeyBlockInfo {
                    iterations: block.iterations(),
                    salt: hex::encode(block.salt()),
                })
                .collect(),
            records: self.records.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct KeyBlockInfo {
    pub iterations: u32,
    pub salt: String,
}

/// Summary of an open container for display.
#[derive(Debug, Serialize)]
pub struct VaultInfo {
    pub path: String,
    pub size: usize,
    pub version: FormatVersion,
    pub cipher: CipherSelector,
    pub matched_block: usize,
    pub key_blocks: Vec<KeyBlockInfo>,
    pub records: usize,
}

impl fmt::Display for VaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "path:       {}", self.path)?;
        writeln!(f, "size:       {} bytes", self.size)?;
        writeln!(f, "version:    {:?}", self.version)?;
        writeln!(f, "cipher:     {:?}", self.cipher)?;
        writeln!(f, "records:    {}", self.records)?;
        write!(f, "key blocks: {}", self.key_blocks.len())?;
        for (i, block) in self.key_blocks.iter().enumerate() {
            let mark = if i == self.matched_block { '*' } else { ' ' };
            write!(f, "\n  {mark} #{i} iterations={} salt={}", block.iterations, block.salt)?;
        }
        Ok(())
    }
}

pub fn default_storage() -> Result<Storage> {
    let project_dirs =
        ProjectDirs::from("", "", "passvault").context("could not determine platform directories")?;

    let path = project_dirs.data_dir().join("vault.psafe4");

    Ok(Storage::new(path))
}
