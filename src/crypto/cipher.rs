use aes::Aes256;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use twofish::Twofish;

use super::{BLOCK_LEN, KEY_LEN};

/// Block cipher protecting a container, declared by the byte after the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CipherSelector {
    #[default]
    Twofish,
    Aes256,
}

impl CipherSelector {
    pub fn id(self) -> u8 {
        match self {
            CipherSelector::Twofish => 0,
            CipherSelector::Aes256 => 1,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(CipherSelector::Twofish),
            1 => Some(CipherSelector::Aes256),
            _ => None,
        }
    }
}

/// A keyed single-block cipher. Modes of operation live with their callers.
pub enum BlockCipher {
    Twofish(Box<Twofish>),
    Aes256(Box<Aes256>),
}

impl BlockCipher {
    pub fn new(selector: CipherSelector, key: &[u8; KEY_LEN]) -> Self {
        match selector {
            CipherSelector::Twofish => {
                BlockCipher::Twofish(Box::new(Twofish::new(GenericArray::from_slice(key))))
            }
            CipherSelector::Aes256 => {
                BlockCipher::Aes256(Box::new(Aes256::new(GenericArray::from_slice(key))))
            }
        }
    }

    pub fn selector(&self) -> CipherSelector {
        match self {
            BlockCipher::Twofish(_) => CipherSelector::Twofish,
            BlockCipher::Aes256(_) => CipherSelector::Aes256,
        }
    }

    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            BlockCipher::Twofish(c) => c.encrypt_block(block),
            BlockCipher::Aes256(c) => c.encrypt_block(block),
        }
    }

    pub fn decrypt_block(&self, block: &mut [u8; BLOCK_LEN]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            BlockCipher::Twofish(c) => c.decrypt_block(block),
            BlockCipher::Aes256(c) => c.decrypt_block(block),
        }
    }
}
