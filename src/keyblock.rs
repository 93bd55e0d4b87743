//! Key blocks: one passphrase-derived wrapping of the container key pair.
//!
//! ```text
//! SALT (32) | ITERATIONS (4, LE) | WRAPPED CIPHER KEY (40) | WRAPPED AUTH KEY (40)
//! ```

use zeroize::Zeroize;

use crate::crypto::{
    BlockCipher, CipherSelector, KEY_LEN, SALT_LEN, TagExtension, WRAPPED_KEY_LEN, generate_salt,
    keywrap, secure_random, stretch,
};
use crate::error::Result;

const ITER_LEN: usize = 4;

/// The cipher key and the authentication key of one container.
///
/// Not `Clone`: the only copies are the explicit ones made by [`KeyPair::duplicate`].
pub struct KeyPair {
    cipher_key: [u8; KEY_LEN],
    auth_key: [u8; KEY_LEN],
}

impl KeyPair {
    pub fn from_bytes(cipher_key: [u8; KEY_LEN], auth_key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher_key,
            auth_key,
        }
    }

    pub fn generate() -> Result<Self> {
        let mut keys = Self::from_bytes([0u8; KEY_LEN], [0u8; KEY_LEN]);
        secure_random(&mut keys.cipher_key)?;
        secure_random(&mut keys.auth_key)?;
        Ok(keys)
    }

    pub fn cipher_key(&self) -> &[u8; KEY_LEN] {
        &self.cipher_key
    }

    pub fn auth_key(&self) -> &[u8; KEY_LEN] {
        &self.auth_key
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self::from_bytes(self.cipher_key, self.auth_key)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.auth_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("cipher_key", &"[REDACTED]")
            .field("auth_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBlock {
    salt: [u8; SALT_LEN],
    iterations: u32,
    wrapped_cipher_key: [u8; WRAPPED_KEY_LEN],
    wrapped_auth_key: [u8; WRAPPED_KEY_LEN],
}

impl KeyBlock {
    pub const LEN: usize = SALT_LEN + ITER_LEN + WRAPPED_KEY_LEN + WRAPPED_KEY_LEN;

    /// Wrap `keys` under `passphrase` with a fresh random salt.
    pub fn seal(
        passphrase: &str,
        iterations: u32,
        cipher: CipherSelector,
        extension: TagExtension,
        keys: &KeyPair,
    ) -> Result<Self> {
        let salt = generate_salt()?;
        let kek = derive_kek(&salt, passphrase, iterations, cipher, extension);
        let (wrapped_cipher_key, wrapped_auth_key) = wrap(keys, &kek);

        Ok(Self {
            salt,
            iterations,
            wrapped_cipher_key,
            wrapped_auth_key,
        })
    }

    /// Try `passphrase` against this block. `None` means "not this one".
    pub fn open(
        &self,
        passphrase: &str,
        cipher: CipherSelector,
        extension: TagExtension,
    ) -> Option<KeyPair> {
        let kek = derive_kek(&self.salt, passphrase, self.iterations, cipher, extension);
        self.unwrap(&kek)
    }

    /// Unwrap both keys with an already derived key-encryption cipher.
    pub fn unwrap(&self, kek: &BlockCipher) -> Option<KeyPair> {
        let cipher_key = keywrap::unwrap(kek, &self.wrapped_cipher_key)?;
        let auth_key = keywrap::unwrap(kek, &self.wrapped_auth_key)?;
        Some(KeyPair::from_bytes(*cipher_key, *auth_key))
    }

    pub fn salt(&self) -> &[u8; SALT_LEN] {
        &self.salt
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        let mut offset = 0;

        buf[offset..offset + SALT_LEN].copy_from_slice(&self.salt);
        offset += SALT_LEN;

        buf[offset..offset + ITER_LEN].copy_from_slice(&self.iterations.to_le_bytes());
        offset += ITER_LEN;

        buf[offset..offset + WRAPPED_KEY_LEN].copy_from_slice(&self.wrapped_cipher_key);
        offset += WRAPPED_KEY_LEN;

        buf[offset..].copy_from_slice(&self.wrapped_auth_key);
        buf
    }

    /// Returns `None` if fewer than [`KeyBlock::LEN`] bytes are available.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let data = data.get(..Self::LEN)?;
        let (salt, rest) = data.split_at(SALT_LEN);
        let (iterations, rest) = rest.split_at(ITER_LEN);
        let (wrapped_cipher_key, wrapped_auth_key) = rest.split_at(WRAPPED_KEY_LEN);

        Some(Self {
            salt: salt.try_into().ok()?,
            iterations: u32::from_le_bytes(iterations.try_into().ok()?),
            wrapped_cipher_key: wrapped_cipher_key.try_into().ok()?,
            wrapped_auth_key: wrapped_auth_key.try_into().ok()?,
        })
    }
}

/// Stretch the passphrase into a key-encryption key and key the cipher with it.
pub fn derive_kek(
    salt: &[u8; SALT_LEN],
    passphrase: &str,
    iterations: u32,
    cipher: CipherSelector,
    extension: TagExtension,
) -> BlockCipher {
    let tag = stretch(salt, passphrase, iterations, KEY_LEN, extension);
    let mut kek = [0u8; KEY_LEN];
    kek.copy_from_slice(&tag);
    let kek_cipher = BlockCipher::new(cipher, &kek);
    kek.zeroize();
    kek_cipher
}

pub fn wrap(keys: &KeyPair, kek: &BlockCipher) -> ([u8; WRAPPED_KEY_LEN], [u8; WRAPPED_KEY_LEN]) {
    (
        keywrap::wrap(kek, keys.cipher_key()),
        keywrap::wrap(kek, keys.auth_key()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXT: TagExtension = TagExtension::CounterV1;

    fn keys() -> KeyPair {
        KeyPair::from_bytes([1u8; KEY_LEN], [2u8; KEY_LEN])
    }

    #[test]
    fn seal_then_open_recovers_keys() {
        let block = KeyBlock::seal("pw", 8, CipherSelector::Twofish, EXT, &keys()).unwrap();
        let opened = block.open("pw", CipherSelector::Twofish, EXT).unwrap();
        assert_eq!(opened.cipher_key(), &[1u8; KEY_LEN]);
        assert_eq!(opened.auth_key(), &[2u8; KEY_LEN]);
    }

    #[test]
    fn wrong_passphrase_opens_nothing() {
        let block = KeyBlock::seal("pw", 8, CipherSelector::Aes256, EXT, &keys()).unwrap();
        assert!(block.open("PW", CipherSelector::Aes256, EXT).is_none());
    }

    #[test]
    fn wrong_cipher_opens_nothing() {
        let block = KeyBlock::seal("pw", 8, CipherSelector::Aes256, EXT, &keys()).unwrap();
        assert!(block.open("pw", CipherSelector::Twofish, EXT).is_none());
    }

    #[test]
    fn wrap_is_deterministic_for_a_tag() {
        let salt = [4u8; SALT_LEN];
        let a = derive_kek(&salt, "pw", 3, CipherSelector::Twofish, EXT);
        let b = derive_kek(&salt, "pw", 3, CipherSelector::Twofish, EXT);
        assert_eq!(wrap(&keys(), &a), wrap(&keys(), &b));
    }

    #[test]
    fn bytes_roundtrip() {
        let block = KeyBlock::seal("pw", 77, CipherSelector::Twofish, EXT, &keys()).unwrap();
        let bytes = block.to_bytes();
        assert_eq!(bytes.len(), 116);
        assert_eq!(&bytes[32..36], &77u32.to_le_bytes());
        assert_eq!(KeyBlock::from_bytes(&bytes), Some(block));
    }

    #[test]
    fn short_input_is_rejected() {
        assert!(KeyBlock::from_bytes(&[0u8; KeyBlock::LEN - 1]).is_none());
    }

    #[test]
    fn flipped_wrapped_field_fails() {
        let block = KeyBlock::seal("pw", 4, CipherSelector::Twofish, EXT, &keys()).unwrap();
        let mut bytes = block.to_bytes();
        bytes[KeyBlock::LEN - 1] ^= 0x80;
        let damaged = KeyBlock::from_bytes(&bytes).unwrap();
        assert!(damaged.open("pw", CipherSelector::Twofish, EXT).is_none());
    }

    #[test]
    fn debug_redacts_keys() {
        assert!(!format!("{:?}", keys()).contains("1, 1"));
    }
}
