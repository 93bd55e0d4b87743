//! RFC 3394 key wrap over a 128-bit block cipher.
//!
//! Wrapping a 32 byte key yields 40 bytes; the extra semiblock carries the
//! integrity check that `unwrap` verifies before releasing any key bytes.

use zeroize::{Zeroize, Zeroizing};

use super::{BLOCK_LEN, BlockCipher, KEY_LEN, WRAPPED_KEY_LEN, ct_eq};

const DEFAULT_IV: [u8; 8] = [0xA6; 8];
const SEMIBLOCK: usize = 8;
const N: usize = KEY_LEN / SEMIBLOCK;

pub fn wrap(kek: &BlockCipher, key: &[u8; KEY_LEN]) -> [u8; WRAPPED_KEY_LEN] {
    let mut a = DEFAULT_IV;
    let mut r = Zeroizing::new(*key);
    let mut b = [0u8; BLOCK_LEN];

    for j in 0..6u64 {
        for i in 0..N {
            b[..SEMIBLOCK].copy_from_slice(&a);
            b[SEMIBLOCK..].copy_from_slice(&r[i * SEMIBLOCK..(i + 1) * SEMIBLOCK]);
            kek.encrypt_block(&mut b);

            let t = N as u64 * j + (i as u64 + 1);
            a.copy_from_slice(&b[..SEMIBLOCK]);
            xor_counter(&mut a, t);
            r[i * SEMIBLOCK..(i + 1) * SEMIBLOCK].copy_from_slice(&b[SEMIBLOCK..]);
        }
    }
    b.zeroize();

    let mut out = [0u8; WRAPPED_KEY_LEN];
    out[..SEMIBLOCK].copy_from_slice(&a);
    out[SEMIBLOCK..].copy_from_slice(&r[..]);
    out
}

/// Returns `None` when the integrity check fails; no partial key escapes.
pub fn unwrap(kek: &BlockCipher, wrapped: &[u8; WRAPPED_KEY_LEN]) -> Option<Zeroizing<[u8; KEY_LEN]>> {
    let mut a = [0u8; SEMIBLOCK];
    a.copy_from_slice(&wrapped[..SEMIBLOCK]);
    let mut r = Zeroizing::new([0u8; KEY_LEN]);
    r.copy_from_slice(&wrapped[SEMIBLOCK..]);
    let mut b = [0u8; BLOCK_LEN];

    for j in (0..6u64).rev() {
        for i in (0..N).rev() {
            let t = N as u64 * j + (i as u64 + 1);
            xor_counter(&mut a, t);
            b[..SEMIBLOCK].copy_from_slice(&a);
            b[SEMIBLOCK..].copy_from_slice(&r[i * SEMIBLOCK..(i + 1) * SEMIBLOCK]);
            kek.decrypt_block(&mut b);

            a.copy_from_slice(&b[..SEMIBLOCK]);
            r[i * SEMIBLOCK..(i + 1) * SEMIBLOCK].copy_from_slice(&b[SEMIBLOCK..]);
        }
    }
    b.zeroize();

    ct_eq(&a, &DEFAULT_IV).then_some(r)
}

fn xor_counter(a: &mut [u8; SEMIBLOCK], t: u64) {
    for (x, y) in a.iter_mut().zip(t.to_be_bytes()) {
        *x ^= y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherSelector;
    use proptest::prelude::*;

    fn kek(selector: CipherSelector, seed: u8) -> BlockCipher {
        BlockCipher::new(selector, &[seed; KEY_LEN])
    }

    #[test]
    fn aes_matches_rfc3394_256_bit_vector() {
        let kek_bytes: [u8; 32] = core::array::from_fn(|i| i as u8);
        let kek = BlockCipher::new(CipherSelector::Aes256, &kek_bytes);
        let mut key = [0u8; 32];
        hex::decode_to_slice(
            "00112233445566778899aabbccddeeff000102030405060708090a0b0c0d0e0f",
            &mut key,
        )
        .unwrap();

        let wrapped = wrap(&kek, &key);
        assert_eq!(
            hex::encode(wrapped),
            "28c9f404c4b810f4cbccb35cfb87f8263f5786e2d80ed326cbc7f0e71a99f43bfb988b9b7a02dd21"
        );
        assert_eq!(*unwrap(&kek, &wrapped).unwrap(), key);
    }

    #[test]
    fn wrong_kek_fails_closed() {
        let wrapped = wrap(&kek(CipherSelector::Twofish, 1), &[9u8; 32]);
        assert!(unwrap(&kek(CipherSelector::Twofish, 2), &wrapped).is_none());
    }

    #[test]
    fn every_bit_flip_is_detected() {
        let kek = kek(CipherSelector::Aes256, 3);
        let wrapped = wrap(&kek, &[0x5a; 32]);
        for byte in 0..WRAPPED_KEY_LEN {
            let mut bad = wrapped;
            bad[byte] ^= 0x01;
            assert!(unwrap(&kek, &bad).is_none(), "flip at {byte} accepted");
        }
    }

    proptest! {
        #[test]
        fn unwrap_inverts_wrap(key in any::<[u8; 32]>(), seed in any::<u8>(), aes in any::<bool>()) {
            let selector = if aes { CipherSelector::Aes256 } else { CipherSelector::Twofish };
            let kek = kek(selector, seed);
            let wrapped = wrap(&kek, &key);
            prop_assert_eq!(*unwrap(&kek, &wrapped).unwrap(), key);
        }
    }
}
