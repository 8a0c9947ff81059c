use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key or IV length for CFB mode: {0}")]
    InvalidLength(#[from] cipher::InvalidLength),
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_parts(data_parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in data_parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

pub fn hmac_sha256(key: &[u8], data_parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC-SHA256 can accept any key size");
    for part in data_parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Constant-time equality for MACs and hash commitments.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Encrypts `buf` in place with AES-128 in full-block CFB mode.
pub fn aes_128_cfb_encrypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CipherError> {
    cfb_mode::Encryptor::<Aes128>::new_from_slices(key, iv)?.encrypt(buf);
    Ok(())
}

pub fn aes_128_cfb_decrypt(key: &[u8], iv: &[u8], buf: &mut [u8]) -> Result<(), CipherError> {
    cfb_mode::Decryptor::<Aes128>::new_from_slices(key, iv)?.decrypt(buf);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cfb_round_trip_on_unaligned_length() {
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let original: Vec<u8> = (0..40).collect();

        let mut buf = original.clone();
        aes_128_cfb_encrypt(&key, &iv, &mut buf).unwrap();
        assert_ne!(buf, original);

        aes_128_cfb_decrypt(&key, &iv, &mut buf).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn test_cfb_rejects_bad_key_length() {
        let mut buf = [0u8; 8];
        assert!(aes_128_cfb_encrypt(&[0u8; 15], &[0u8; 16], &mut buf).is_err());
    }

    #[test]
    fn test_sha256_parts_matches_concatenation() {
        assert_eq!(sha256_parts(&[b"ab", b"cd"]), sha256(b"abcd"));
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }
}
