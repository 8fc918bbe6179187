//! Key derivation and AEAD helpers shared by Pair-Setup, Pair-Verify, and the
//! established Companion channel (component C4).

pub mod srp;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha512;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("hkdf: invalid output length requested")]
    InvalidHkdfLength,
    #[error("aead seal failed")]
    SealFailed,
    #[error("aead open failed: authentication tag mismatch or corrupt ciphertext")]
    OpenFailed,
    #[error("key material has the wrong length")]
    InvalidKeyLength,
}

/// HKDF-SHA-512 with ASCII salt/info labels, producing exactly 32 bytes —
/// every key this crate derives (pair-setup encrypt/sign keys, pair-verify
/// channel keys) is a 32-byte ChaCha20-Poly1305 or Ed25519 key.
pub fn hkdf_sha512(salt: &str, info: &str, ikm: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt.as_bytes()), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info.as_bytes(), &mut okm)
        .map_err(|_| CryptoError::InvalidHkdfLength)?;
    Ok(okm)
}

/// Build the 12-byte nonce used during pairing: four zero bytes followed by
/// an 8-byte ASCII label (e.g. `"PS-Msg05"`).
fn pairing_nonce(label: &[u8; 8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(label);
    nonce
}

/// Build the 12-byte nonce used once the Companion channel is established:
/// a 96-bit little-endian frame counter.
fn counter_nonce(counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce
}

fn cipher_for(key: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
    if key.len() != 32 {
        return Err(CryptoError::InvalidKeyLength);
    }
    Ok(ChaCha20Poly1305::new(Key::from_slice(key)))
}

/// Seal `plaintext` with an 8-byte ASCII pairing label (`"PS-Msg05"`, etc.),
/// returning ciphertext with the 16-byte tag appended.
pub fn seal_with_label(key: &[u8], label: &[u8; 8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = pairing_nonce(label);
    cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::SealFailed)
}

/// Open ciphertext sealed by [`seal_with_label`].
pub fn open_with_label(key: &[u8], label: &[u8; 8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = pairing_nonce(label);
    cipher
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError::OpenFailed)
}

/// Seal `plaintext` with a 96-bit little-endian frame counter nonce, used for
/// every post-handshake Companion data frame.
pub fn seal_with_counter(key: &[u8], counter: u64, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = counter_nonce(counter);
    cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::SealFailed)
}

/// Open ciphertext sealed by [`seal_with_counter`].
pub fn open_with_counter(key: &[u8], counter: u64, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let nonce = counter_nonce(counter);
    cipher
        .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad: &[] })
        .map_err(|_| CryptoError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_seal_open_round_trip() {
        let key = [7u8; 32];
        let sealed = seal_with_label(&key, b"PS-Msg05", b"hello world").unwrap();
        let opened = open_with_label(&key, b"PS-Msg05", &sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn wrong_label_fails_to_open() {
        let key = [7u8; 32];
        let sealed = seal_with_label(&key, b"PS-Msg05", b"hello world").unwrap();
        assert!(open_with_label(&key, b"PS-Msg06", &sealed).is_err());
    }

    #[test]
    fn counter_nonces_differ_per_message() {
        let key = [9u8; 32];
        let a = seal_with_counter(&key, 0, b"same plaintext").unwrap();
        let b = seal_with_counter(&key, 1, b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert!(open_with_counter(&key, 0, &b).is_err());
    }
}
