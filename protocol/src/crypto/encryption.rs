//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for asset content and wrapped package keys.
//!
//! Nonces are 96-bit values drawn from the OS RNG. Every package gets a fresh
//! key, so a key never sees more than a couple of nonces and the birthday
//! bound is not a practical concern.
//!
//! Two shapes are offered:
//!
//! - [`seal`] / [`open`] pack `nonce || ciphertext` into one buffer, used for
//!   small wrapped keys.
//! - [`encrypt_with_aad`] / [`decrypt_with_aad`] keep the nonce separate and
//!   authenticate extra data, used for content where the watermark rides
//!   along as AAD.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur during encryption/decryption.
///
/// Deliberately vague: "wrong key" and "tampered ciphertext" look the same
/// from the outside.
#[derive(Debug, Error)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes")]
    InvalidKeyLength,

    #[error("ciphertext too short: must be at least {AES_NONCE_LENGTH} bytes")]
    CiphertextTooShort,
}

/// Generate `N` random bytes from the OS RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext`.
///
/// ```
/// use relic_protocol::crypto::encryption::{open, seal};
///
/// let key = [0x42u8; 32];
/// let sealed = seal(&key, b"package key").unwrap();
/// assert_eq!(open(&key, &sealed).unwrap(), b"package key");
/// ```
pub fn seal(key: &[u8; AES_KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let (nonce, ciphertext) = encrypt_with_aad(key, plaintext, &[])?;
    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a buffer produced by [`seal`].
pub fn open(key: &[u8; AES_KEY_LENGTH], data: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    if data.len() < AES_NONCE_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }
    let (nonce_bytes, ciphertext) = data.split_at(AES_NONCE_LENGTH);
    let nonce: [u8; AES_NONCE_LENGTH] = nonce_bytes
        .try_into()
        .map_err(|_| EncryptionError::CiphertextTooShort)?;
    decrypt_with_aad(key, &nonce, ciphertext, &[])
}

/// Encrypt with additional authenticated data.
///
/// Returns `(nonce, ciphertext)`; the ciphertext carries the 16-byte tag.
/// The same AAD must be supplied at decryption time.
pub fn encrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;
    let nonce_bytes = random_bytes::<AES_NONCE_LENGTH>();
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    Ok((nonce_bytes, ciphertext))
}

/// Decrypt ciphertext produced by [`encrypt_with_aad`].
pub fn decrypt_with_aad(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::InvalidKeyLength)?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}
