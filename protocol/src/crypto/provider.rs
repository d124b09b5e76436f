//! The [`CryptoProvider`] seam.
//!
//! Components that hash, sign, or encrypt go through this trait rather than
//! calling the primitives directly, so an HSM-backed or instrumented
//! provider can be dropped in without touching protocol code.

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

use super::encryption::{decrypt_with_aad, encrypt_with_aad, random_bytes, EncryptionError};
use super::hash::sha256_hex;
use super::keys::{RelicKeypair, RelicPublicKey, RelicSignature};

/// Hashing, signing, and authenticated encryption.
pub trait CryptoProvider: Send + Sync {
    /// Hex-encoded digest of `data`. Used for fingerprints and proof hashes.
    fn hash(&self, data: &[u8]) -> String;

    /// Sign `data` with `key`.
    fn sign(&self, data: &[u8], key: &RelicKeypair) -> RelicSignature;

    /// Verify `signature` over `data` against `key`.
    fn verify(&self, data: &[u8], signature: &RelicSignature, key: &RelicPublicKey) -> bool;

    /// Fresh random symmetric key.
    fn generate_key(&self) -> [u8; AES_KEY_LENGTH];

    /// AEAD-encrypt `plaintext`, binding `aad`.
    fn aead_encrypt(
        &self,
        plaintext: &[u8],
        key: &[u8; AES_KEY_LENGTH],
        aad: &[u8],
    ) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError>;

    /// AEAD-decrypt `ciphertext`. Fails without output on any mismatch.
    fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8; AES_KEY_LENGTH],
        nonce: &[u8; AES_NONCE_LENGTH],
        aad: &[u8],
    ) -> Result<Vec<u8>, EncryptionError>;
}

/// SHA-256 + Ed25519 + AES-256-GCM.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCrypto;

impl CryptoProvider for StandardCrypto {
    fn hash(&self, data: &[u8]) -> String {
        sha256_hex(data)
    }

    fn sign(&self, data: &[u8], key: &RelicKeypair) -> RelicSignature {
        key.sign(data)
    }

    fn verify(&self, data: &[u8], signature: &RelicSignature, key: &RelicPublicKey) -> bool {
        key.verify(data, signature)
    }

    fn generate_key(&self) -> [u8; AES_KEY_LENGTH] {
        random_bytes::<AES_KEY_LENGTH>()
    }

    fn aead_encrypt(
        &self,
        plaintext: &[u8],
        key: &[u8; AES_KEY_LENGTH],
        aad: &[u8],
    ) -> Result<([u8; AES_NONCE_LENGTH], Vec<u8>), EncryptionError> {
        encrypt_with_aad(key, plaintext, aad)
    }

    fn aead_decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8; AES_KEY_LENGTH],
        nonce: &[u8; AES_NONCE_LENGTH],
        aad: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        decrypt_with_aad(key, nonce, ciphertext, aad)
    }
}
