//! # Package Key Sealing
//!
//! Delivers the one-time package key to exactly one buyer.
//!
//! Each buyer publishes a long-lived X25519 *delivery key*. To seal, the
//! seller generates an ephemeral X25519 secret, runs Diffie-Hellman against
//! the buyer's delivery key, derives a wrapping key with BLAKE3 `derive_key`,
//! and AES-GCM-encrypts the package key under it. Only the holder of the
//! delivery secret can redo the DH and unwrap.
//!
//! ## Key derivation
//!
//! ```text
//! wrap_key = BLAKE3-derive-key(
//!     context = KDF_CONTEXT_KEY_WRAP,
//!     input   = shared_secret || ephemeral_public || recipient_public
//! )
//! ```
//!
//! Unlike a symmetric handshake the roles here are fixed (sender is always
//! ephemeral, recipient is always static), so the public keys are not sorted.

use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::canonical::hex_bytes;
use super::encryption::{open, seal};
use crate::config::{AES_KEY_LENGTH, DELIVERY_KEY_LENGTH, KDF_CONTEXT_KEY_WRAP};

/// Errors while sealing or unsealing a package key.
#[derive(Debug, Error)]
pub enum SealingError {
    #[error("invalid delivery key encoding")]
    InvalidKey,

    #[error("package key could not be unsealed -- not addressed to this delivery key")]
    UnsealFailed,

    #[error("package key wrapping failed")]
    WrapFailed,
}

/// A buyer's long-lived X25519 delivery keypair.
pub struct DeliveryKeypair {
    secret: StaticSecret,
    public: PublicKey,
}

/// The public half of a [`DeliveryKeypair`]; what a buyer hands to sellers.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPublicKey([u8; DELIVERY_KEY_LENGTH]);

/// A package key wrapped for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    /// The sender's ephemeral X25519 public key.
    pub ephemeral_public: DeliveryPublicKey,
    /// Recipient's delivery key the package was sealed to.
    pub recipient: DeliveryPublicKey,
    /// `nonce || AES-GCM(wrap_key, package_key)`.
    #[serde(with = "hex_bytes")]
    pub wrapped: Vec<u8>,
}

impl DeliveryKeypair {
    /// Generate a fresh delivery keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a keypair from its 32 secret bytes.
    pub fn from_bytes(bytes: [u8; DELIVERY_KEY_LENGTH]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Parse a hex-encoded delivery secret.
    pub fn from_hex(s: &str) -> Result<Self, SealingError> {
        let bytes = hex::decode(s.trim()).map_err(|_| SealingError::InvalidKey)?;
        let arr: [u8; DELIVERY_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SealingError::InvalidKey)?;
        Ok(Self::from_bytes(arr))
    }

    /// Export the delivery secret as hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    /// The shareable public half.
    pub fn public_key(&self) -> DeliveryPublicKey {
        DeliveryPublicKey(self.public.to_bytes())
    }

    /// Unwrap a package key sealed to this delivery key.
    pub fn unseal(&self, sealed: &SealedKey) -> Result<[u8; AES_KEY_LENGTH], SealingError> {
        if sealed.recipient != self.public_key() {
            return Err(SealingError::UnsealFailed);
        }
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(sealed.ephemeral_public.0));
        let wrap_key = derive_wrap_key(
            shared.as_bytes(),
            &sealed.ephemeral_public.0,
            &self.public.to_bytes(),
        );
        let key = open(&wrap_key, &sealed.wrapped).map_err(|_| SealingError::UnsealFailed)?;
        key.as_slice()
            .try_into()
            .map_err(|_| SealingError::UnsealFailed)
    }
}

impl fmt::Debug for DeliveryKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeliveryKeypair(pub={})", self.public_key().to_hex())
    }
}

impl DeliveryPublicKey {
    /// Wrap raw X25519 public key bytes.
    pub fn from_bytes(bytes: [u8; DELIVERY_KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse hex.
    pub fn from_hex(s: &str) -> Result<Self, SealingError> {
        let bytes = hex::decode(s.trim()).map_err(|_| SealingError::InvalidKey)?;
        let arr: [u8; DELIVERY_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SealingError::InvalidKey)?;
        Ok(Self(arr))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; DELIVERY_KEY_LENGTH] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for DeliveryPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeliveryPublicKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for DeliveryPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for DeliveryPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for DeliveryPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Wrap `key` so that only the holder of `recipient`'s delivery secret can
/// recover it. The ephemeral secret is consumed here and never stored.
pub fn seal_to(
    recipient: &DeliveryPublicKey,
    key: &[u8; AES_KEY_LENGTH],
) -> Result<SealedKey, SealingError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.0));
    let wrap_key = derive_wrap_key(shared.as_bytes(), ephemeral_public.as_bytes(), &recipient.0);
    let wrapped = seal(&wrap_key, key).map_err(|_| SealingError::WrapFailed)?;

    Ok(SealedKey {
        ephemeral_public: DeliveryPublicKey(ephemeral_public.to_bytes()),
        recipient: *recipient,
        wrapped,
    })
}

fn derive_wrap_key(
    shared_secret: &[u8; 32],
    ephemeral_public: &[u8; 32],
    recipient_public: &[u8; 32],
) -> [u8; AES_KEY_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_KEY_WRAP);
    hasher.update(shared_secret);
    hasher.update(ephemeral_public);
    hasher.update(recipient_public);

    let mut key = [0u8; AES_KEY_LENGTH];
    hasher.finalize_xof().fill(&mut key);
    key
}
