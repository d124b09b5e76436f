//! # Signing Keys
//!
//! Ed25519 keypairs for sellers, certificate issuers, and anyone else who
//! has to put their name on a proof.
//!
//! - Deterministic signatures (RFC 8032), so re-signing the same canonical
//!   payload yields byte-identical output. Tests lean on that.
//! - Key bytes are never logged. `Debug` prints the public half only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, SIGNING_KEY_LENGTH, VERIFYING_KEY_LENGTH};

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature encoding")]
    InvalidSignature,
}

/// An Ed25519 signing identity.
///
/// Deliberately not `Serialize`: exporting a secret key should be a
/// conscious call to [`RelicKeypair::to_hex`], not a side effect of
/// dumping a struct to JSON.
pub struct RelicKeypair {
    signing_key: SigningKey,
}

/// The public half of a [`RelicKeypair`]. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct RelicPublicKey {
    bytes: [u8; VERIFYING_KEY_LENGTH],
}

/// A 64-byte Ed25519 signature. Serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq)]
pub struct RelicSignature {
    bytes: [u8; SIGNATURE_LENGTH],
}

impl RelicKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Handy in tests; in
    /// production the seed must come from a CSPRNG or a proper KDF.
    pub fn from_seed(seed: &[u8; SIGNING_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parse a hex-encoded 32-byte secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SIGNING_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Export the secret key as hex. Handle with care.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// The public key for this identity.
    pub fn public_key(&self) -> RelicPublicKey {
        RelicPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign `message`.
    pub fn sign(&self, message: &[u8]) -> RelicSignature {
        RelicSignature {
            bytes: self.signing_key.sign(message).to_bytes(),
        }
    }
}

impl Clone for RelicKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for RelicKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelicKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// RelicPublicKey
// ---------------------------------------------------------------------------

impl RelicPublicKey {
    /// Wrap raw bytes after checking they decode to a curve point.
    pub fn from_bytes(bytes: [u8; VERIFYING_KEY_LENGTH]) -> Result<Self, KeyError> {
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        let arr: [u8; VERIFYING_KEY_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidPublicKey)?;
        Self::from_bytes(arr)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.bytes
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Verify `signature` over `message`. Strict verification; any decoding
    /// problem is simply `false`.
    pub fn verify(&self, message: &[u8], signature: &RelicSignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let sig = DalekSignature::from_bytes(&signature.bytes);
        verifying_key.verify_strict(message, &sig).is_ok()
    }
}

impl Hash for RelicPublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for RelicPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RelicPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelicPublicKey({})", &self.to_hex()[..16])
    }
}

impl Serialize for RelicPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RelicPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// RelicSignature
// ---------------------------------------------------------------------------

impl RelicSignature {
    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse a hex-encoded signature.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidSignature)?;
        let arr: [u8; SIGNATURE_LENGTH] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSignature)?;
        Ok(Self { bytes: arr })
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex, 128 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for RelicSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for RelicSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RelicSignature({}...)", &self.to_hex()[..16])
    }
}

impl Serialize for RelicSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for RelicSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
