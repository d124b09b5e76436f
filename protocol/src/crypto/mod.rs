//! # Cryptographic Primitives
//!
//! Everything security-related flows through here: fingerprints, proof
//! signatures, content encryption, package key delivery.
//!
//! - **Ed25519** for signatures: deletion proofs, packages, certificates.
//! - **X25519** for delivering package keys to a buyer.
//! - **AES-256-GCM** for content and key wrapping.
//! - **SHA-256** for fingerprints third parties must recompute.
//! - **BLAKE3** for identifiers and KDFs we derive ourselves.
//!
//! Thin, typed wrappers around audited crates. Nothing here is novel, and
//! it should stay that way.

pub mod canonical;
pub mod encryption;
pub mod hash;
pub mod keys;
pub mod provider;
pub mod sealing;

pub use canonical::canonical_payload;
pub use hash::{blake3_hash, domain_separated_hash, sha256, sha256_hex};
pub use keys::{KeyError, RelicKeypair, RelicPublicKey, RelicSignature};
pub use provider::{CryptoProvider, StandardCrypto};
pub use sealing::{seal_to, DeliveryKeypair, DeliveryPublicKey, SealedKey};
