//! # Hashing Utilities
//!
//! Two hash functions, each with a job:
//!
//! - **SHA-256** for anything a third party must recompute: content
//!   fingerprints, metadata hashes, deletion-proof digests. Every language
//!   and every command line ships it.
//! - **BLAKE3** for identifiers we derive ourselves: ledger transaction
//!   references, attestation ids, watermark tags. Domain separation comes
//!   for free through `derive_key` mode.

use sha2::{Digest, Sha256};

use crate::config::HASH_OUTPUT_LENGTH;

/// SHA-256 of `data` as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; HASH_OUTPUT_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut output = [0u8; HASH_OUTPUT_LENGTH];
    output.copy_from_slice(&result);
    output
}

/// SHA-256 of `data`, hex-encoded. This is the fingerprint format stored in
/// proofs and chains.
///
/// ```
/// use relic_protocol::crypto::hash::sha256_hex;
///
/// assert_eq!(
///     sha256_hex(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// BLAKE3 of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; HASH_OUTPUT_LENGTH] {
    *blake3::hash(data).as_bytes()
}

/// Domain-separated BLAKE3 using `derive_key` mode.
///
/// `domain_separated_hash("a", x)` and `domain_separated_hash("b", x)` can
/// never collide. Don't prepend a tag by hand; `derive_key` uses a distinct
/// IV per context string.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; HASH_OUTPUT_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Domain-separated BLAKE3 over several parts without concatenating them
/// first. Parts are length-prefixed so `("ab", "c")` and `("a", "bc")`
/// produce different digests.
pub fn domain_separated_hash_parts(context: &str, parts: &[&[u8]]) -> [u8; HASH_OUTPUT_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
