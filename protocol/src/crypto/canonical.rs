//! # Canonical Signing Payloads
//!
//! Every signature in relic is computed over bytes produced by
//! [`canonical_payload`]. One encoding, fully enumerated per signature type,
//! so a verifier never has to guess which bytes the signer saw.
//!
//! ## Layout
//!
//! ```text
//! domain (UTF-8) || 0x00 || for each field: u32_be(len) || field bytes
//! ```
//!
//! Length prefixes make the encoding injective: no pair of different field
//! lists can produce the same bytes, regardless of what characters the
//! fields contain. The domain string keeps a deletion-proof signature from
//! ever verifying as a package signature.

use serde::{Deserialize, Deserializer, Serializer};

/// Build the canonical byte string for `fields` under `domain`.
pub fn canonical_payload(domain: &str, fields: &[&[u8]]) -> Vec<u8> {
    let body: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut out = Vec::with_capacity(domain.len() + 1 + body);
    out.extend_from_slice(domain.as_bytes());
    out.push(0x00);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Serde adapter: `Vec<u8>` as a lowercase hex string.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `[u8; N]` as a lowercase hex string.
pub mod hex_array {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}
