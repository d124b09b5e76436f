//! # Protocol Configuration & Constants
//!
//! Every magic number in relic lives here: key sizes, domain-separation
//! contexts, format versions. If a signing payload or a KDF context string
//! shows up as a literal anywhere else, move it here.
//!
//! Changing a domain string after assets have been transferred invalidates
//! every signature produced under the old one. Bump the version suffix
//! instead of editing in place.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Format Versions
// ---------------------------------------------------------------------------

/// Crate-level protocol version, reported by the CLI and embedded in
/// certificates.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Version of the secure transfer package layout. Receivers reject packages
/// with a version they do not understand.
pub const PACKAGE_FORMAT_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 secret key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// X25519 key length (both halves) in bytes.
pub const DELIVERY_KEY_LENGTH: usize = 32;

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. 96 bits, the only size worth using.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Digest length for both SHA-256 and BLAKE3.
pub const HASH_OUTPUT_LENGTH: usize = 32;

/// Content fingerprints use SHA-256 so that third parties can recompute
/// them with whatever tooling they already have.
pub const FINGERPRINT_ALGORITHM: &str = "SHA-256";

// ---------------------------------------------------------------------------
// Domain Separation
// ---------------------------------------------------------------------------

/// Signing domain for deletion proofs.
pub const DOMAIN_DELETION_PROOF: &str = "relic/deletion-proof/v1";

/// Signing domain for encrypted payloads.
pub const DOMAIN_ENCRYPTED_PAYLOAD: &str = "relic/encrypted-payload/v1";

/// Signing domain for the outer transfer package.
pub const DOMAIN_TRANSFER_PACKAGE: &str = "relic/transfer-package/v1";

/// Signing domain for ownership certificates.
pub const DOMAIN_CERTIFICATE: &str = "relic/certificate/v1";

/// BLAKE3 `derive_key` context for wrapping package keys to a recipient.
pub const KDF_CONTEXT_KEY_WRAP: &str = "relic v1 package key wrap";

/// BLAKE3 `derive_key` context for ownership watermarks.
pub const KDF_CONTEXT_WATERMARK: &str = "relic v1 ownership watermark";

/// BLAKE3 `derive_key` context for ledger attestation identifiers.
pub const KDF_CONTEXT_ATTESTATION: &str = "relic v1 transfer attestation";

/// BLAKE3 `derive_key` context for local ledger transaction references.
pub const KDF_CONTEXT_LEDGER_TX: &str = "relic v1 local ledger tx";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// How the deletion step removes the seller's copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletionMode {
    /// Move content and metadata out of the live view into quarantine.
    /// Purged once the ledger confirms the transfer; restorable through
    /// manual reconciliation if the transfer fails afterwards.
    #[default]
    Quarantine,
    /// Delete immediately. Nothing to restore if later steps fail.
    Hard,
}

/// Tunables for the transfer and provenance subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Anchor registrations and transfers on the external ledger.
    pub anchor_on_ledger: bool,

    /// How deletion proofs remove the seller's copy.
    pub deletion_mode: DeletionMode,

    /// Base URL of a ledger explorer. Certificates link each anchored
    /// transfer as `{url}/tx/{tx_ref}` when set.
    pub ledger_explorer_url: Option<String>,

    /// Human-readable issuer name printed on certificates.
    pub certificate_issuer: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            anchor_on_ledger: true,
            deletion_mode: DeletionMode::Quarantine,
            ledger_explorer_url: None,
            certificate_issuer: "relic provenance service".to_string(),
        }
    }
}

impl ProtocolConfig {
    /// Config used by unit tests and local tooling: no explorer, anchoring on.
    pub fn local() -> Self {
        Self::default()
    }

    /// Builder-style toggle for ledger anchoring.
    pub fn with_anchoring(mut self, anchor: bool) -> Self {
        self.anchor_on_ledger = anchor;
        self
    }

    /// Builder-style setter for the deletion mode.
    pub fn with_deletion_mode(mut self, mode: DeletionMode) -> Self {
        self.deletion_mode = mode;
        self
    }

    /// Builder-style setter for the explorer URL.
    pub fn with_explorer(mut self, url: impl Into<String>) -> Self {
        self.ledger_explorer_url = Some(url.into());
        self
    }

    /// Explorer link for a ledger transaction, if an explorer is configured.
    pub fn explorer_link(&self, tx_ref: &str) -> Option<String> {
        self.ledger_explorer_url
            .as_ref()
            .map(|base| format!("{}/tx/{}", base.trim_end_matches('/'), tx_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_quarantines_and_anchors() {
        let cfg = ProtocolConfig::default();
        assert!(cfg.anchor_on_ledger);
        assert_eq!(cfg.deletion_mode, DeletionMode::Quarantine);
        assert!(cfg.ledger_explorer_url.is_none());
    }

    #[test]
    fn explorer_link_strips_trailing_slash() {
        let cfg = ProtocolConfig::default().with_explorer("https://explorer.example/");
        assert_eq!(
            cfg.explorer_link("abc").as_deref(),
            Some("https://explorer.example/tx/abc")
        );
        assert!(ProtocolConfig::default().explorer_link("abc").is_none());
    }

    #[test]
    fn domains_are_distinct() {
        let domains = [
            DOMAIN_DELETION_PROOF,
            DOMAIN_ENCRYPTED_PAYLOAD,
            DOMAIN_TRANSFER_PACKAGE,
            DOMAIN_CERTIFICATE,
        ];
        for (i, a) in domains.iter().enumerate() {
            for b in &domains[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn config_serde_roundtrip_uses_snake_case() {
        let cfg = ProtocolConfig::default().with_deletion_mode(DeletionMode::Hard);
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"hard\""));
        let back: ProtocolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
