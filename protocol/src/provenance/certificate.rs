//! # Ownership Certificates
//!
//! A certificate is a signed snapshot of one provenance chain plus the
//! result of verifying it at issue time. Anyone holding the issuer's public
//! key can check it offline with [`Certificate::verify_signature`].
//!
//! ## Signed payload
//!
//! ```text
//! canonical_payload("relic/certificate/v1", [
//!     asset_id, creator, current_owner, fingerprint,
//!     verified ("true" | "false"),
//!     issued_at (unix millis, decimal),
//!     n (entry count, decimal),
//!     entry_1 fields, ..., entry_n fields,
//! ])
//! ```
//!
//! Each entry contributes six fields: version, timestamp millis, from, to,
//! kind, tx_ref. Absent values are empty fields. Every field is length
//! prefixed, so owner ids may contain any bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::info;

use super::ledger::ProvenanceLedger;
use super::record::{OwnershipRecord, TransferKind};
use crate::config::{ProtocolConfig, DOMAIN_CERTIFICATE, FINGERPRINT_ALGORITHM, PROTOCOL_VERSION};
use crate::crypto::canonical::canonical_payload;
use crate::crypto::keys::{RelicKeypair, RelicPublicKey, RelicSignature};
use crate::error::Result;
use crate::ledger::TxRef;

/// One line of a certificate's transfer history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEntry {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub from: Option<String>,
    pub to: String,
    pub kind: TransferKind,
    pub ledger_tx_ref: Option<TxRef>,
    /// Explorer URL for `ledger_tx_ref`. Informational, not signed.
    pub ledger_link: Option<String>,
}

impl CertificateEntry {
    fn from_record(record: &OwnershipRecord, config: &ProtocolConfig) -> Self {
        Self {
            version: record.version,
            timestamp: record.timestamp,
            from: record.previous_owner.clone(),
            to: record.owner.clone(),
            kind: record.transfer_kind,
            ledger_link: record
                .ledger_tx_ref
                .as_ref()
                .and_then(|tx| config.explorer_link(tx.as_str())),
            ledger_tx_ref: record.ledger_tx_ref.clone(),
        }
    }

    fn signed_fields(&self) -> [String; 6] {
        [
            self.version.to_string(),
            self.timestamp.timestamp_millis().to_string(),
            self.from.clone().unwrap_or_default(),
            self.to.clone(),
            self.kind.to_string(),
            self.ledger_tx_ref
                .as_ref()
                .map(|tx| tx.as_str().to_string())
                .unwrap_or_default(),
        ]
    }
}

/// Signed, human-auditable ownership certificate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub asset_id: String,
    pub creator: String,
    pub current_owner: String,
    pub history: Vec<CertificateEntry>,
    pub content_fingerprint: String,
    pub fingerprint_algorithm: String,
    pub ledger_anchored: bool,
    /// Outcome of the provenance check run when the certificate was issued.
    pub verified: bool,
    pub verification_errors: Vec<String>,
    pub last_verified: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub issuer: String,
    pub issuer_public_key: RelicPublicKey,
    pub protocol_version: String,
    pub signature: RelicSignature,
}

impl Certificate {
    /// The exact bytes covered by `signature`.
    pub fn signing_payload(&self) -> Vec<u8> {
        let verified = if self.verified { "true" } else { "false" };
        let issued = self.issued_at.timestamp_millis().to_string();
        let count = self.history.len().to_string();
        let entries: Vec<[String; 6]> = self.history.iter().map(CertificateEntry::signed_fields).collect();

        let mut fields: Vec<&[u8]> = vec![
            self.asset_id.as_bytes(),
            self.creator.as_bytes(),
            self.current_owner.as_bytes(),
            self.content_fingerprint.as_bytes(),
            verified.as_bytes(),
            issued.as_bytes(),
            count.as_bytes(),
        ];
        fields.extend(entries.iter().flatten().map(|f| f.as_bytes()));
        canonical_payload(DOMAIN_CERTIFICATE, &fields)
    }

    pub fn verify_signature(&self) -> bool {
        self.issuer_public_key
            .verify(&self.signing_payload(), &self.signature)
    }

    /// Plain-text rendering for humans.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(out, "OWNERSHIP CERTIFICATE");
        let _ = writeln!(out, "=====================");
        let _ = writeln!(out, "Asset:          {}", self.asset_id);
        let _ = writeln!(out, "Creator:        {}", self.creator);
        let _ = writeln!(out, "Current owner:  {}", self.current_owner);
        let _ = writeln!(
            out,
            "Fingerprint:    {} ({})",
            self.content_fingerprint, self.fingerprint_algorithm
        );
        let _ = writeln!(
            out,
            "Ledger:         {}",
            if self.ledger_anchored { "anchored" } else { "not anchored" }
        );
        let _ = writeln!(
            out,
            "Verified:       {} (checked {})",
            if self.verified { "yes" } else { "NO" },
            self.last_verified.to_rfc3339()
        );
        for error in &self.verification_errors {
            let _ = writeln!(out, "  ! {}", error);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Transfer history");
        let _ = writeln!(out, "----------------");
        for entry in &self.history {
            let _ = write!(
                out,
                "#{} {} {} {} -> {}",
                entry.version,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                entry.kind,
                entry.from.as_deref().unwrap_or("-"),
                entry.to
            );
            match (&entry.ledger_link, &entry.ledger_tx_ref) {
                (Some(link), _) => {
                    let _ = write!(out, "  [{}]", link);
                }
                (None, Some(tx)) => {
                    let _ = write!(out, "  [tx {}]", tx);
                }
                (None, None) => {}
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Issued {} by {}", self.issued_at.to_rfc3339(), self.issuer);
        let _ = writeln!(out, "Issuer key:     {}", self.issuer_public_key.to_hex());
        let _ = writeln!(out, "Signature:      {}", self.signature.to_hex());
        let _ = writeln!(out, "Protocol:       relic {}", self.protocol_version);
        out
    }
}

/// Issues certificates for chains held by a [`ProvenanceLedger`].
pub struct CertificateGenerator {
    provenance: Arc<ProvenanceLedger>,
    issuer: RelicKeypair,
    config: ProtocolConfig,
}

impl CertificateGenerator {
    pub fn new(provenance: Arc<ProvenanceLedger>, issuer: RelicKeypair, config: ProtocolConfig) -> Self {
        Self {
            provenance,
            issuer,
            config,
        }
    }

    pub fn issuer_public_key(&self) -> RelicPublicKey {
        self.issuer.public_key()
    }

    /// Certificate for `asset_id`, or `None` if it has no chain.
    pub async fn generate(&self, asset_id: &str) -> Result<Option<Certificate>> {
        self.generate_with_content(asset_id, None).await
    }

    /// As [`generate`](Self::generate), also checking `content` against the
    /// registered fingerprint.
    pub async fn generate_with_content(
        &self,
        asset_id: &str,
        content: Option<&[u8]>,
    ) -> Result<Option<Certificate>> {
        let Some(chain) = self.provenance.get_chain(asset_id)? else {
            return Ok(None);
        };
        let verification = self.provenance.verify_provenance(asset_id, content).await?;

        let history: Vec<CertificateEntry> = chain
            .records
            .iter()
            .map(|r| CertificateEntry::from_record(r, &self.config))
            .collect();

        let mut certificate = Certificate {
            asset_id: chain.asset_id.clone(),
            creator: chain.creator().unwrap_or_default().to_string(),
            current_owner: chain.current_owner().unwrap_or_default().to_string(),
            history,
            content_fingerprint: chain.content_fingerprint.clone(),
            fingerprint_algorithm: FINGERPRINT_ALGORITHM.to_string(),
            ledger_anchored: chain.ledger_anchored,
            verified: verification.verified,
            verification_errors: verification.errors.iter().map(ToString::to_string).collect(),
            last_verified: verification.checked_at,
            issued_at: Utc::now(),
            issuer: self.config.certificate_issuer.clone(),
            issuer_public_key: self.issuer.public_key(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            signature: RelicSignature::from_bytes([0u8; 64]),
        };
        certificate.signature = self.issuer.sign(&certificate.signing_payload());

        info!(
            asset_id = %asset_id,
            verified = certificate.verified,
            entries = certificate.history.len(),
            "certificate issued"
        );
        Ok(Some(certificate))
    }
}
