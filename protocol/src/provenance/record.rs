//! Ownership records and the append-only chain they form.
//!
//! Chain invariants, checked on every append and by [`ProvenanceChain::validate`]:
//!
//! - versions are contiguous, starting at 1;
//! - only the first record is a `Creation`, and it has no previous owner;
//! - `records[i].owner == records[i + 1].previous_owner`;
//! - every record carries the chain's asset id;
//! - a deletion proof hash appears at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RelicError, Result};
use crate::ledger::TxRef;

/// How an ownership change came about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Creation,
    Marketplace,
    Direct,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferKind::Creation => "creation",
            TransferKind::Marketplace => "marketplace",
            TransferKind::Direct => "direct",
        })
    }
}

/// One entry in an asset's ownership history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub asset_id: String,
    pub owner: String,
    pub previous_owner: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub ledger_tx_ref: Option<TxRef>,
    pub transfer_kind: TransferKind,
    pub deletion_proof_hash: Option<String>,
    /// Session that produced this record, for marketplace transfers.
    pub transfer_id: Option<String>,
    /// 1-based position in the chain.
    pub version: u32,
}

/// Append-only ownership history of one asset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceChain {
    pub asset_id: String,
    pub records: Vec<OwnershipRecord>,
    /// SHA-256 (hex) of the content at registration. Never changes.
    pub content_fingerprint: String,
    /// Whether the registration was anchored on the external ledger.
    pub ledger_anchored: bool,
    pub created_at: DateTime<Utc>,
}

impl ProvenanceChain {
    /// New chain with a single `Creation` record.
    pub fn new(
        asset_id: impl Into<String>,
        owner: impl Into<String>,
        content_fingerprint: impl Into<String>,
        registration_tx: Option<TxRef>,
    ) -> Self {
        let asset_id = asset_id.into();
        let now = Utc::now();
        let ledger_anchored = registration_tx.is_some();
        Self {
            records: vec![OwnershipRecord {
                asset_id: asset_id.clone(),
                owner: owner.into(),
                previous_owner: None,
                timestamp: now,
                ledger_tx_ref: registration_tx,
                transfer_kind: TransferKind::Creation,
                deletion_proof_hash: None,
                transfer_id: None,
                version: 1,
            }],
            asset_id,
            content_fingerprint: content_fingerprint.into(),
            ledger_anchored,
            created_at: now,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn current_owner(&self) -> Option<&str> {
        self.records.last().map(|r| r.owner.as_str())
    }

    pub fn creator(&self) -> Option<&str> {
        self.records.first().map(|r| r.owner.as_str())
    }

    /// Version the next appended record must carry.
    pub fn next_version(&self) -> u32 {
        self.records.len() as u32 + 1
    }

    pub fn contains_proof(&self, proof_hash: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.deletion_proof_hash.as_deref() == Some(proof_hash))
    }

    /// Most recent record that was anchored on the ledger.
    pub fn last_anchored(&self) -> Option<&OwnershipRecord> {
        self.records.iter().rev().find(|r| r.ledger_tx_ref.is_some())
    }

    /// Append `record`, enforcing the chain invariants.
    pub fn append(&mut self, record: OwnershipRecord) -> Result<()> {
        if record.asset_id != self.asset_id {
            return Err(RelicError::Verification(format!(
                "record for {} appended to chain of {}",
                record.asset_id, self.asset_id
            )));
        }
        if record.version != self.next_version() {
            return Err(RelicError::Conflict(format!(
                "provenance chain {} at version {}, record has {}",
                self.asset_id,
                self.records.len(),
                record.version
            )));
        }
        if record.transfer_kind == TransferKind::Creation {
            return Err(RelicError::state("creation record", "a transfer record"));
        }
        if record.previous_owner.as_deref() != self.current_owner() {
            return Err(RelicError::Verification(format!(
                "previous owner {:?} is not current owner {:?}",
                record.previous_owner,
                self.current_owner()
            )));
        }
        if let Some(hash) = &record.deletion_proof_hash {
            if self.contains_proof(hash) {
                return Err(RelicError::state(
                    "deletion proof already recorded",
                    "an unrecorded deletion proof",
                ));
            }
        }
        self.records.push(record);
        Ok(())
    }

    /// Check every invariant. Returns one message per violation.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let Some(first) = self.records.first() else {
            issues.push("chain has no records".to_string());
            return issues;
        };
        if first.transfer_kind != TransferKind::Creation || first.previous_owner.is_some() {
            issues.push("first record is not a creation record".to_string());
        }

        let mut seen_proofs = std::collections::HashSet::new();
        for (i, record) in self.records.iter().enumerate() {
            if record.version as usize != i + 1 {
                issues.push(format!("record {} has version {}", i, record.version));
            }
            if record.asset_id != self.asset_id {
                issues.push(format!("record {} belongs to {}", i, record.asset_id));
            }
            if i > 0 && record.transfer_kind == TransferKind::Creation {
                issues.push(format!("record {} is a second creation", i));
            }
            if let Some(hash) = &record.deletion_proof_hash {
                if !seen_proofs.insert(hash.as_str()) {
                    issues.push(format!("record {} repeats a deletion proof", i));
                }
            }
        }
        for pair in self.records.windows(2) {
            if pair[1].previous_owner.as_deref() != Some(pair[0].owner.as_str()) {
                issues.push(format!(
                    "version {} previous owner {:?} does not match version {} owner {}",
                    pair[1].version, pair[1].previous_owner, pair[0].version, pair[0].owner
                ));
            }
        }
        issues
    }
}
