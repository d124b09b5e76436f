//! The external ledger contract.
//!
//! Relic never talks to a chain directly. Registration and transfer
//! anchoring go through [`LedgerClient`], which a deployment backs with
//! whatever RPC client it has. Timeouts and retries on the wire are the
//! client's business; this crate only sees `Ok(TxRef)` or `RelicError::Ledger`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::KDF_CONTEXT_ATTESTATION;
use crate::crypto::hash::domain_separated_hash_parts;
use crate::error::Result;

// ---------------------------------------------------------------------------
// TxRef
// ---------------------------------------------------------------------------

/// Opaque reference to a ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(String);

impl TxRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TxRef {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// TransferAttestation
// ---------------------------------------------------------------------------

/// What gets anchored on the ledger for one ownership change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAttestation {
    /// Transfer session id, or a synthetic id for direct hand-overs.
    pub transfer_id: String,
    pub asset_id: String,
    pub from_owner: String,
    pub to_owner: String,
    /// Hash of the seller's deletion proof. Absent for direct transfers.
    pub deletion_proof_hash: Option<String>,
    pub attested_at: DateTime<Utc>,
}

impl TransferAttestation {
    /// Deterministic identifier. Submitting the same attestation twice must
    /// yield the same ledger transaction, so `attested_at` is excluded.
    pub fn attestation_id(&self) -> String {
        let proof = self.deletion_proof_hash.as_deref().unwrap_or("");
        hex::encode(domain_separated_hash_parts(
            KDF_CONTEXT_ATTESTATION,
            &[
                self.transfer_id.as_bytes(),
                self.asset_id.as_bytes(),
                self.from_owner.as_bytes(),
                self.to_owner.as_bytes(),
                proof.as_bytes(),
            ],
        ))
    }
}

// ---------------------------------------------------------------------------
// Ledger Entries
// ---------------------------------------------------------------------------

/// The operation a ledger transaction carried.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOperation {
    Registration {
        owner: String,
        content_hash: String,
        metadata_hash: String,
        uri: Option<String>,
    },
    Transfer(TransferAttestation),
}

/// A transaction as stored by the ledger, returned for audits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tx_ref: TxRef,
    pub height: u64,
    pub asset_id: String,
    pub operation: LedgerOperation,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// LedgerClient
// ---------------------------------------------------------------------------

/// Narrow interface to the external, append-only ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Register an asset and its fingerprints under `owner`.
    async fn register_asset(
        &self,
        asset_id: &str,
        owner: &str,
        content_hash: &str,
        metadata_hash: &str,
        uri: Option<&str>,
    ) -> Result<TxRef>;

    /// Record an ownership change. Must be idempotent on
    /// [`TransferAttestation::attestation_id`].
    async fn record_transfer(
        &self,
        asset_id: &str,
        to_owner: &str,
        proof: &TransferAttestation,
    ) -> Result<TxRef>;

    async fn asset_exists(&self, asset_id: &str) -> Result<bool>;

    /// Current owner according to the ledger, `None` if unknown.
    async fn owner_of(&self, asset_id: &str) -> Result<Option<String>>;

    /// Whether `tx_ref` names a transaction the ledger has accepted.
    async fn verify_transaction(&self, tx_ref: &TxRef) -> Result<bool>;

    /// Full entry for `tx_ref`, if it exists.
    async fn transaction(&self, tx_ref: &TxRef) -> Result<Option<LedgerEntry>>;
}
