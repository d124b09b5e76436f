//! # Transfer Sessions
//!
//! One [`TransferSession`] per transfer attempt. The state machine:
//!
//! ```text
//! Initiated -> Extracting -> Deleting -> CreatingPackage -> PendingConfirmation
//!           -> LedgerVerification -> Completed
//!
//! any non-terminal state -> Failed
//! ```
//!
//! `Extracting`, `Deleting` and `CreatingPackage` only exist for the
//! duration of one package-creation call, and `LedgerVerification` for one
//! ledger submission. They are persisted anyway, so a crash mid-pipeline
//! leaves a record of how far it got; `recover_interrupted` on the
//! coordinator fails such a session so it can be reconciled.
//!
//! `Completed` and `Failed` are terminal. A failed session is never resumed;
//! the operator reconciles it and a new session is initiated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::deletion::DeletionProof;
use super::package::SecureTransferPackage;
use crate::error::{RelicError, Result};
use crate::ledger::{TransferAttestation, TxRef};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Where a transfer is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Initiated,
    Extracting,
    Deleting,
    CreatingPackage,
    PendingConfirmation,
    LedgerVerification,
    Completed,
    Failed,
}

impl TransferStatus {
    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: TransferStatus) -> bool {
        use TransferStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Initiated, Extracting)
            | (Extracting, Deleting)
            | (Deleting, CreatingPackage)
            | (CreatingPackage, PendingConfirmation)
            | (PendingConfirmation, LedgerVerification)
            | (LedgerVerification, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    /// States that only exist while a coordinator call is running. A session
    /// found in one with no call in flight was interrupted.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            TransferStatus::Extracting
                | TransferStatus::Deleting
                | TransferStatus::CreatingPackage
                | TransferStatus::LedgerVerification
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferStatus::Initiated => "INITIATED",
            TransferStatus::Extracting => "EXTRACTING",
            TransferStatus::Deleting => "DELETING",
            TransferStatus::CreatingPackage => "CREATING_PACKAGE",
            TransferStatus::PendingConfirmation => "PENDING_CONFIRMATION",
            TransferStatus::LedgerVerification => "LEDGER_VERIFICATION",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Failure & Reconciliation
// ---------------------------------------------------------------------------

/// Why and where a session failed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Status the session was in when the error occurred.
    pub stage: TransferStatus,
    /// [`RelicError::kind`] of the error.
    pub kind: String,
    pub reason: String,
    /// Whether the error is one a caller may retry with a new session.
    pub retryable: bool,
    /// Whether the seller's bytes sat in quarantine at failure time.
    pub content_quarantined: bool,
    pub failed_at: DateTime<Utc>,
}

/// Manual resolution for a failed session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reconciliation {
    /// Put quarantined bytes back in the seller's live store.
    RestoreToSeller,
    /// Drop quarantined bytes for good.
    Purge,
}

/// What a reconciliation actually did.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Restored,
    Purged,
    NothingToRestore,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    pub action: Reconciliation,
    pub outcome: ReconciliationOutcome,
    pub reconciled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// TransferSession
// ---------------------------------------------------------------------------

/// One attempt to move one asset from seller to buyer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSession {
    pub id: String,
    pub asset_id: String,
    pub seller_id: String,
    pub buyer_id: String,
    pub status: TransferStatus,
    pub initiated_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub ledger_tx_ref: Option<TxRef>,
    pub deletion_proof: Option<DeletionProof>,
    pub secure_package: Option<SecureTransferPackage>,
    pub failure: Option<FailureRecord>,
    pub reconciliation: Option<ReconciliationRecord>,
    /// Bumped by the session repository on every successful write.
    pub revision: u64,
}

impl TransferSession {
    pub fn new(
        asset_id: impl Into<String>,
        seller_id: impl Into<String>,
        buyer_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            asset_id: asset_id.into(),
            seller_id: seller_id.into(),
            buyer_id: buyer_id.into(),
            status: TransferStatus::Initiated,
            initiated_at: now,
            updated_at: now,
            completed_at: None,
            ledger_tx_ref: None,
            deletion_proof: None,
            secure_package: None,
            failure: None,
            reconciliation: None,
            revision: 0,
        }
    }

    /// Move to `next`, or `State` error if the edge does not exist.
    pub fn transition(&mut self, next: TransferStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(RelicError::state(self.status, format!("a state leading to {}", next)));
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next == TransferStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// `State` error unless the session is in `expected`.
    pub fn require(&self, expected: TransferStatus) -> Result<()> {
        if self.status != expected {
            return Err(RelicError::state(self.status, expected.to_string()));
        }
        Ok(())
    }

    /// Mark failed, recording where and why. No-op on terminal sessions.
    pub fn fail(&mut self, error: &RelicError, content_quarantined: bool) {
        if self.status.is_terminal() {
            return;
        }
        let stage = self.status;
        self.status = TransferStatus::Failed;
        self.updated_at = Utc::now();
        self.failure = Some(FailureRecord {
            stage,
            kind: error.kind().to_string(),
            reason: error.to_string(),
            retryable: error.is_retryable(),
            content_quarantined,
            failed_at: self.updated_at,
        });
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Ledger attestation for this session. Requires a deletion proof.
    pub fn attestation(&self) -> Result<TransferAttestation> {
        let proof = self
            .deletion_proof
            .as_ref()
            .ok_or_else(|| RelicError::state(self.status, "a session with a deletion proof"))?;
        Ok(TransferAttestation {
            transfer_id: self.id.clone(),
            asset_id: self.asset_id.clone(),
            from_owner: self.seller_id.clone(),
            to_owner: self.buyer_id.clone(),
            deletion_proof_hash: Some(proof.proof_hash()),
            attested_at: Utc::now(),
        })
    }
}
