//! # Provenance Ledger
//!
//! Per-asset ownership chains, optionally anchored on the external ledger.
//!
//! Appends to one chain are serialized by an in-process async mutex per
//! asset id, and the chain repository's compare-and-swap catches writers in
//! other processes. Different assets never wait on each other.
//!
//! Verification never mutates a chain. It reports every problem it finds
//! rather than stopping at the first, so a certificate can show all of them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::record::{OwnershipRecord, ProvenanceChain, TransferKind};
use crate::config::ProtocolConfig;
use crate::crypto::provider::CryptoProvider;
use crate::error::{RelicError, Result};
use crate::ledger::{LedgerClient, TransferAttestation, TxRef};
use crate::storage::assets::AssetStore;
use crate::storage::chains::ChainRepository;
use crate::transfer::deletion::DeletionProof;
use crate::transfer::session::{TransferSession, TransferStatus};

// ---------------------------------------------------------------------------
// Verification Result
// ---------------------------------------------------------------------------

/// One problem found by [`ProvenanceLedger::verify_provenance`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerificationIssue {
    /// Supplied content does not hash to the registered fingerprint.
    Integrity { expected: String, actual: String },
    /// The chain violates one of its own invariants.
    ChainInconsistent { detail: String },
    /// The chain claims anchoring but the ledger has never heard of it.
    NotOnLedger,
    OwnerMismatch {
        chain_owner: Option<String>,
        ledger_owner: Option<String>,
    },
    /// The last anchored transaction is unknown to the ledger.
    TransactionUnverified { tx_ref: TxRef },
    /// The ledger could not be queried.
    LedgerUnavailable { detail: String },
}

impl VerificationIssue {
    /// Error category this issue corresponds to: `integrity`,
    /// `verification`, or `ledger`.
    pub fn category(&self) -> &'static str {
        match self {
            VerificationIssue::Integrity { .. } => "integrity",
            VerificationIssue::LedgerUnavailable { .. } => "ledger",
            _ => "verification",
        }
    }
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationIssue::Integrity { expected, actual } => {
                write!(f, "content fingerprint {} does not match registered {}", actual, expected)
            }
            VerificationIssue::ChainInconsistent { detail } => {
                write!(f, "chain inconsistent: {}", detail)
            }
            VerificationIssue::NotOnLedger => f.write_str("asset not found on ledger"),
            VerificationIssue::OwnerMismatch {
                chain_owner,
                ledger_owner,
            } => write!(
                f,
                "ledger owner {:?} differs from chain owner {:?}",
                ledger_owner, chain_owner
            ),
            VerificationIssue::TransactionUnverified { tx_ref } => {
                write!(f, "ledger does not know transaction {}", tx_ref)
            }
            VerificationIssue::LedgerUnavailable { detail } => {
                write!(f, "ledger unavailable: {}", detail)
            }
        }
    }
}

/// Outcome of a provenance check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub asset_id: String,
    pub verified: bool,
    pub ledger_anchored: bool,
    pub current_owner: Option<String>,
    pub chain_length: usize,
    pub errors: Vec<VerificationIssue>,
    pub checked_at: DateTime<Utc>,
}

impl VerificationResult {
    pub fn has_integrity_error(&self) -> bool {
        self.errors.iter().any(|e| e.category() == "integrity")
    }
}

// ---------------------------------------------------------------------------
// ProvenanceLedger
// ---------------------------------------------------------------------------

/// Maintains and verifies provenance chains.
pub struct ProvenanceLedger {
    chains: Arc<dyn ChainRepository>,
    store: Arc<dyn AssetStore>,
    ledger: Arc<dyn LedgerClient>,
    crypto: Arc<dyn CryptoProvider>,
    config: ProtocolConfig,
    append_guards: DashMap<String, Arc<Mutex<()>>>,
}

impl ProvenanceLedger {
    pub fn new(
        chains: Arc<dyn ChainRepository>,
        store: Arc<dyn AssetStore>,
        ledger: Arc<dyn LedgerClient>,
        crypto: Arc<dyn CryptoProvider>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            chains,
            store,
            ledger,
            crypto,
            config,
            append_guards: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    fn guard(&self, asset_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(&*self.append_guards.entry(asset_id.to_string()).or_default())
    }

    /// Fingerprint the asset's content, optionally anchor it, and create its
    /// chain with a single creation record.
    pub async fn register_asset_provenance(
        &self,
        asset_id: &str,
        owner_id: &str,
    ) -> Result<ProvenanceChain> {
        let guard = self.guard(asset_id);
        let _lock = guard.lock().await;

        if self.chains.get(asset_id)?.is_some() {
            return Err(RelicError::state(
                format!("provenance chain for {} exists", asset_id),
                "an unregistered asset",
            ));
        }

        let content = self.store.get_content(asset_id).await?;
        let metadata = self.store.get_metadata(asset_id).await?;
        if metadata.owner != owner_id {
            return Err(RelicError::Verification(format!(
                "asset {} is owned by {}, not {}",
                asset_id, metadata.owner, owner_id
            )));
        }

        let fingerprint = self.crypto.hash(&content);
        if metadata.content_hash != fingerprint {
            return Err(RelicError::Integrity {
                subject: format!("content of {}", asset_id),
                expected: metadata.content_hash,
                actual: fingerprint,
            });
        }

        let registration = if self.config.anchor_on_ledger {
            Some(
                self.ledger
                    .register_asset(
                        asset_id,
                        owner_id,
                        &fingerprint,
                        &metadata.hash()?,
                        metadata.uri.as_deref(),
                    )
                    .await?,
            )
        } else {
            None
        };

        let chain = ProvenanceChain::new(asset_id, owner_id, fingerprint, registration);
        self.chains.create(&chain)?;

        info!(
            asset_id = %asset_id,
            owner = %owner_id,
            fingerprint = %chain.content_fingerprint,
            anchored = chain.ledger_anchored,
            "provenance registered"
        );
        Ok(chain)
    }

    /// Append the marketplace transfer described by `session`.
    ///
    /// The session must be `Completed`, so the ledger has already confirmed
    /// it and its reference is reused for the record. `deletion_proof` must
    /// be the proof the session recorded and must carry a valid signature;
    /// the chain's current owner must be the session's seller; a proof is
    /// recorded at most once.
    pub async fn record_transfer(
        &self,
        session: &TransferSession,
        deletion_proof: &DeletionProof,
    ) -> Result<ProvenanceChain> {
        session.require(TransferStatus::Completed)?;
        let ledger_tx_ref = session
            .ledger_tx_ref
            .clone()
            .ok_or_else(|| RelicError::state(session.status, "a ledger-confirmed transfer"))?;

        let recorded = session
            .deletion_proof
            .as_ref()
            .ok_or_else(|| RelicError::state(session.status, "a session with a deletion proof"))?;
        let proof_hash = deletion_proof.proof_hash();
        let recorded_hash = recorded.proof_hash();
        if proof_hash != recorded_hash {
            return Err(RelicError::Integrity {
                subject: format!("deletion proof for transfer {}", session.id),
                expected: recorded_hash,
                actual: proof_hash,
            });
        }
        if deletion_proof.asset_id != session.asset_id || !deletion_proof.verify() {
            return Err(RelicError::Verification(format!(
                "deletion proof for {} does not verify",
                session.asset_id
            )));
        }

        let guard = self.guard(&session.asset_id);
        let _lock = guard.lock().await;

        let mut chain = self.require_chain(&session.asset_id)?;
        if chain.current_owner() != Some(session.seller_id.as_str()) {
            return Err(RelicError::Verification(format!(
                "chain owner of {} is {:?}, not seller {}",
                session.asset_id,
                chain.current_owner(),
                session.seller_id
            )));
        }
        if chain.contains_proof(&proof_hash) {
            return Err(RelicError::state(
                "deletion proof already recorded",
                "an unrecorded deletion proof",
            ));
        }

        let record = OwnershipRecord {
            asset_id: session.asset_id.clone(),
            owner: session.buyer_id.clone(),
            previous_owner: Some(session.seller_id.clone()),
            timestamp: Utc::now(),
            ledger_tx_ref: Some(ledger_tx_ref),
            transfer_kind: TransferKind::Marketplace,
            deletion_proof_hash: Some(proof_hash),
            transfer_id: Some(session.id.clone()),
            version: chain.next_version(),
        };
        self.append(&mut chain, record)?;

        info!(
            asset_id = %session.asset_id,
            transfer_id = %session.id,
            owner = %session.buyer_id,
            version = chain.len(),
            "marketplace transfer recorded"
        );
        Ok(chain)
    }

    /// Record a hand-over with no marketplace session and no deletion proof.
    pub async fn record_direct_transfer(
        &self,
        asset_id: &str,
        from: &str,
        to: &str,
    ) -> Result<ProvenanceChain> {
        if from == to {
            return Err(RelicError::state(
                format!("{} transferring to self", from),
                "distinct parties",
            ));
        }

        let guard = self.guard(asset_id);
        let _lock = guard.lock().await;

        let mut chain = self.require_chain(asset_id)?;
        if chain.current_owner() != Some(from) {
            return Err(RelicError::Verification(format!(
                "chain owner of {} is {:?}, not {}",
                asset_id,
                chain.current_owner(),
                from
            )));
        }

        let transfer_id = format!("direct-{}", Uuid::new_v4());
        let ledger_tx_ref = if self.config.anchor_on_ledger {
            let attestation = TransferAttestation {
                transfer_id: transfer_id.clone(),
                asset_id: asset_id.to_string(),
                from_owner: from.to_string(),
                to_owner: to.to_string(),
                deletion_proof_hash: None,
                attested_at: Utc::now(),
            };
            Some(self.ledger.record_transfer(asset_id, to, &attestation).await?)
        } else {
            None
        };

        let record = OwnershipRecord {
            asset_id: asset_id.to_string(),
            owner: to.to_string(),
            previous_owner: Some(from.to_string()),
            timestamp: Utc::now(),
            ledger_tx_ref,
            transfer_kind: TransferKind::Direct,
            deletion_proof_hash: None,
            transfer_id: Some(transfer_id),
            version: chain.next_version(),
        };
        self.append(&mut chain, record)?;

        info!(asset_id = %asset_id, from = %from, to = %to, "direct transfer recorded");
        Ok(chain)
    }

    /// Check content integrity, chain consistency, and ledger agreement.
    pub async fn verify_provenance(
        &self,
        asset_id: &str,
        current_content: Option<&[u8]>,
    ) -> Result<VerificationResult> {
        let chain = self.require_chain(asset_id)?;
        let mut errors = Vec::new();

        if let Some(content) = current_content {
            let actual = self.crypto.hash(content);
            if actual != chain.content_fingerprint {
                errors.push(VerificationIssue::Integrity {
                    expected: chain.content_fingerprint.clone(),
                    actual,
                });
            }
        }

        errors.extend(
            chain
                .validate()
                .into_iter()
                .map(|detail| VerificationIssue::ChainInconsistent { detail }),
        );

        if chain.ledger_anchored {
            match self.check_ledger(&chain).await {
                Ok(issues) => errors.extend(issues),
                Err(e) => errors.push(VerificationIssue::LedgerUnavailable {
                    detail: e.to_string(),
                }),
            }
        }

        let result = VerificationResult {
            asset_id: asset_id.to_string(),
            verified: errors.is_empty(),
            ledger_anchored: chain.ledger_anchored,
            current_owner: chain.current_owner().map(str::to_string),
            chain_length: chain.len(),
            errors,
            checked_at: Utc::now(),
        };

        if result.verified {
            debug!(asset_id = %asset_id, "provenance verified");
        } else {
            warn!(asset_id = %asset_id, issues = result.errors.len(), "provenance verification failed");
        }
        Ok(result)
    }

    async fn check_ledger(&self, chain: &ProvenanceChain) -> Result<Vec<VerificationIssue>> {
        let mut issues = Vec::new();

        if !self.ledger.asset_exists(&chain.asset_id).await? {
            issues.push(VerificationIssue::NotOnLedger);
            return Ok(issues);
        }

        let ledger_owner = self.ledger.owner_of(&chain.asset_id).await?;
        if ledger_owner.as_deref() != chain.current_owner() {
            issues.push(VerificationIssue::OwnerMismatch {
                chain_owner: chain.current_owner().map(str::to_string),
                ledger_owner,
            });
        }

        if let Some(tx_ref) = chain.last_anchored().and_then(|r| r.ledger_tx_ref.as_ref()) {
            if !self.ledger.verify_transaction(tx_ref).await? {
                issues.push(VerificationIssue::TransactionUnverified {
                    tx_ref: tx_ref.clone(),
                });
            }
        }
        Ok(issues)
    }

    pub fn get_chain(&self, asset_id: &str) -> Result<Option<ProvenanceChain>> {
        self.chains.get(asset_id)
    }

    pub fn list_assets(&self) -> Result<Vec<String>> {
        self.chains.list_asset_ids()
    }

    fn require_chain(&self, asset_id: &str) -> Result<ProvenanceChain> {
        self.chains
            .get(asset_id)?
            .ok_or_else(|| RelicError::not_found("provenance chain", asset_id))
    }

    fn append(&self, chain: &mut ProvenanceChain, record: OwnershipRecord) -> Result<()> {
        let expected_len = chain.len();
        chain.append(record)?;
        self.chains.append(chain, expected_len)
    }
}
