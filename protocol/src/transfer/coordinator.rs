//! # Transfer Coordinator
//!
//! Owns the [`TransferSession`] lifecycle and drives each step in order:
//!
//! 1. **initiate** -- claim the asset, persist the session, write the
//!    pending-transfer marker into the asset's metadata.
//! 2. **create_secure_transfer_package** -- read content and metadata,
//!    encrypt for the buyer, generate the deletion proof (which removes the
//!    seller's copy), sign the package. Ends in `PendingConfirmation`.
//! 3. **complete_transfer_on_ledger** -- submit the attestation, store the
//!    returned reference, purge quarantined bytes, release the claim.
//!
//! Within one session the pipeline is strictly sequential: deletion never
//! precedes hashing and ledger submission never precedes packaging.
//!
//! ## Failure handling
//!
//! Any error inside steps 2 or 3 marks the session `Failed` with a
//! [`FailureRecord`](super::session::FailureRecord), reverts the pending
//! marker if the asset is still live, and releases the claim. Content that
//! was already quarantined stays there. A failed session is never resumed;
//! [`TransferCoordinator::reconcile_failed_transfer`] is the explicit
//! operator step that restores or purges it.
//!
//! A process that dies mid-step leaves its session in a transient state
//! holding the asset claim. [`TransferCoordinator::recover_interrupted`]
//! fails such a session from a new process, after which it reconciles like
//! any other failure.
//!
//! Calling a step against the wrong state returns `State` without touching
//! the session, so a duplicate call cannot fail a healthy transfer.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::deletion::DeletionProofGenerator;
use super::package::{SecurePackager, SecureTransferPackage, TransferMetadata};
use super::session::{
    Reconciliation, ReconciliationOutcome, ReconciliationRecord, TransferSession, TransferStatus,
};
use crate::config::ProtocolConfig;
use crate::crypto::keys::RelicKeypair;
use crate::crypto::provider::CryptoProvider;
use crate::crypto::sealing::DeliveryPublicKey;
use crate::error::{RelicError, Result};
use crate::ledger::{LedgerClient, TxRef};
use crate::storage::assets::{AssetStore, PendingTransfer};
use crate::storage::sessions::SessionRepository;

/// Orchestrates transfers between the asset store, the packager and the
/// external ledger.
pub struct TransferCoordinator {
    store: Arc<dyn AssetStore>,
    sessions: Arc<dyn SessionRepository>,
    ledger: Arc<dyn LedgerClient>,
    packager: SecurePackager,
    deletion: DeletionProofGenerator,
    config: ProtocolConfig,
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<dyn AssetStore>,
        sessions: Arc<dyn SessionRepository>,
        ledger: Arc<dyn LedgerClient>,
        crypto: Arc<dyn CryptoProvider>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            packager: SecurePackager::new(crypto.clone()),
            deletion: DeletionProofGenerator::new(store.clone(), crypto, config.deletion_mode),
            store,
            sessions,
            ledger,
            config,
        }
    }

    pub fn packager(&self) -> &SecurePackager {
        &self.packager
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Step 1: initiate
    // -----------------------------------------------------------------------

    /// Start a transfer of `asset_id` from its current owner to `buyer_id`.
    ///
    /// Fails with `NotFound` if the asset is not live and with `State` if
    /// another active transfer already holds it.
    pub async fn initiate(&self, asset_id: &str, buyer_id: &str) -> Result<TransferSession> {
        let mut metadata = self.store.get_metadata(asset_id).await?;
        if metadata.owner == buyer_id {
            return Err(RelicError::state(
                format!("{} already owns {}", buyer_id, asset_id),
                "a buyer other than the current owner",
            ));
        }

        let mut session = TransferSession::new(asset_id, metadata.owner.clone(), buyer_id);
        self.sessions.insert(&session)?;

        if let Err(e) = self.claim(&session) {
            session.fail(&e, false);
            if let Err(persist) = self.sessions.update(&mut session) {
                warn!(transfer_id = %session.id, error = %persist, "could not record rejected transfer");
            }
            warn!(asset_id = %asset_id, transfer_id = %session.id, error = %e, "transfer rejected");
            return Err(e);
        }

        metadata.pending_transfer = Some(PendingTransfer {
            transfer_id: session.id.clone(),
            buyer_id: buyer_id.to_string(),
            since: session.initiated_at,
        });
        if let Err(e) = self.store.write_metadata(asset_id, &metadata).await {
            self.fail_session(&mut session, &e).await;
            return Err(e);
        }

        info!(
            transfer_id = %session.id,
            asset_id = %asset_id,
            seller = %session.seller_id,
            buyer = %buyer_id,
            "transfer initiated"
        );
        Ok(session)
    }

    /// Take the per-asset claim, replacing it if its holder is finished.
    fn claim(&self, session: &TransferSession) -> Result<()> {
        let Some(holder) = self.sessions.claim_asset(&session.asset_id, &session.id)? else {
            return Ok(());
        };

        // Holders are persisted before they claim, so a missing or terminal
        // holder is left over from a crash.
        let stale = match self.sessions.get(&holder)? {
            Some(h) => !h.is_active(),
            None => true,
        };
        if stale && self.sessions.replace_claim(&session.asset_id, &holder, &session.id)? {
            warn!(asset_id = %session.asset_id, stale_holder = %holder, "replaced stale asset claim");
            return Ok(());
        }

        Err(RelicError::state(
            format!("asset {} held by transfer {}", session.asset_id, holder),
            "no active transfer for the asset",
        ))
    }

    // -----------------------------------------------------------------------
    // Step 2: package
    // -----------------------------------------------------------------------

    /// Encrypt the asset for the buyer, delete the seller's copy under a
    /// signed proof, and return the signed package.
    ///
    /// `signing_key` is the seller's key; `buyer_key` is the buyer's
    /// delivery key the package key is sealed to.
    pub async fn create_secure_transfer_package(
        &self,
        transfer_id: &str,
        signing_key: &RelicKeypair,
        buyer_key: &DeliveryPublicKey,
    ) -> Result<SecureTransferPackage> {
        let mut session = self.load(transfer_id)?;
        session.require(TransferStatus::Initiated)?;

        match self.build_package(&mut session, signing_key, buyer_key).await {
            Ok(package) => Ok(package),
            Err(e) => {
                self.fail_session(&mut session, &e).await;
                Err(e)
            }
        }
    }

    async fn build_package(
        &self,
        session: &mut TransferSession,
        signing_key: &RelicKeypair,
        buyer_key: &DeliveryPublicKey,
    ) -> Result<SecureTransferPackage> {
        let asset_id = session.asset_id.clone();

        self.advance(session, TransferStatus::Extracting)?;
        let content = self.store.get_content(&asset_id).await?;
        let metadata = self.store.get_metadata(&asset_id).await?;

        let marked = metadata
            .pending_transfer
            .as_ref()
            .is_some_and(|p| p.transfer_id == session.id);
        if !marked {
            return Err(RelicError::state(
                format!("asset {} not marked for this transfer", asset_id),
                format!("pending marker for {}", session.id),
            ));
        }
        if metadata.owner != session.seller_id {
            return Err(RelicError::Verification(format!(
                "asset {} now owned by {}, not {}",
                asset_id, metadata.owner, session.seller_id
            )));
        }

        let snapshot = metadata.without_pending();
        let payload =
            self.packager
                .encrypt(&content, &snapshot, &session.buyer_id, buyer_key, signing_key)?;

        self.advance(session, TransferStatus::Deleting)?;
        let proof = self.deletion.generate(&asset_id, signing_key).await?;
        session.deletion_proof = Some(proof.clone());

        // Content changed between the read above and the proof's read.
        if proof.content_hash != payload.content_hash {
            return Err(RelicError::Integrity {
                subject: format!("content of {}", asset_id),
                expected: payload.content_hash.clone(),
                actual: proof.content_hash.clone(),
            });
        }

        self.advance(session, TransferStatus::CreatingPackage)?;
        let transfer_metadata = TransferMetadata {
            transfer_id: session.id.clone(),
            original_metadata: snapshot,
            seller_id: session.seller_id.clone(),
            buyer_id: session.buyer_id.clone(),
            transferred_at: Utc::now(),
            ledger_tx_ref: None,
        };
        let package = self
            .packager
            .assemble(transfer_metadata, payload, proof, signing_key)?;
        session.secure_package = Some(package.clone());

        self.advance(session, TransferStatus::PendingConfirmation)?;
        info!(
            transfer_id = %session.id,
            asset_id = %asset_id,
            content_hash = %package.deletion_proof.content_hash,
            "secure transfer package created"
        );
        Ok(package)
    }

    // -----------------------------------------------------------------------
    // Step 3: ledger
    // -----------------------------------------------------------------------

    /// Record the transfer on the external ledger and complete the session.
    pub async fn complete_transfer_on_ledger(&self, transfer_id: &str) -> Result<TxRef> {
        let mut session = self.load(transfer_id)?;
        session.require(TransferStatus::PendingConfirmation)?;

        match self.confirm(&mut session).await {
            Ok(tx_ref) => Ok(tx_ref),
            Err(e) => {
                self.fail_session(&mut session, &e).await;
                Err(e)
            }
        }
    }

    async fn confirm(&self, session: &mut TransferSession) -> Result<TxRef> {
        self.advance(session, TransferStatus::LedgerVerification)?;

        let attestation = session.attestation()?;
        debug!(
            transfer_id = %session.id,
            attestation_id = %attestation.attestation_id(),
            "submitting transfer attestation"
        );
        let tx_ref = self
            .ledger
            .record_transfer(&session.asset_id, &session.buyer_id, &attestation)
            .await?;

        session.ledger_tx_ref = Some(tx_ref.clone());
        if let Some(proof) = session.deletion_proof.as_mut() {
            proof.ledger_anchor = Some(tx_ref.clone());
        }
        if let Some(package) = session.secure_package.as_mut() {
            package.transfer_metadata.ledger_tx_ref = Some(tx_ref.clone());
            package.deletion_proof.ledger_anchor = Some(tx_ref.clone());
        }
        self.advance(session, TransferStatus::Completed)?;

        // The transfer is final from here on; cleanup problems are logged,
        // not returned.
        if let Err(e) = self.sessions.release_asset(&session.asset_id, &session.id) {
            warn!(transfer_id = %session.id, error = %e, "could not release asset claim");
        }
        match self.store.purge_quarantined(&session.asset_id).await {
            Ok(true) => debug!(asset_id = %session.asset_id, "quarantine purged after confirmation"),
            Ok(false) => {}
            Err(e) => warn!(asset_id = %session.asset_id, error = %e, "quarantine purge failed"),
        }

        info!(
            transfer_id = %session.id,
            asset_id = %session.asset_id,
            tx_ref = %tx_ref,
            "transfer completed on ledger"
        );
        Ok(tx_ref)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get_transfer(&self, transfer_id: &str) -> Result<Option<TransferSession>> {
        self.sessions.get(transfer_id)
    }

    /// Sessions that have not reached `Completed` or `Failed`.
    pub fn get_active_transfers(&self) -> Result<Vec<TransferSession>> {
        Ok(self
            .sessions
            .list()?
            .into_iter()
            .filter(TransferSession::is_active)
            .collect())
    }

    pub fn list_transfers(&self) -> Result<Vec<TransferSession>> {
        self.sessions.list()
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Resolve a failed session by restoring the seller's quarantined copy
    /// or purging it. Each failed session can be reconciled once.
    pub async fn reconcile_failed_transfer(
        &self,
        transfer_id: &str,
        action: Reconciliation,
    ) -> Result<TransferSession> {
        let mut session = self.load(transfer_id)?;
        session.require(TransferStatus::Failed)?;
        if session.reconciliation.is_some() {
            return Err(RelicError::state(
                "already reconciled",
                "an unreconciled failed transfer",
            ));
        }

        let asset_id = session.asset_id.clone();
        let deleted = session.deletion_proof.is_some()
            || session
                .failure
                .as_ref()
                .is_some_and(|f| f.content_quarantined);
        let outcome = if !deleted {
            // Failed before anything was deleted.
            ReconciliationOutcome::NothingToRestore
        } else {
            if let Some(holder) = self.sessions.claim_holder(&asset_id)? {
                if holder != session.id {
                    return Err(RelicError::state(
                        format!("asset {} held by transfer {}", asset_id, holder),
                        "no active transfer for the asset",
                    ));
                }
            }
            match action {
                Reconciliation::RestoreToSeller => self.restore_to_seller(&session).await?,
                Reconciliation::Purge => {
                    if self.store.purge_quarantined(&asset_id).await? {
                        ReconciliationOutcome::Purged
                    } else {
                        ReconciliationOutcome::NothingToRestore
                    }
                }
            }
        };

        session.reconciliation = Some(ReconciliationRecord {
            action,
            outcome,
            reconciled_at: Utc::now(),
        });
        self.sessions.update(&mut session)?;

        info!(
            transfer_id = %session.id,
            asset_id = %asset_id,
            action = ?action,
            outcome = ?outcome,
            "failed transfer reconciled"
        );
        Ok(session)
    }

    /// Fail a session a dead process left in a transient state, releasing
    /// its claim so the failure can be reconciled.
    ///
    /// Only for sessions no live call is driving. If one is, its next write
    /// or this one loses the revision check with `Conflict`.
    pub async fn recover_interrupted(&self, transfer_id: &str) -> Result<TransferSession> {
        let mut session = self.load(transfer_id)?;
        if !session.status.is_transient() {
            return Err(RelicError::state(
                session.status,
                "EXTRACTING, DELETING, CREATING_PACKAGE or LEDGER_VERIFICATION",
            ));
        }

        let cause = RelicError::Interrupted(session.status.to_string());
        self.record_failure(&mut session, &cause).await?;
        info!(
            transfer_id = %session.id,
            asset_id = %session.asset_id,
            "interrupted transfer recovered as failed"
        );
        Ok(session)
    }

    async fn restore_to_seller(&self, session: &TransferSession) -> Result<ReconciliationOutcome> {
        let asset_id = &session.asset_id;

        // A ledger that already names the buyer means the transfer landed
        // even though the session did not record it.
        if self.ledger.owner_of(asset_id).await?.as_deref() == Some(session.buyer_id.as_str()) {
            return Err(RelicError::state(
                format!("ledger shows {} as owner of {}", session.buyer_id, asset_id),
                "a transfer the ledger never confirmed",
            ));
        }

        if !self.store.restore_quarantined(asset_id).await? {
            return Ok(ReconciliationOutcome::NothingToRestore);
        }
        self.clear_marker(session).await?;
        Ok(ReconciliationOutcome::Restored)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn load(&self, transfer_id: &str) -> Result<TransferSession> {
        self.sessions
            .get(transfer_id)?
            .ok_or_else(|| RelicError::not_found("transfer", transfer_id))
    }

    /// Transition and persist.
    fn advance(&self, session: &mut TransferSession, next: TransferStatus) -> Result<()> {
        let from = session.status;
        session.transition(next)?;
        self.sessions.update(session)?;
        debug!(transfer_id = %session.id, %from, to = %next, "transfer state changed");
        Ok(())
    }

    /// Drop the pending marker if it still names this session.
    async fn clear_marker(&self, session: &TransferSession) -> Result<()> {
        let mut metadata = self.store.get_metadata(&session.asset_id).await?;
        let ours = metadata
            .pending_transfer
            .as_ref()
            .is_some_and(|p| p.transfer_id == session.id);
        if ours {
            metadata.pending_transfer = None;
            self.store.write_metadata(&session.asset_id, &metadata).await?;
        }
        Ok(())
    }

    /// Record the failure, logging instead of returning if that fails.
    async fn fail_session(&self, session: &mut TransferSession, cause: &RelicError) {
        if let Err(e) = self.record_failure(session, cause).await {
            error!(transfer_id = %session.id, error = %e, "could not persist transfer failure");
        }
    }

    /// Record the failure. Only if that write lands does the session give
    /// up its marker and claim; a failed write means another writer owns
    /// the session.
    async fn record_failure(&self, session: &mut TransferSession, cause: &RelicError) -> Result<()> {
        // A crash inside `Deleting` can quarantine the bytes before the
        // proof reaches the session.
        let may_be_quarantined =
            session.deletion_proof.is_some() || session.status == TransferStatus::Deleting;
        let quarantined = if may_be_quarantined {
            match self.store.is_quarantined(&session.asset_id).await {
                Ok(q) => q,
                Err(e) => {
                    warn!(asset_id = %session.asset_id, error = %e, "could not check quarantine");
                    false
                }
            }
        } else {
            false
        };
        let stage = session.status;
        session.fail(cause, quarantined);
        self.sessions.update(session)?;

        match self.store.exists(&session.asset_id).await {
            Ok(true) => {
                if let Err(e) = self.clear_marker(session).await {
                    warn!(transfer_id = %session.id, error = %e, "could not clear pending marker");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(asset_id = %session.asset_id, error = %e, "could not check live asset"),
        }
        if let Err(e) = self.sessions.release_asset(&session.asset_id, &session.id) {
            warn!(transfer_id = %session.id, error = %e, "could not release asset claim");
        }

        error!(
            transfer_id = %session.id,
            asset_id = %session.asset_id,
            %stage,
            kind = cause.kind(),
            retryable = cause.is_retryable(),
            content_quarantined = quarantined,
            error = %cause,
            "transfer failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletionMode;
    use crate::crypto::provider::StandardCrypto;
    use crate::crypto::sealing::DeliveryKeypair;
    use crate::ledger::{LedgerEntry, LocalLedger, TransferAttestation};
    use crate::storage::assets::{AssetMetadata, SledAssetStore};
    use crate::storage::db::RelicDb;
    use crate::storage::sessions::SledSessionRepository;
    use async_trait::async_trait;

    /// Ledger that rejects every submission.
    struct DownLedger;

    #[async_trait]
    impl LedgerClient for DownLedger {
        async fn register_asset(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
            _: Option<&str>,
        ) -> Result<TxRef> {
            Err(RelicError::Ledger("unreachable".into()))
        }
        async fn record_transfer(&self, _: &str, _: &str, _: &TransferAttestation) -> Result<TxRef> {
            Err(RelicError::Ledger("unreachable".into()))
        }
        async fn asset_exists(&self, _: &str) -> Result<bool> {
            Ok(false)
        }
        async fn owner_of(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn verify_transaction(&self, _: &TxRef) -> Result<bool> {
            Ok(false)
        }
        async fn transaction(&self, _: &TxRef) -> Result<Option<LedgerEntry>> {
            Ok(None)
        }
    }

    struct Fixture {
        db: RelicDb,
        store: Arc<SledAssetStore>,
        sessions: Arc<SledSessionRepository>,
        coordinator: TransferCoordinator,
        alice: RelicKeypair,
        bob: DeliveryKeypair,
    }

    async fn fixture_with(ledger: Option<Arc<dyn LedgerClient>>, mode: DeletionMode) -> Fixture {
        let db = RelicDb::open_temporary().unwrap();
        let store = Arc::new(SledAssetStore::new(db.clone()));
        let meta = AssetMetadata::new("a1", "Sunset", "alice", b"pixels");
        store.put_asset(&meta, b"pixels").await.unwrap();

        let ledger = match ledger {
            Some(l) => l,
            None => Arc::new(LocalLedger::open(db.clone()).unwrap()),
        };
        let sessions = Arc::new(SledSessionRepository::new(db.clone()));
        let coordinator = TransferCoordinator::new(
            store.clone(),
            sessions.clone(),
            ledger,
            Arc::new(StandardCrypto),
            ProtocolConfig::default().with_deletion_mode(mode),
        );
        Fixture {
            db,
            store,
            sessions,
            coordinator,
            alice: RelicKeypair::generate(),
            bob: DeliveryKeypair::generate(),
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(None, DeletionMode::Quarantine).await
    }

    #[tokio::test]
    async fn initiate_marks_asset_without_changing_owner() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();

        assert_eq!(session.status, TransferStatus::Initiated);
        assert_eq!(session.seller_id, "alice");
        let meta = f.store.get_metadata("a1").await.unwrap();
        assert_eq!(meta.owner, "alice");
        assert_eq!(meta.pending_transfer.unwrap().transfer_id, session.id);
    }

    #[tokio::test]
    async fn initiate_unknown_asset_is_not_found() {
        let f = fixture().await;
        let err = f.coordinator.initiate("ghost", "bob").await.unwrap_err();
        assert!(matches!(err, RelicError::NotFound { .. }));
    }

    #[tokio::test]
    async fn second_initiate_is_rejected_while_first_is_active() {
        let f = fixture().await;
        let first = f.coordinator.initiate("a1", "bob").await.unwrap();
        let err = f.coordinator.initiate("a1", "carol").await.unwrap_err();
        assert!(matches!(err, RelicError::State { .. }));

        // The marker still belongs to the first session.
        let meta = f.store.get_metadata("a1").await.unwrap();
        assert_eq!(meta.pending_transfer.unwrap().transfer_id, first.id);
        assert_eq!(f.coordinator.get_active_transfers().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn full_pipeline_reaches_completed() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        let package = f
            .coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap();

        let pending = f.coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(pending.status, TransferStatus::PendingConfirmation);
        assert_eq!(
            pending.deletion_proof.as_ref().unwrap().content_hash,
            crate::crypto::sha256_hex(b"pixels")
        );
        assert!(f.store.get_content("a1").await.is_err());
        package.verify(Some(&f.alice.public_key())).unwrap();

        let tx = f
            .coordinator
            .complete_transfer_on_ledger(&session.id)
            .await
            .unwrap();
        let done = f.coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(done.status, TransferStatus::Completed);
        assert_eq!(done.ledger_tx_ref.as_ref(), Some(&tx));
        assert!(done.completed_at.is_some());
        assert_eq!(
            done.secure_package.unwrap().transfer_metadata.ledger_tx_ref,
            Some(tx)
        );
        assert!(!f.store.is_quarantined("a1").await.unwrap());
        assert!(f.coordinator.get_active_transfers().unwrap().is_empty());
    }

    #[tokio::test]
    async fn package_requires_initiated() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        f.coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap();

        let err = f
            .coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, RelicError::State { .. }));
        // The duplicate call did not fail the healthy session.
        let s = f.coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(s.status, TransferStatus::PendingConfirmation);
    }

    #[tokio::test]
    async fn complete_requires_pending_confirmation() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        let err = f
            .coordinator
            .complete_transfer_on_ledger(&session.id)
            .await
            .unwrap_err();
        assert!(matches!(err, RelicError::State { .. }));
        assert!(matches!(
            f.coordinator.complete_transfer_on_ledger("nope").await,
            Err(RelicError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn ledger_failure_fails_session_and_keeps_quarantine() {
        let f = fixture_with(Some(Arc::new(DownLedger)), DeletionMode::Quarantine).await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        f.coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap();

        let err = f
            .coordinator
            .complete_transfer_on_ledger(&session.id)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let failed = f.coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        let failure = failed.failure.unwrap();
        assert_eq!(failure.stage, TransferStatus::LedgerVerification);
        assert!(failure.content_quarantined);
        assert!(f.store.is_quarantined("a1").await.unwrap());

        // Asset is gone from the live store: a new attempt is rejected.
        assert!(matches!(
            f.coordinator.initiate("a1", "carol").await,
            Err(RelicError::NotFound { .. })
        ));
        // The failed session is never resumed.
        assert!(matches!(
            f.coordinator.complete_transfer_on_ledger(&session.id).await,
            Err(RelicError::State { .. })
        ));
    }

    #[tokio::test]
    async fn reconcile_restores_seller_copy() {
        let f = fixture_with(Some(Arc::new(DownLedger)), DeletionMode::Quarantine).await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        f.coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap();
        f.coordinator
            .complete_transfer_on_ledger(&session.id)
            .await
            .unwrap_err();

        let reconciled = f
            .coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
            .await
            .unwrap();
        assert_eq!(
            reconciled.reconciliation.unwrap().outcome,
            ReconciliationOutcome::Restored
        );
        assert_eq!(f.store.get_content("a1").await.unwrap(), b"pixels");
        let meta = f.store.get_metadata("a1").await.unwrap();
        assert!(meta.pending_transfer.is_none());
        assert_eq!(meta.owner, "alice");

        // Once only.
        assert!(f
            .coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::Purge)
            .await
            .is_err());

        // And the asset can be offered again.
        f.coordinator.initiate("a1", "carol").await.unwrap();
    }

    #[tokio::test]
    async fn reconcile_purge_after_hard_delete_has_nothing_to_do() {
        let f = fixture_with(Some(Arc::new(DownLedger)), DeletionMode::Hard).await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        f.coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap();
        f.coordinator
            .complete_transfer_on_ledger(&session.id)
            .await
            .unwrap_err();

        let s = f
            .coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
            .await
            .unwrap();
        assert_eq!(
            s.reconciliation.unwrap().outcome,
            ReconciliationOutcome::NothingToRestore
        );
    }

    #[tokio::test]
    async fn reconcile_requires_failed_session() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        let err = f
            .coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::Purge)
            .await
            .unwrap_err();
        assert!(matches!(err, RelicError::State { .. }));
    }

    #[tokio::test]
    async fn failure_before_deletion_reverts_marker() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();

        // Someone rewrites the metadata and drops the marker.
        let mut meta = f.store.get_metadata("a1").await.unwrap();
        meta.pending_transfer = None;
        f.store.write_metadata("a1", &meta).await.unwrap();

        let err = f
            .coordinator
            .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
            .await
            .unwrap_err();
        assert!(matches!(err, RelicError::State { .. }));

        let failed = f.coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert!(!failed.failure.unwrap().content_quarantined);
        // Nothing was deleted and the claim is free again.
        assert_eq!(f.store.get_content("a1").await.unwrap(), b"pixels");
        f.coordinator.initiate("a1", "carol").await.unwrap();
    }

    /// Persist `session` as a process that died after walking `path`.
    fn abandon(f: &Fixture, mut session: TransferSession, path: &[TransferStatus]) -> TransferSession {
        for next in path {
            session.transition(*next).unwrap();
        }
        f.sessions.update(&mut session).unwrap();
        session
    }

    /// A coordinator as a restarted process would build it.
    fn restarted(f: &Fixture) -> TransferCoordinator {
        TransferCoordinator::new(
            f.store.clone(),
            Arc::new(SledSessionRepository::new(f.db.clone())),
            Arc::new(LocalLedger::open(f.db.clone()).unwrap()),
            Arc::new(StandardCrypto),
            ProtocolConfig::default(),
        )
    }

    #[tokio::test]
    async fn session_stuck_in_extracting_is_recovered_and_reconciled() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        let session = abandon(&f, session, &[TransferStatus::Extracting]);

        let coordinator = restarted(&f);
        assert!(matches!(
            coordinator.initiate("a1", "carol").await,
            Err(RelicError::State { .. })
        ));
        assert!(matches!(
            coordinator
                .create_secure_transfer_package(&session.id, &f.alice, &f.bob.public_key())
                .await,
            Err(RelicError::State { .. })
        ));
        assert!(matches!(
            coordinator
                .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
                .await,
            Err(RelicError::State { .. })
        ));

        let recovered = coordinator.recover_interrupted(&session.id).await.unwrap();
        assert_eq!(recovered.status, TransferStatus::Failed);
        let failure = recovered.failure.unwrap();
        assert_eq!(failure.stage, TransferStatus::Extracting);
        assert_eq!(failure.kind, "interrupted");
        assert!(!failure.content_quarantined);
        assert!(coordinator.get_active_transfers().unwrap().is_empty());

        // Already failed: nothing left to recover.
        assert!(matches!(
            coordinator.recover_interrupted(&session.id).await,
            Err(RelicError::State { .. })
        ));

        let reconciled = coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
            .await
            .unwrap();
        assert_eq!(
            reconciled.reconciliation.unwrap().outcome,
            ReconciliationOutcome::NothingToRestore
        );
        assert!(f.store.get_metadata("a1").await.unwrap().pending_transfer.is_none());
        coordinator.initiate("a1", "carol").await.unwrap();
    }

    #[tokio::test]
    async fn crash_after_quarantine_restores_seller_copy() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        let session = abandon(
            &f,
            session,
            &[TransferStatus::Extracting, TransferStatus::Deleting],
        );
        // The bytes moved but the proof never reached the session.
        f.store.quarantine("a1").await.unwrap();

        let coordinator = restarted(&f);
        let recovered = coordinator.recover_interrupted(&session.id).await.unwrap();
        assert!(recovered.deletion_proof.is_none());
        assert!(recovered.failure.unwrap().content_quarantined);

        let reconciled = coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
            .await
            .unwrap();
        assert_eq!(
            reconciled.reconciliation.unwrap().outcome,
            ReconciliationOutcome::Restored
        );
        assert_eq!(f.store.get_content("a1").await.unwrap(), b"pixels");
        let meta = f.store.get_metadata("a1").await.unwrap();
        assert_eq!(meta.owner, "alice");
        assert!(meta.pending_transfer.is_none());
    }

    #[tokio::test]
    async fn recover_refuses_sessions_at_rest() {
        let f = fixture().await;
        let session = f.coordinator.initiate("a1", "bob").await.unwrap();
        assert!(matches!(
            f.coordinator.recover_interrupted(&session.id).await,
            Err(RelicError::State { .. })
        ));
        assert!(matches!(
            f.coordinator.recover_interrupted("nope").await,
            Err(RelicError::NotFound { .. })
        ));
        let s = f.coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(s.status, TransferStatus::Initiated);
    }

    /// Asset store whose quarantine lookups fail.
    struct BlindStore(SledAssetStore);

    #[async_trait]
    impl AssetStore for BlindStore {
        async fn get_metadata(&self, asset_id: &str) -> Result<AssetMetadata> {
            self.0.get_metadata(asset_id).await
        }
        async fn get_content(&self, asset_id: &str) -> Result<Vec<u8>> {
            self.0.get_content(asset_id).await
        }
        async fn put_asset(&self, metadata: &AssetMetadata, content: &[u8]) -> Result<()> {
            self.0.put_asset(metadata, content).await
        }
        async fn write_metadata(&self, asset_id: &str, metadata: &AssetMetadata) -> Result<()> {
            self.0.write_metadata(asset_id, metadata).await
        }
        async fn delete_asset(&self, asset_id: &str) -> Result<()> {
            self.0.delete_asset(asset_id).await
        }
        async fn quarantine(&self, asset_id: &str) -> Result<()> {
            self.0.quarantine(asset_id).await
        }
        async fn restore_quarantined(&self, asset_id: &str) -> Result<bool> {
            self.0.restore_quarantined(asset_id).await
        }
        async fn purge_quarantined(&self, asset_id: &str) -> Result<bool> {
            self.0.purge_quarantined(asset_id).await
        }
        async fn is_quarantined(&self, _: &str) -> Result<bool> {
            Err(crate::storage::db::DbError::Serialization("unreadable".into()).into())
        }
        async fn exists(&self, asset_id: &str) -> Result<bool> {
            self.0.exists(asset_id).await
        }
        async fn list_ids(&self) -> Result<Vec<String>> {
            self.0.list_ids().await
        }
    }

    #[tokio::test]
    async fn failure_is_recorded_when_quarantine_lookup_fails() {
        let db = RelicDb::open_temporary().unwrap();
        let inner = SledAssetStore::new(db.clone());
        inner
            .put_asset(&AssetMetadata::new("a1", "Sunset", "alice", b"pixels"), b"pixels")
            .await
            .unwrap();
        let store = Arc::new(BlindStore(inner));
        let coordinator = TransferCoordinator::new(
            store.clone(),
            Arc::new(SledSessionRepository::new(db)),
            Arc::new(DownLedger),
            Arc::new(StandardCrypto),
            ProtocolConfig::default(),
        );
        let alice = RelicKeypair::generate();
        let bob = DeliveryKeypair::generate();

        let session = coordinator.initiate("a1", "bob").await.unwrap();
        coordinator
            .create_secure_transfer_package(&session.id, &alice, &bob.public_key())
            .await
            .unwrap();
        coordinator
            .complete_transfer_on_ledger(&session.id)
            .await
            .unwrap_err();

        // The lookup error is logged; the failure and claim release still land.
        let failed = coordinator.get_transfer(&session.id).unwrap().unwrap();
        assert_eq!(failed.status, TransferStatus::Failed);
        assert!(!failed.failure.unwrap().content_quarantined);
        assert!(coordinator.get_active_transfers().unwrap().is_empty());

        // Reconciliation still finds the bytes through the deletion proof.
        let reconciled = coordinator
            .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
            .await
            .unwrap();
        assert_eq!(
            reconciled.reconciliation.unwrap().outcome,
            ReconciliationOutcome::Restored
        );
    }

    #[tokio::test]
    async fn buyer_cannot_be_current_owner() {
        let f = fixture().await;
        let err = f.coordinator.initiate("a1", "alice").await.unwrap_err();
        assert!(matches!(err, RelicError::State { .. }));
    }
}
