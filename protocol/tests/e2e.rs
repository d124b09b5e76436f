//! End-to-end tests for the relic transfer and provenance pipeline.
//!
//! Every test builds its own temporary database, so coordinator, provenance
//! ledger, and local ledger share one sled instance exactly as the CLI
//! wires them. No shared state, no ordering dependencies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use relic_protocol::config::{DeletionMode, ProtocolConfig};
use relic_protocol::crypto::keys::RelicKeypair;
use relic_protocol::crypto::provider::StandardCrypto;
use relic_protocol::crypto::sealing::DeliveryKeypair;
use relic_protocol::crypto::sha256_hex;
use relic_protocol::error::{RelicError, Result};
use relic_protocol::ledger::{LedgerClient, LedgerEntry, LocalLedger, TransferAttestation, TxRef};
use relic_protocol::provenance::{CertificateGenerator, ProvenanceLedger, TransferKind};
use relic_protocol::storage::{
    AssetMetadata, AssetStore, RelicDb, SledAssetStore, SledChainRepository, SledSessionRepository,
};
use relic_protocol::transfer::{
    Reconciliation, ReconciliationOutcome, TransferCoordinator, TransferStatus,
};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const CONTENT: &[u8] = b"sunset over the harbour, 4096x4096";

/// Local ledger whose transfer submissions can be switched off.
struct FlakyLedger {
    inner: LocalLedger,
    down: AtomicBool,
}

impl FlakyLedger {
    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerClient for FlakyLedger {
    async fn register_asset(
        &self,
        asset_id: &str,
        owner: &str,
        content_hash: &str,
        metadata_hash: &str,
        uri: Option<&str>,
    ) -> Result<TxRef> {
        self.inner
            .register_asset(asset_id, owner, content_hash, metadata_hash, uri)
            .await
    }

    async fn record_transfer(
        &self,
        asset_id: &str,
        to_owner: &str,
        attestation: &TransferAttestation,
    ) -> Result<TxRef> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RelicError::Ledger("rpc timeout".into()));
        }
        self.inner.record_transfer(asset_id, to_owner, attestation).await
    }

    async fn asset_exists(&self, asset_id: &str) -> Result<bool> {
        self.inner.asset_exists(asset_id).await
    }

    async fn owner_of(&self, asset_id: &str) -> Result<Option<String>> {
        self.inner.owner_of(asset_id).await
    }

    async fn verify_transaction(&self, tx_ref: &TxRef) -> Result<bool> {
        self.inner.verify_transaction(tx_ref).await
    }

    async fn transaction(&self, tx_ref: &TxRef) -> Result<Option<LedgerEntry>> {
        self.inner.transaction(tx_ref).await
    }
}

struct Harness {
    db: RelicDb,
    store: Arc<SledAssetStore>,
    ledger: Arc<FlakyLedger>,
    coordinator: TransferCoordinator,
    provenance: Arc<ProvenanceLedger>,
    alice_key: RelicKeypair,
    bob_delivery: DeliveryKeypair,
}

/// Full stack over a temporary database, with `a1` created and registered
/// by alice.
async fn setup(mode: DeletionMode) -> Harness {
    let db = RelicDb::open_temporary().expect("temp db");
    let config = ProtocolConfig::default().with_deletion_mode(mode);

    let store = Arc::new(SledAssetStore::new(db.clone()));
    let ledger = Arc::new(FlakyLedger {
        inner: LocalLedger::open(db.clone()).expect("ledger"),
        down: AtomicBool::new(false),
    });
    let crypto = Arc::new(StandardCrypto);

    let coordinator = TransferCoordinator::new(
        store.clone(),
        Arc::new(SledSessionRepository::new(db.clone())),
        ledger.clone(),
        crypto.clone(),
        config.clone(),
    );
    let provenance = Arc::new(ProvenanceLedger::new(
        Arc::new(SledChainRepository::new(db.clone())),
        store.clone(),
        ledger.clone(),
        crypto,
        config,
    ));

    store
        .put_asset(&AssetMetadata::new("a1", "Harbour", "alice", CONTENT), CONTENT)
        .await
        .expect("put asset");
    provenance
        .register_asset_provenance("a1", "alice")
        .await
        .expect("register");

    Harness {
        db,
        store,
        ledger,
        coordinator,
        provenance,
        alice_key: RelicKeypair::generate(),
        bob_delivery: DeliveryKeypair::generate(),
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn alice_sells_to_bob() {
    let h = setup(DeletionMode::Quarantine).await;
    let fingerprint = sha256_hex(CONTENT);

    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    assert_eq!(session.status, TransferStatus::Initiated);

    let package = h
        .coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    let packaged = h.coordinator.get_transfer(&session.id).unwrap().unwrap();
    assert_eq!(packaged.status, TransferStatus::PendingConfirmation);
    let proof = packaged.deletion_proof.clone().unwrap();
    assert_eq!(proof.content_hash, fingerprint);
    assert!(matches!(
        h.store.get_content("a1").await,
        Err(RelicError::NotFound { .. })
    ));

    let tx_ref = h.coordinator.complete_transfer_on_ledger(&session.id).await.unwrap();
    let completed = h.coordinator.get_transfer(&session.id).unwrap().unwrap();
    assert_eq!(completed.status, TransferStatus::Completed);
    assert_eq!(completed.ledger_tx_ref.as_ref(), Some(&tx_ref));
    assert!(completed.completed_at.is_some());

    let chain = h.provenance.record_transfer(&completed, &proof).await.unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.current_owner(), Some("bob"));
    assert_eq!(chain.records[1].transfer_kind, TransferKind::Marketplace);
    assert_eq!(chain.records[1].ledger_tx_ref.as_ref(), Some(&tx_ref));

    // Bob opens the package and gets the original bytes back.
    let (content, metadata) = h
        .coordinator
        .packager()
        .open_package(&package, &h.bob_delivery, &h.alice_key.public_key())
        .unwrap();
    assert_eq!(content, CONTENT);
    assert_eq!(metadata.asset_id, "a1");

    let result = h.provenance.verify_provenance("a1", Some(&content)).await.unwrap();
    assert!(result.verified, "{:?}", result.errors);
    assert_eq!(result.current_owner.as_deref(), Some("bob"));
    assert_eq!(h.ledger.owner_of("a1").await.unwrap().as_deref(), Some("bob"));
}

#[tokio::test]
async fn concurrent_initiates_cannot_both_complete() {
    let h = setup(DeletionMode::Quarantine).await;

    let (first, second) = tokio::join!(
        h.coordinator.initiate("a1", "bob"),
        h.coordinator.initiate("a1", "carol"),
    );
    let winners: Vec<_> = [first, second].into_iter().filter_map(|r| r.ok()).collect();
    assert_eq!(winners.len(), 1);
    let winner = &winners[0];

    h.coordinator
        .create_secure_transfer_package(&winner.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    h.coordinator.complete_transfer_on_ledger(&winner.id).await.unwrap();

    let completed: Vec<_> = h
        .coordinator
        .list_transfers()
        .unwrap()
        .into_iter()
        .filter(|s| s.asset_id == "a1" && s.status == TransferStatus::Completed)
        .collect();
    assert_eq!(completed.len(), 1);
}

#[tokio::test]
async fn separate_coordinators_share_the_asset_claim() {
    let h = setup(DeletionMode::Quarantine).await;
    let other = TransferCoordinator::new(
        h.store.clone(),
        Arc::new(SledSessionRepository::new(h.db.clone())),
        h.ledger.clone(),
        Arc::new(StandardCrypto),
        ProtocolConfig::default(),
    );

    let (a, b) = futures::join!(
        h.coordinator.initiate("a1", "bob"),
        other.initiate("a1", "carol"),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(RelicError::State { .. }))));
}

#[tokio::test]
async fn wrong_keys_never_yield_plaintext() {
    let h = setup(DeletionMode::Quarantine).await;
    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    let package = h
        .coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    let packager = h.coordinator.packager();

    let eve = DeliveryKeypair::generate();
    let err = packager
        .open_package(&package, &eve, &h.alice_key.public_key())
        .unwrap_err();
    assert!(matches!(err, RelicError::Verification(_)));

    let impostor = RelicKeypair::generate();
    let err = packager
        .open_package(&package, &h.bob_delivery, &impostor.public_key())
        .unwrap_err();
    assert!(matches!(err, RelicError::Verification(_)));
}

#[tokio::test]
async fn tampered_content_is_an_integrity_failure() {
    let h = setup(DeletionMode::Quarantine).await;

    let mut tampered = CONTENT.to_vec();
    tampered[0] ^= 0xff;
    let result = h.provenance.verify_provenance("a1", Some(&tampered)).await.unwrap();

    assert!(!result.verified);
    assert!(result.has_integrity_error());
    // The chain itself is fine; only the bytes are wrong.
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.chain_length, 1);
}

#[tokio::test]
async fn ledger_outage_fails_session_and_restore_reconciles() {
    let h = setup(DeletionMode::Quarantine).await;
    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    h.coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();

    h.ledger.set_down(true);
    let err = h
        .coordinator
        .complete_transfer_on_ledger(&session.id)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let failed = h.coordinator.get_transfer(&session.id).unwrap().unwrap();
    assert_eq!(failed.status, TransferStatus::Failed);
    let failure = failed.failure.clone().unwrap();
    assert_eq!(failure.stage, TransferStatus::LedgerVerification);
    assert!(failure.content_quarantined);
    assert!(h.store.is_quarantined("a1").await.unwrap());

    // Provenance refuses a transfer that never reached the ledger.
    let proof = failed.deletion_proof.clone().unwrap();
    assert!(h.provenance.record_transfer(&failed, &proof).await.is_err());

    let reconciled = h
        .coordinator
        .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
        .await
        .unwrap();
    assert_eq!(
        reconciled.reconciliation.unwrap().outcome,
        ReconciliationOutcome::Restored
    );
    assert_eq!(h.store.get_content("a1").await.unwrap(), CONTENT);
    assert!(h.store.get_metadata("a1").await.unwrap().pending_transfer.is_none());

    // The seller can sell again once the ledger is back.
    h.ledger.set_down(false);
    let retry = h.coordinator.initiate("a1", "bob").await.unwrap();
    assert_ne!(retry.id, session.id);
    h.coordinator
        .create_secure_transfer_package(&retry.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    h.coordinator.complete_transfer_on_ledger(&retry.id).await.unwrap();

    let verified = h.provenance.verify_provenance("a1", None).await.unwrap();
    // Chain not yet updated: ledger says bob, chain says alice.
    assert!(!verified.verified);

    let done = h.coordinator.get_transfer(&retry.id).unwrap().unwrap();
    h.provenance
        .record_transfer(&done, done.deletion_proof.as_ref().unwrap())
        .await
        .unwrap();
    assert!(h.provenance.verify_provenance("a1", None).await.unwrap().verified);
}

#[tokio::test]
async fn hard_delete_leaves_nothing_to_restore() {
    let h = setup(DeletionMode::Hard).await;
    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    h.coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    assert!(!h.store.is_quarantined("a1").await.unwrap());

    h.ledger.set_down(true);
    h.coordinator
        .complete_transfer_on_ledger(&session.id)
        .await
        .unwrap_err();

    let reconciled = h
        .coordinator
        .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
        .await
        .unwrap();
    assert_eq!(
        reconciled.reconciliation.unwrap().outcome,
        ReconciliationOutcome::NothingToRestore
    );

    // Deleted and unconfirmed: a new transfer is refused.
    assert!(matches!(
        h.coordinator.initiate("a1", "carol").await,
        Err(RelicError::NotFound { .. })
    ));
}

#[tokio::test]
async fn chain_invariants_hold_across_transfers() {
    let h = setup(DeletionMode::Quarantine).await;

    // alice -> bob through the marketplace.
    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    let package = h
        .coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    h.coordinator.complete_transfer_on_ledger(&session.id).await.unwrap();
    let done = h.coordinator.get_transfer(&session.id).unwrap().unwrap();
    h.provenance
        .record_transfer(&done, done.deletion_proof.as_ref().unwrap())
        .await
        .unwrap();

    // bob imports what he received, then hands it to carol directly.
    let (content, metadata) = h
        .coordinator
        .packager()
        .open_package(&package, &h.bob_delivery, &h.alice_key.public_key())
        .unwrap();
    let mut imported = metadata.without_pending();
    imported.owner = "bob".into();
    h.store.put_asset(&imported, &content).await.unwrap();
    let chain = h
        .provenance
        .record_direct_transfer("a1", "bob", "carol")
        .await
        .unwrap();

    assert_eq!(chain.len(), 3);
    for (i, record) in chain.records.iter().enumerate() {
        assert_eq!(record.version as usize, i + 1);
    }
    for pair in chain.records.windows(2) {
        assert_eq!(pair[1].previous_owner.as_deref(), Some(pair[0].owner.as_str()));
    }
    assert!(chain.validate().is_empty());
    assert_eq!(chain.content_fingerprint, sha256_hex(CONTENT));
}

#[tokio::test]
async fn certificate_for_transferred_asset() {
    let h = setup(DeletionMode::Quarantine).await;
    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    h.coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();
    let tx_ref = h.coordinator.complete_transfer_on_ledger(&session.id).await.unwrap();
    let done = h.coordinator.get_transfer(&session.id).unwrap().unwrap();
    h.provenance
        .record_transfer(&done, done.deletion_proof.as_ref().unwrap())
        .await
        .unwrap();

    let config = ProtocolConfig::default().with_explorer("https://explorer.example");
    let generator = CertificateGenerator::new(h.provenance.clone(), RelicKeypair::generate(), config);
    let certificate = generator.generate("a1").await.unwrap().unwrap();

    assert_eq!(certificate.creator, "alice");
    assert_eq!(certificate.current_owner, "bob");
    assert!(certificate.verified);
    assert!(certificate.verify_signature());
    assert_eq!(
        certificate.history[1].ledger_link.as_deref(),
        Some(format!("https://explorer.example/tx/{}", tx_ref).as_str())
    );
    assert!(generator.generate("unknown").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Provenance only follows confirmed sales
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unconfirmed_sale_never_reaches_the_chain() {
    let h = setup(DeletionMode::Quarantine).await;
    let session = h.coordinator.initiate("a1", "bob").await.unwrap();
    h.coordinator
        .create_secure_transfer_package(&session.id, &h.alice_key, &h.bob_delivery.public_key())
        .await
        .unwrap();

    let pending = h.coordinator.get_transfer(&session.id).unwrap().unwrap();
    let proof = pending.deletion_proof.clone().unwrap();
    assert!(matches!(
        h.provenance.record_transfer(&pending, &proof).await,
        Err(RelicError::State { .. })
    ));

    // The sale then dies on the ledger and the seller gets the copy back.
    h.ledger.set_down(true);
    h.coordinator
        .complete_transfer_on_ledger(&session.id)
        .await
        .unwrap_err();
    let reconciled = h
        .coordinator
        .reconcile_failed_transfer(&session.id, Reconciliation::RestoreToSeller)
        .await
        .unwrap();
    assert_eq!(
        reconciled.reconciliation.unwrap().outcome,
        ReconciliationOutcome::Restored
    );

    let chain = h.provenance.get_chain("a1").unwrap().unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.current_owner(), Some("alice"));
    assert_eq!(h.store.get_metadata("a1").await.unwrap().owner, "alice");
    let result = h.provenance.verify_provenance("a1", Some(CONTENT)).await.unwrap();
    assert!(result.verified, "{:?}", result.errors);
    assert_eq!(result.current_owner.as_deref(), Some("alice"));
}
