//! # Deletion Proofs
//!
//! A deletion proof is the seller's signed statement that specific content
//! and metadata existed at a given instant and were then removed from their
//! store. The generator enforces one ordering: read, hash, sign, and only
//! then delete. A proof generated after deletion would assert properties of
//! bytes nobody read.
//!
//! ## Signed payload
//!
//! ```text
//! canonical_payload("relic/deletion-proof/v1", [
//!     asset_id,
//!     timestamp (unix millis, decimal),
//!     content_hash (hex),
//!     metadata_hash (hex),
//! ])
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{DeletionMode, DOMAIN_DELETION_PROOF};
use crate::crypto::canonical::canonical_payload;
use crate::crypto::keys::{RelicKeypair, RelicPublicKey, RelicSignature};
use crate::crypto::provider::CryptoProvider;
use crate::crypto::sha256_hex;
use crate::error::Result;
use crate::ledger::TxRef;
use crate::storage::assets::AssetStore;

/// Signed evidence that an asset's bytes existed and were removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionProof {
    pub asset_id: String,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 (hex) of the content bytes read before deletion.
    pub content_hash: String,
    /// SHA-256 (hex) of the stored metadata record read before deletion.
    pub metadata_hash: String,
    /// Key that produced `owner_signature`.
    pub owner_public_key: RelicPublicKey,
    pub owner_signature: RelicSignature,
    /// How the bytes were removed.
    pub mode: DeletionMode,
    /// Ledger transaction that confirmed the transfer. Not signed; set
    /// after the fact.
    pub ledger_anchor: Option<TxRef>,
}

impl DeletionProof {
    /// The exact bytes covered by `owner_signature`.
    pub fn signing_payload(&self) -> Vec<u8> {
        Self::payload_for(
            &self.asset_id,
            &self.timestamp,
            &self.content_hash,
            &self.metadata_hash,
        )
    }

    fn payload_for(
        asset_id: &str,
        timestamp: &DateTime<Utc>,
        content_hash: &str,
        metadata_hash: &str,
    ) -> Vec<u8> {
        let millis = timestamp.timestamp_millis().to_string();
        canonical_payload(
            DOMAIN_DELETION_PROOF,
            &[
                asset_id.as_bytes(),
                millis.as_bytes(),
                content_hash.as_bytes(),
                metadata_hash.as_bytes(),
            ],
        )
    }

    /// Check the signature against the embedded owner key.
    pub fn verify(&self) -> bool {
        self.owner_public_key
            .verify(&self.signing_payload(), &self.owner_signature)
    }

    /// Check the signature and that it was made by `expected`.
    pub fn verify_signed_by(&self, expected: &RelicPublicKey) -> bool {
        &self.owner_public_key == expected && self.verify()
    }

    /// SHA-256 (hex) of the signed payload followed by the signature.
    /// Stable identifier for this proof; ignores `ledger_anchor`.
    pub fn proof_hash(&self) -> String {
        let mut bytes = self.signing_payload();
        bytes.extend_from_slice(self.owner_signature.as_bytes());
        sha256_hex(&bytes)
    }
}

/// Produces [`DeletionProof`]s and performs the deletion they attest to.
pub struct DeletionProofGenerator {
    store: Arc<dyn AssetStore>,
    crypto: Arc<dyn CryptoProvider>,
    mode: DeletionMode,
}

impl DeletionProofGenerator {
    pub fn new(
        store: Arc<dyn AssetStore>,
        crypto: Arc<dyn CryptoProvider>,
        mode: DeletionMode,
    ) -> Self {
        Self {
            store,
            crypto,
            mode,
        }
    }

    pub fn mode(&self) -> DeletionMode {
        self.mode
    }

    /// Hash the asset's current bytes, sign the hashes, then delete it.
    ///
    /// If signing succeeds but deletion fails, the error propagates and no
    /// proof is returned; the asset stays where it was.
    pub async fn generate(&self, asset_id: &str, signing_key: &RelicKeypair) -> Result<DeletionProof> {
        let content = self.store.get_content(asset_id).await?;
        let metadata = self.store.get_metadata(asset_id).await?;

        let content_hash = self.crypto.hash(&content);
        let metadata_hash = self.crypto.hash(&metadata.canonical_bytes()?);
        let timestamp = Utc::now();

        let payload =
            DeletionProof::payload_for(asset_id, &timestamp, &content_hash, &metadata_hash);
        let owner_signature = self.crypto.sign(&payload, signing_key);

        match self.mode {
            DeletionMode::Quarantine => self.store.quarantine(asset_id).await?,
            DeletionMode::Hard => self.store.delete_asset(asset_id).await?,
        }

        tracing::info!(
            asset_id = %asset_id,
            content_hash = %content_hash,
            mode = ?self.mode,
            "asset deleted under signed proof"
        );

        Ok(DeletionProof {
            asset_id: asset_id.to_string(),
            timestamp,
            content_hash,
            metadata_hash,
            owner_public_key: signing_key.public_key(),
            owner_signature,
            mode: self.mode,
            ledger_anchor: None,
        })
    }
}
