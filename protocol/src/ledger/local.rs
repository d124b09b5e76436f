//! # LocalLedger
//!
//! A [`LedgerClient`] that keeps its append-only log in the relic database.
//! Used by the CLI and by tests; a deployment that anchors on a real chain
//! swaps it for an RPC-backed client.
//!
//! Every commit writes the entry, the attestation index, the asset's
//! owner record and the new height in one sled transaction. The height
//! counter is guarded by a mutex, so commits are strictly ordered and each
//! transaction reference is derived from a unique height.
//!
//! Transfers of assets the ledger has never seen are accepted and start
//! tracking that asset; an asset registered here must be transferred by its
//! recorded owner.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sled::transaction::{TransactionError, TransactionResult, Transactional};

use super::client::{LedgerClient, LedgerEntry, LedgerOperation, TransferAttestation, TxRef};
use crate::config::KDF_CONTEXT_LEDGER_TX;
use crate::crypto::hash::domain_separated_hash_parts;
use crate::error::{RelicError, Result};
use crate::storage::db::{decode, encode, DbError, RelicDb};

const HEIGHT_KEY: &str = "ledger_height";

/// Per-asset state the ledger tracks.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct LedgerAsset {
    owner: String,
    content_hash: Option<String>,
    registration: Option<TxRef>,
    last_tx: TxRef,
}

/// sled-backed, idempotent ledger.
pub struct LocalLedger {
    db: RelicDb,
    height: Mutex<u64>,
}

impl LocalLedger {
    /// Open the ledger stored in `db`, resuming at its persisted height.
    pub fn open(db: RelicDb) -> Result<Self> {
        let height = match db.get_meta(HEIGHT_KEY)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    DbError::Serialization(format!("corrupt {} record", HEIGHT_KEY))
                })?;
                u64::from_be_bytes(arr)
            }
            None => 0,
        };
        Ok(Self {
            db,
            height: Mutex::new(height),
        })
    }

    /// Number of committed transactions.
    pub fn height(&self) -> u64 {
        *self.height.lock()
    }

    fn asset(&self, asset_id: &str) -> Result<Option<LedgerAsset>> {
        match self
            .db
            .ledger_assets
            .get(asset_id.as_bytes())
            .map_err(DbError::from)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn tx_ref_for(height: u64, asset_id: &str, operation: &[u8]) -> TxRef {
        TxRef::new(hex::encode(domain_separated_hash_parts(
            KDF_CONTEXT_LEDGER_TX,
            &[&height.to_be_bytes(), asset_id.as_bytes(), operation],
        )))
    }

    /// Append one entry. Caller holds the height lock.
    fn commit_locked(
        &self,
        height: &mut u64,
        asset_id: &str,
        operation: LedgerOperation,
        asset: impl FnOnce(&TxRef) -> LedgerAsset,
        attestation_id: Option<&str>,
    ) -> Result<TxRef> {
        let next = *height + 1;
        let op_bytes = encode(&operation)?;
        let tx_ref = Self::tx_ref_for(next, asset_id, &op_bytes);

        let entry = LedgerEntry {
            tx_ref: tx_ref.clone(),
            height: next,
            asset_id: asset_id.to_string(),
            operation,
            recorded_at: Utc::now(),
        };
        let entry_bytes = encode(&entry)?;
        let asset_bytes = encode(&asset(&tx_ref))?;
        let height_bytes = next.to_be_bytes();

        let trees = (
            &self.db.ledger_tx,
            &self.db.ledger_attestations,
            &self.db.ledger_assets,
            &self.db.meta,
        );
        let result: TransactionResult<(), ()> =
            trees.transaction(|(txs, attestations, assets, meta)| {
                txs.insert(tx_ref.as_str().as_bytes(), entry_bytes.as_slice())?;
                if let Some(id) = attestation_id {
                    attestations.insert(id.as_bytes(), tx_ref.as_str().as_bytes())?;
                }
                assets.insert(asset_id.as_bytes(), asset_bytes.as_slice())?;
                meta.insert(HEIGHT_KEY.as_bytes(), &height_bytes[..])?;
                Ok(())
            });
        result.map_err(|e| match e {
            TransactionError::Storage(e) => RelicError::from(DbError::Sled(e)),
            TransactionError::Abort(()) => RelicError::Ledger("commit aborted".into()),
        })?;

        *height = next;
        Ok(tx_ref)
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    async fn register_asset(
        &self,
        asset_id: &str,
        owner: &str,
        content_hash: &str,
        metadata_hash: &str,
        uri: Option<&str>,
    ) -> Result<TxRef> {
        let mut height = self.height.lock();

        if let Some(existing) = self.asset(asset_id)? {
            // Re-registering the same content by the same owner is a no-op.
            if let Some(tx) = existing.registration {
                if existing.owner == owner && existing.content_hash.as_deref() == Some(content_hash)
                {
                    return Ok(tx);
                }
            }
            return Err(RelicError::Ledger(format!(
                "asset {} already registered to {}",
                asset_id, existing.owner
            )));
        }

        let operation = LedgerOperation::Registration {
            owner: owner.to_string(),
            content_hash: content_hash.to_string(),
            metadata_hash: metadata_hash.to_string(),
            uri: uri.map(str::to_string),
        };
        let tx_ref = self.commit_locked(
            &mut height,
            asset_id,
            operation,
            |tx| LedgerAsset {
                owner: owner.to_string(),
                content_hash: Some(content_hash.to_string()),
                registration: Some(tx.clone()),
                last_tx: tx.clone(),
            },
            None,
        )?;

        tracing::info!(asset_id = %asset_id, owner = %owner, tx_ref = %tx_ref, "asset registered on ledger");
        Ok(tx_ref)
    }

    async fn record_transfer(
        &self,
        asset_id: &str,
        to_owner: &str,
        proof: &TransferAttestation,
    ) -> Result<TxRef> {
        if proof.asset_id != asset_id || proof.to_owner != to_owner {
            return Err(RelicError::Ledger(format!(
                "attestation for {} -> {} does not match transfer of {} -> {}",
                proof.asset_id, proof.to_owner, asset_id, to_owner
            )));
        }

        let attestation_id = proof.attestation_id();
        let mut height = self.height.lock();

        if let Some(existing) = self
            .db
            .ledger_attestations
            .get(attestation_id.as_bytes())
            .map_err(DbError::from)?
        {
            let tx_ref = TxRef::new(String::from_utf8_lossy(&existing).into_owned());
            tracing::debug!(asset_id = %asset_id, tx_ref = %tx_ref, "attestation already recorded");
            return Ok(tx_ref);
        }

        let previous = self.asset(asset_id)?;
        if let Some(asset) = &previous {
            if asset.owner != proof.from_owner {
                return Err(RelicError::Ledger(format!(
                    "ledger owner of {} is {}, not {}",
                    asset_id, asset.owner, proof.from_owner
                )));
            }
        }

        let tx_ref = self.commit_locked(
            &mut height,
            asset_id,
            LedgerOperation::Transfer(proof.clone()),
            |tx| LedgerAsset {
                owner: to_owner.to_string(),
                content_hash: previous.as_ref().and_then(|a| a.content_hash.clone()),
                registration: previous.as_ref().and_then(|a| a.registration.clone()),
                last_tx: tx.clone(),
            },
            Some(&attestation_id),
        )?;

        tracing::info!(
            asset_id = %asset_id,
            from = %proof.from_owner,
            to = %to_owner,
            tx_ref = %tx_ref,
            "transfer recorded on ledger"
        );
        Ok(tx_ref)
    }

    async fn asset_exists(&self, asset_id: &str) -> Result<bool> {
        Ok(self.asset(asset_id)?.is_some())
    }

    async fn owner_of(&self, asset_id: &str) -> Result<Option<String>> {
        Ok(self.asset(asset_id)?.map(|a| a.owner))
    }

    async fn verify_transaction(&self, tx_ref: &TxRef) -> Result<bool> {
        Ok(self
            .db
            .ledger_tx
            .contains_key(tx_ref.as_str().as_bytes())
            .map_err(DbError::from)?)
    }

    async fn transaction(&self, tx_ref: &TxRef) -> Result<Option<LedgerEntry>> {
        match self
            .db
            .ledger_tx
            .get(tx_ref.as_str().as_bytes())
            .map_err(DbError::from)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
