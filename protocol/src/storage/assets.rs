//! # Asset Store
//!
//! Read/write access to asset content and metadata by id. This is the
//! "plain file" side of relic: an asset is whatever bytes sit under its id
//! plus a small JSON metadata record.
//!
//! Besides the live view, the sled-backed store keeps a *quarantine* area.
//! Soft deletion moves both content and metadata there atomically, so live
//! reads fail immediately while the bytes remain recoverable until the
//! ledger confirms the transfer or an operator reconciles it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{abort, TransactionError, Transactional};
use std::collections::BTreeMap;

use super::db::{DbError, RelicDb};
use crate::crypto::hash::sha256_hex;
use crate::error::{RelicError, Result};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Marker written by `initiate` so readers can see an in-flight transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    pub transfer_id: String,
    pub buyer_id: String,
    pub since: DateTime<Utc>,
}

/// Metadata record stored alongside an asset's content.
///
/// Also embedded in bincode-encoded session records, so no field may be
/// conditionally skipped on serialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub asset_id: String,
    pub name: String,
    /// Current holder. Only changes when a buyer imports a delivered package.
    pub owner: String,
    pub creator: String,
    #[serde(default)]
    pub content_type: Option<String>,
    /// SHA-256 (hex) of the content when the record was written.
    pub content_hash: String,
    #[serde(default)]
    pub uri: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub pending_transfer: Option<PendingTransfer>,
}

impl AssetMetadata {
    /// Metadata for freshly created content owned by its creator.
    pub fn new(
        asset_id: impl Into<String>,
        name: impl Into<String>,
        creator: impl Into<String>,
        content: &[u8],
    ) -> Self {
        let creator = creator.into();
        Self {
            asset_id: asset_id.into(),
            name: name.into(),
            owner: creator.clone(),
            creator,
            content_type: None,
            content_hash: sha256_hex(content),
            uri: None,
            created_at: Utc::now(),
            attributes: BTreeMap::new(),
            pending_transfer: None,
        }
    }

    /// Deterministic JSON encoding. Field order is fixed by the struct and
    /// attributes are a sorted map, so equal records give equal bytes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// SHA-256 (hex) of [`canonical_bytes`](Self::canonical_bytes).
    pub fn hash(&self) -> Result<String> {
        Ok(sha256_hex(&self.canonical_bytes()?))
    }

    /// Copy of this record without the in-flight transfer marker.
    pub fn without_pending(&self) -> Self {
        Self {
            pending_transfer: None,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// AssetStore
// ---------------------------------------------------------------------------

/// Asset content and metadata, addressed by asset id.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Live metadata. `NotFound` if absent or quarantined.
    async fn get_metadata(&self, asset_id: &str) -> Result<AssetMetadata>;

    /// Live content bytes. `NotFound` if absent or quarantined.
    async fn get_content(&self, asset_id: &str) -> Result<Vec<u8>>;

    /// Store a new asset. `Conflict` if the id is already live.
    async fn put_asset(&self, metadata: &AssetMetadata, content: &[u8]) -> Result<()>;

    /// Overwrite metadata of a live asset.
    async fn write_metadata(&self, asset_id: &str, metadata: &AssetMetadata) -> Result<()>;

    /// Permanently remove live content and metadata in one step. `NotFound`
    /// if either half is missing, in which case nothing is removed.
    async fn delete_asset(&self, asset_id: &str) -> Result<()>;

    /// Move content and metadata out of the live view in one step.
    async fn quarantine(&self, asset_id: &str) -> Result<()>;

    /// Move quarantined bytes back into the live view. Returns `false` if
    /// nothing was quarantined under this id.
    async fn restore_quarantined(&self, asset_id: &str) -> Result<bool>;

    /// Drop quarantined bytes for good. Returns `false` if there were none.
    async fn purge_quarantined(&self, asset_id: &str) -> Result<bool>;

    /// Whether quarantined bytes exist for this id.
    async fn is_quarantined(&self, asset_id: &str) -> Result<bool>;

    /// Whether the asset is live.
    async fn exists(&self, asset_id: &str) -> Result<bool>;

    /// Ids of all live assets.
    async fn list_ids(&self) -> Result<Vec<String>>;
}

// ---------------------------------------------------------------------------
// SledAssetStore
// ---------------------------------------------------------------------------

/// [`AssetStore`] over the `asset_*` and `quarantine_*` trees of [`RelicDb`].
#[derive(Debug, Clone)]
pub struct SledAssetStore {
    db: RelicDb,
}

/// Why a multi-tree store transaction aborted.
#[derive(Debug, Clone, Copy)]
enum MoveAbort {
    Missing,
    Occupied,
}

impl SledAssetStore {
    pub fn new(db: RelicDb) -> Self {
        Self { db }
    }

    fn decode_metadata(bytes: &[u8]) -> Result<AssetMetadata> {
        serde_json::from_slice(bytes).map_err(|e| DbError::Serialization(e.to_string()).into())
    }

    fn map_move_error(asset_id: &str, err: TransactionError<MoveAbort>) -> RelicError {
        match err {
            TransactionError::Abort(MoveAbort::Missing) => RelicError::not_found("asset", asset_id),
            TransactionError::Abort(MoveAbort::Occupied) => {
                RelicError::Conflict(format!("asset {} is already live", asset_id))
            }
            TransactionError::Storage(e) => DbError::Sled(e).into(),
        }
    }
}

#[async_trait]
impl AssetStore for SledAssetStore {
    async fn get_metadata(&self, asset_id: &str) -> Result<AssetMetadata> {
        let bytes = self
            .db
            .asset_metadata
            .get(asset_id.as_bytes())
            .map_err(DbError::from)?
            .ok_or_else(|| RelicError::not_found("asset", asset_id))?;
        Self::decode_metadata(&bytes)
    }

    async fn get_content(&self, asset_id: &str) -> Result<Vec<u8>> {
        self.db
            .asset_content
            .get(asset_id.as_bytes())
            .map_err(DbError::from)?
            .map(|v| v.to_vec())
            .ok_or_else(|| RelicError::not_found("asset", asset_id))
    }

    async fn put_asset(&self, metadata: &AssetMetadata, content: &[u8]) -> Result<()> {
        let key = metadata.asset_id.as_bytes();
        let meta_bytes = metadata.canonical_bytes()?;

        let result = (&self.db.asset_content, &self.db.asset_metadata).transaction(
            |(live_content, live_metadata)| {
                if live_content.get(key)?.is_some() {
                    return abort(MoveAbort::Occupied);
                }
                live_content.insert(key, content)?;
                live_metadata.insert(key, meta_bytes.as_slice())?;
                Ok(())
            },
        );
        result.map_err(|e| Self::map_move_error(&metadata.asset_id, e))?;

        tracing::debug!(asset_id = %metadata.asset_id, bytes = content.len(), "asset stored");
        Ok(())
    }

    async fn write_metadata(&self, asset_id: &str, metadata: &AssetMetadata) -> Result<()> {
        if !self.exists(asset_id).await? {
            return Err(RelicError::not_found("asset", asset_id));
        }
        self.db
            .asset_metadata
            .insert(asset_id.as_bytes(), metadata.canonical_bytes()?)
            .map_err(DbError::from)?;
        Ok(())
    }

    async fn delete_asset(&self, asset_id: &str) -> Result<()> {
        let key = asset_id.as_bytes();
        let result = (&self.db.asset_content, &self.db.asset_metadata).transaction(
            |(content, metadata)| {
                if content.remove(key)?.is_none() || metadata.remove(key)?.is_none() {
                    return abort(MoveAbort::Missing);
                }
                Ok(())
            },
        );
        result.map_err(|e| Self::map_move_error(asset_id, e))?;

        tracing::info!(asset_id = %asset_id, "asset deleted");
        Ok(())
    }

    async fn quarantine(&self, asset_id: &str) -> Result<()> {
        let key = asset_id.as_bytes();
        let trees = (
            &self.db.asset_content,
            &self.db.asset_metadata,
            &self.db.quarantine_content,
            &self.db.quarantine_metadata,
        );
        let result = trees.transaction(|(content, metadata, q_content, q_metadata)| {
            let Some(c) = content.remove(key)? else {
                return abort(MoveAbort::Missing);
            };
            let Some(m) = metadata.remove(key)? else {
                return abort(MoveAbort::Missing);
            };
            q_content.insert(key, c)?;
            q_metadata.insert(key, m)?;
            Ok(())
        });
        result.map_err(|e| Self::map_move_error(asset_id, e))?;

        tracing::info!(asset_id = %asset_id, "asset quarantined");
        Ok(())
    }

    async fn restore_quarantined(&self, asset_id: &str) -> Result<bool> {
        if !self.is_quarantined(asset_id).await? {
            return Ok(false);
        }
        let key = asset_id.as_bytes();
        let trees = (
            &self.db.quarantine_content,
            &self.db.quarantine_metadata,
            &self.db.asset_content,
            &self.db.asset_metadata,
        );
        let result = trees.transaction(|(q_content, q_metadata, content, metadata)| {
            if content.get(key)?.is_some() {
                return abort(MoveAbort::Occupied);
            }
            let Some(c) = q_content.remove(key)? else {
                return abort(MoveAbort::Missing);
            };
            let Some(m) = q_metadata.remove(key)? else {
                return abort(MoveAbort::Missing);
            };
            content.insert(key, c)?;
            metadata.insert(key, m)?;
            Ok(())
        });
        result.map_err(|e| Self::map_move_error(asset_id, e))?;

        tracing::info!(asset_id = %asset_id, "quarantined asset restored");
        Ok(true)
    }

    async fn purge_quarantined(&self, asset_id: &str) -> Result<bool> {
        let key = asset_id.as_bytes();
        let content = self.db.quarantine_content.remove(key).map_err(DbError::from)?;
        let metadata = self.db.quarantine_metadata.remove(key).map_err(DbError::from)?;
        let purged = content.is_some() || metadata.is_some();
        if purged {
            tracing::info!(asset_id = %asset_id, "quarantined asset purged");
        }
        Ok(purged)
    }

    async fn is_quarantined(&self, asset_id: &str) -> Result<bool> {
        Ok(self
            .db
            .quarantine_content
            .contains_key(asset_id.as_bytes())
            .map_err(DbError::from)?)
    }

    async fn exists(&self, asset_id: &str) -> Result<bool> {
        Ok(self
            .db
            .asset_content
            .contains_key(asset_id.as_bytes())
            .map_err(DbError::from)?)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for key in self.db.asset_metadata.iter().keys() {
            let key = key.map_err(DbError::from)?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SledAssetStore {
        SledAssetStore::new(RelicDb::open_temporary().unwrap())
    }

    async fn seeded(id: &str) -> SledAssetStore {
        let store = store();
        let meta = AssetMetadata::new(id, "Sunset", "alice", b"pixels");
        store.put_asset(&meta, b"pixels").await.unwrap();
        store
    }

    #[tokio::test]
    async fn put_then_read_back() {
        let store = seeded("a1").await;
        assert_eq!(store.get_content("a1").await.unwrap(), b"pixels");
        let meta = store.get_metadata("a1").await.unwrap();
        assert_eq!(meta.owner, "alice");
        assert_eq!(meta.content_hash, sha256_hex(b"pixels"));
        assert_eq!(store.list_ids().await.unwrap(), vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_put_conflicts() {
        let store = seeded("a1").await;
        let meta = AssetMetadata::new("a1", "Other", "mallory", b"x");
        let err = store.put_asset(&meta, b"x").await.unwrap_err();
        assert!(matches!(err, RelicError::Conflict(_)));
    }

    #[tokio::test]
    async fn missing_asset_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get_content("nope").await,
            Err(RelicError::NotFound { .. })
        ));
        let meta = AssetMetadata::new("nope", "n", "alice", b"");
        assert!(store.write_metadata("nope", &meta).await.is_err());
    }

    #[tokio::test]
    async fn quarantine_hides_then_restores() {
        let store = seeded("a1").await;
        store.quarantine("a1").await.unwrap();

        assert!(!store.exists("a1").await.unwrap());
        assert!(store.is_quarantined("a1").await.unwrap());
        assert!(store.get_metadata("a1").await.is_err());

        assert!(store.restore_quarantined("a1").await.unwrap());
        assert_eq!(store.get_content("a1").await.unwrap(), b"pixels");
        assert!(!store.is_quarantined("a1").await.unwrap());
        assert!(!store.restore_quarantined("a1").await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_quarantined_bytes() {
        let store = seeded("a1").await;
        store.quarantine("a1").await.unwrap();
        assert!(store.purge_quarantined("a1").await.unwrap());
        assert!(!store.purge_quarantined("a1").await.unwrap());
        assert!(!store.restore_quarantined("a1").await.unwrap());
    }

    #[tokio::test]
    async fn restore_refuses_to_overwrite_live_asset() {
        let store = seeded("a1").await;
        store.quarantine("a1").await.unwrap();
        let meta = AssetMetadata::new("a1", "Reimport", "bob", b"new");
        store.put_asset(&meta, b"new").await.unwrap();

        let err = store.restore_quarantined("a1").await.unwrap_err();
        assert!(matches!(err, RelicError::Conflict(_)));
        assert!(store.is_quarantined("a1").await.unwrap());
    }

    #[tokio::test]
    async fn hard_delete_removes_both_halves() {
        let store = seeded("a1").await;
        store.delete_asset("a1").await.unwrap();
        assert!(!store.exists("a1").await.unwrap());
        assert!(store.get_metadata("a1").await.is_err());
        assert!(matches!(
            store.delete_asset("a1").await,
            Err(RelicError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn hard_delete_of_half_written_asset_removes_nothing() {
        let store = seeded("a1").await;
        // Metadata without content: the delete aborts as a whole.
        store.db.asset_content.remove("a1".as_bytes()).unwrap();

        assert!(matches!(
            store.delete_asset("a1").await,
            Err(RelicError::NotFound { .. })
        ));
        assert!(store.db.asset_metadata.contains_key("a1".as_bytes()).unwrap());
    }

    #[test]
    fn metadata_hash_is_stable_and_marker_sensitive() {
        let meta = AssetMetadata::new("a1", "Sunset", "alice", b"pixels");
        assert_eq!(meta.hash().unwrap(), meta.clone().hash().unwrap());

        let mut marked = meta.clone();
        marked.pending_transfer = Some(PendingTransfer {
            transfer_id: "t1".into(),
            buyer_id: "bob".into(),
            since: Utc::now(),
        });
        assert_ne!(marked.hash().unwrap(), meta.hash().unwrap());
        assert_eq!(marked.without_pending().hash().unwrap(), meta.hash().unwrap());
    }
}
