//! # RelicDb — Persistent Storage Engine
//!
//! All on-disk state lives in one sled database, split into named trees:
//!
//! | Tree                  | Key              | Value                          |
//! |-----------------------|------------------|--------------------------------|
//! | `asset_content`       | asset id (UTF-8) | raw content bytes              |
//! | `asset_metadata`      | asset id         | JSON `AssetMetadata`           |
//! | `quarantine_content`  | asset id         | raw content bytes (soft-deleted) |
//! | `quarantine_metadata` | asset id         | JSON `AssetMetadata` (soft-deleted) |
//! | `sessions`            | transfer id      | `bincode(TransferSession)`     |
//! | `asset_claims`        | asset id         | transfer id holding the claim  |
//! | `chains`              | asset id         | `bincode(ProvenanceChain)`     |
//! | `ledger_tx`           | tx ref (hex)     | `bincode(LedgerEntry)`         |
//! | `ledger_attestations` | attestation id   | tx ref (hex)                   |
//! | `ledger_assets`       | asset id         | `bincode(LedgerAsset)`         |
//! | `meta`                | key (UTF-8)      | value (bytes)                  |
//!
//! Every write that must not interleave with another writer goes through
//! sled's compare-and-swap or a multi-tree transaction, never a
//! read-modify-write in application code.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// RelicDb
// ---------------------------------------------------------------------------

/// Handle to the relic database. Cheap to clone; sled trees are internally
/// reference counted and safe to share across threads.
#[derive(Debug, Clone)]
pub struct RelicDb {
    db: Db,
    pub(crate) asset_content: Tree,
    pub(crate) asset_metadata: Tree,
    pub(crate) quarantine_content: Tree,
    pub(crate) quarantine_metadata: Tree,
    pub(crate) sessions: Tree,
    pub(crate) asset_claims: Tree,
    pub(crate) chains: Tree,
    pub(crate) ledger_tx: Tree,
    pub(crate) ledger_attestations: Tree,
    pub(crate) ledger_assets: Tree,
    pub(crate) meta: Tree,
}

impl RelicDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. For tests and dry runs.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            asset_content: db.open_tree("asset_content")?,
            asset_metadata: db.open_tree("asset_metadata")?,
            quarantine_content: db.open_tree("quarantine_content")?,
            quarantine_metadata: db.open_tree("quarantine_metadata")?,
            sessions: db.open_tree("sessions")?,
            asset_claims: db.open_tree("asset_claims")?,
            chains: db.open_tree("chains")?,
            ledger_tx: db.open_tree("ledger_tx")?,
            ledger_attestations: db.open_tree("ledger_attestations")?,
            ledger_assets: db.open_tree("ledger_assets")?,
            meta: db.open_tree("meta")?,
            db,
        })
    }

    /// Flush dirty pages to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Read a small value from the `meta` tree.
    pub fn get_meta(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.meta.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    /// Write a small value to the `meta` tree.
    pub fn put_meta(&self, key: &str, value: &[u8]) -> DbResult<()> {
        self.meta.insert(key.as_bytes(), value)?;
        Ok(())
    }
}

/// bincode-encode a value for storage.
pub(crate) fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

/// bincode-decode a stored value.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_db_opens_all_trees() {
        let db = RelicDb::open_temporary().unwrap();
        assert!(db.sessions.is_empty());
        assert!(db.chains.is_empty());
        assert!(db.ledger_tx.is_empty());
    }

    #[test]
    fn meta_roundtrip() {
        let db = RelicDb::open_temporary().unwrap();
        assert!(db.get_meta("height").unwrap().is_none());
        db.put_meta("height", &7u64.to_be_bytes()).unwrap();
        assert_eq!(db.get_meta("height").unwrap().unwrap(), 7u64.to_be_bytes());
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = RelicDb::open(dir.path()).unwrap();
            db.put_meta("k", b"v").unwrap();
            db.flush().unwrap();
        }
        let db = RelicDb::open(dir.path()).unwrap();
        assert_eq!(db.get_meta("k").unwrap().unwrap(), b"v");
    }

    #[test]
    fn bincode_helpers_roundtrip() {
        let bytes = encode(&("a1".to_string(), 3u64)).unwrap();
        let back: (String, u64) = decode(&bytes).unwrap();
        assert_eq!(back, ("a1".to_string(), 3));
        assert!(decode::<(String, u64)>(&[0xff]).is_err());
    }
}
