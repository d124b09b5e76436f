//! # Chain Repository
//!
//! One [`ProvenanceChain`] per asset id, bincode-encoded. Chains are created
//! once and only ever grow; [`ChainRepository::append`] refuses to write
//! unless the stored chain still has the length the caller started from.

use super::db::{decode, encode, DbError, RelicDb};
use crate::error::{RelicError, Result};
use crate::provenance::record::ProvenanceChain;

pub trait ChainRepository: Send + Sync {
    /// Store a new chain. `Conflict` if one already exists for the asset.
    fn create(&self, chain: &ProvenanceChain) -> Result<()>;

    fn get(&self, asset_id: &str) -> Result<Option<ProvenanceChain>>;

    /// Replace the stored chain with `chain`, which must extend a stored
    /// chain of exactly `expected_len` records.
    fn append(&self, chain: &ProvenanceChain, expected_len: usize) -> Result<()>;

    fn list_asset_ids(&self) -> Result<Vec<String>>;
}

/// [`ChainRepository`] over the `chains` tree.
#[derive(Debug, Clone)]
pub struct SledChainRepository {
    db: RelicDb,
}

impl SledChainRepository {
    pub fn new(db: RelicDb) -> Self {
        Self { db }
    }
}

impl ChainRepository for SledChainRepository {
    fn create(&self, chain: &ProvenanceChain) -> Result<()> {
        let bytes = encode(chain)?;
        self.db
            .chains
            .compare_and_swap(chain.asset_id.as_bytes(), None as Option<&[u8]>, Some(bytes))
            .map_err(DbError::from)?
            .map_err(|_| {
                RelicError::Conflict(format!("provenance chain {} already exists", chain.asset_id))
            })
    }

    fn get(&self, asset_id: &str) -> Result<Option<ProvenanceChain>> {
        match self.db.chains.get(asset_id.as_bytes()).map_err(DbError::from)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn append(&self, chain: &ProvenanceChain, expected_len: usize) -> Result<()> {
        let key = chain.asset_id.as_bytes();
        let current = self
            .db
            .chains
            .get(key)
            .map_err(DbError::from)?
            .ok_or_else(|| RelicError::not_found("provenance chain", chain.asset_id.as_str()))?;
        let stored: ProvenanceChain = decode(&current)?;

        if stored.len() != expected_len
            || chain.len() <= expected_len
            || chain.records[..expected_len] != stored.records[..]
        {
            return Err(RelicError::Conflict(format!(
                "provenance chain {} changed underneath append",
                chain.asset_id
            )));
        }

        let bytes = encode(chain)?;
        self.db
            .chains
            .compare_and_swap(key, Some(current), Some(bytes))
            .map_err(DbError::from)?
            .map_err(|_| RelicError::Conflict(format!("provenance chain {}", chain.asset_id)))
    }

    fn list_asset_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for key in self.db.chains.iter().keys() {
            let key = key.map_err(DbError::from)?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }
}
