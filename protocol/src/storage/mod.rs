//! # Storage Module
//!
//! Everything relic persists, on top of one sled database.
//!
//! ## Architecture
//!
//! ```text
//! db.rs       — RelicDb: sled handle, named trees, bincode helpers
//! assets.rs   — AssetStore: live content + metadata, quarantine area
//! sessions.rs — SessionRepository: transfer sessions, per-asset claims
//! chains.rs   — ChainRepository: provenance chains, append-only
//! ```
//!
//! ## Design Decisions
//!
//! 1. **sled, not in-memory maps.** Sessions and chains must survive a crash
//!    in the middle of a transfer, or nobody can reconcile it afterwards.
//!
//! 2. **Compare-and-swap for every contended write.** Session transitions
//!    are keyed by revision, chain appends by length, asset claims by
//!    holder. No application-level read-modify-write.
//!
//! 3. **Bincode for records, JSON for metadata.** Asset metadata is hashed
//!    and handed to buyers, so it stays human-readable. Sessions and chains
//!    are internal and use the compact encoding.

pub mod assets;
pub mod chains;
pub mod db;
pub mod sessions;

pub use assets::{AssetMetadata, AssetStore, PendingTransfer, SledAssetStore};
pub use chains::{ChainRepository, SledChainRepository};
pub use db::{DbError, RelicDb};
pub use sessions::{SessionRepository, SledSessionRepository};
