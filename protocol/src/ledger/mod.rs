//! # Ledger Collaborator
//!
//! - `client` -- the [`LedgerClient`] trait and the types that cross it.
//! - `local` -- [`LocalLedger`], a sled-backed implementation for local use.

pub mod client;
pub mod local;

pub use client::{LedgerClient, LedgerEntry, LedgerOperation, TransferAttestation, TxRef};
pub use local::LocalLedger;
