// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # relic — Transfer & Provenance Core
//!
//! Digital assets held as plain files have no natural scarcity: copying a
//! file is free. relic makes a sale mean something by pairing every
//! transfer with a signed proof that the seller's copy was destroyed, and
//! by keeping an append-only ownership chain per asset that can be anchored
//! on an external ledger.
//!
//! ## Architecture
//!
//! - **crypto** — Ed25519, X25519 key delivery, AES-256-GCM, SHA-256/BLAKE3.
//! - **storage** — sled-backed asset store, session and chain repositories.
//! - **ledger** — The external ledger contract and a local implementation.
//! - **transfer** — Sessions, deletion proofs, secure packages, coordinator.
//! - **provenance** — Ownership chains, verification, certificates.
//! - **config** — Protocol constants and runtime configuration.
//! - **error** — The error taxonomy shared by all of the above.
//!
//! ## Transfer flow
//!
//! ```text
//! initiate ─► create_secure_transfer_package ─► complete_transfer_on_ledger
//!               │ encrypt for buyer                 │ anchor attestation
//!               │ sign deletion proof               │ purge quarantine
//!               │ quarantine seller copy            ▼
//!               ▼                               record_transfer (provenance)
//!          PENDING_CONFIRMATION
//! ```
//!
//! Any failure leaves the session `FAILED`. Failed sessions are never
//! retried; they are reconciled explicitly with
//! [`TransferCoordinator::reconcile_failed_transfer`].

pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod provenance;
pub mod storage;
pub mod transfer;

pub use config::{DeletionMode, ProtocolConfig};
pub use error::{RelicError, Result};
pub use ledger::{LedgerClient, LocalLedger, TxRef};
pub use provenance::{CertificateGenerator, ProvenanceLedger};
pub use transfer::{TransferCoordinator, TransferSession, TransferStatus};
