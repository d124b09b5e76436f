//! # Transfer Protocol
//!
//! Moving an asset from seller to buyer, with the seller's copy destroyed
//! under a signed proof.
//!
//! ```text
//! session.rs     — TransferSession and its state machine
//! deletion.rs    — DeletionProof, DeletionProofGenerator
//! package.rs     — SecurePackager, EncryptedPayload, SecureTransferPackage
//! coordinator.rs — TransferCoordinator: initiate → package → ledger
//! ```

pub mod coordinator;
pub mod deletion;
pub mod package;
pub mod session;

pub use coordinator::TransferCoordinator;
pub use deletion::{DeletionProof, DeletionProofGenerator};
pub use package::{EncryptedPayload, SecurePackager, SecureTransferPackage, TransferMetadata, Watermark};
pub use session::{
    FailureRecord, Reconciliation, ReconciliationOutcome, ReconciliationRecord, TransferSession,
    TransferStatus,
};
