//! # Provenance
//!
//! Who has owned an asset, in order, since it was created.
//!
//! ```text
//! record.rs      — OwnershipRecord, ProvenanceChain and its invariants
//! ledger.rs      — ProvenanceLedger: register, record, verify
//! certificate.rs — CertificateGenerator: signed ownership certificates
//! ```

pub mod certificate;
pub mod ledger;
pub mod record;

pub use certificate::{Certificate, CertificateEntry, CertificateGenerator};
pub use ledger::{ProvenanceLedger, VerificationIssue, VerificationResult};
pub use record::{OwnershipRecord, ProvenanceChain, TransferKind};
