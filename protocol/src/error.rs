//! Error types for the transfer and provenance subsystem.
//!
//! Every public operation returns [`Result<T>`]. Leaf modules keep their own
//! narrow errors (encryption, keys, storage) and convert into [`RelicError`]
//! at the boundary, so callers only ever match on one enum.
//!
//! Variants split into two groups. Terminal errors (`State`, `Integrity`,
//! `Verification`, `NotFound`, and undecodable stored records) will fail the
//! same way every time they are retried. Retryable errors (`Ledger`,
//! `Storage`, `Interrupted`, `Conflict`) describe a collaborator that may
//! behave differently on the next attempt. Retrying
//! means a caller-driven action against a fresh read or a new session, never
//! resubmitting a `Failed` session.

use thiserror::Error;

use crate::crypto::encryption::EncryptionError;
use crate::crypto::keys::KeyError;
use crate::crypto::sealing::SealingError;
use crate::storage::db::DbError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RelicError>;

/// Errors surfaced by relic operations.
#[derive(Debug, Error)]
pub enum RelicError {
    /// An asset, session, or chain does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up ("asset", "transfer", "provenance chain", ...).
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An operation was invoked against the wrong state.
    #[error("invalid state: {current}, expected {expected}")]
    State {
        /// The state the object is actually in.
        current: String,
        /// The state (or condition) the operation requires.
        expected: String,
    },

    /// A recomputed fingerprint or hash does not match the recorded one.
    #[error("integrity check failed for {subject}: expected {expected}, got {actual}")]
    Integrity {
        /// What was checked.
        subject: String,
        /// The recorded digest.
        expected: String,
        /// The recomputed digest.
        actual: String,
    },

    /// A signature check or a ledger ownership comparison failed.
    #[error("verification failed: {0}")]
    Verification(String),

    /// The external ledger call failed or returned something unexpected.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// The persistent store failed.
    #[error("storage error: {0}")]
    Storage(#[from] DbError),

    /// A step stopped partway, usually because its process died.
    #[error("interrupted during {0}")]
    Interrupted(String),

    /// A concurrent writer changed the record between read and write.
    #[error("concurrent modification of {0}")]
    Conflict(String),

    /// A cryptographic primitive failed for reasons other than verification.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Encoding or decoding a protocol structure failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RelicError {
    /// Shorthand for [`RelicError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Shorthand for [`RelicError::State`].
    pub fn state(current: impl ToString, expected: impl Into<String>) -> Self {
        Self::State {
            current: current.to_string(),
            expected: expected.into(),
        }
    }

    /// Whether a caller-driven retry could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // A record that does not decode fails the same way every time.
            RelicError::Storage(DbError::Serialization(_)) => false,
            RelicError::Ledger(_)
            | RelicError::Storage(_)
            | RelicError::Interrupted(_)
            | RelicError::Conflict(_) => true,
            _ => false,
        }
    }

    /// Whether the error will reproduce on every retry.
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// Short machine-readable label, used in session failure records and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            RelicError::NotFound { .. } => "not_found",
            RelicError::State { .. } => "state",
            RelicError::Integrity { .. } => "integrity",
            RelicError::Verification(_) => "verification",
            RelicError::Ledger(_) => "ledger",
            RelicError::Storage(_) => "storage",
            RelicError::Interrupted(_) => "interrupted",
            RelicError::Conflict(_) => "conflict",
            RelicError::Crypto(_) => "crypto",
            RelicError::Serialization(_) => "serialization",
        }
    }
}

impl From<EncryptionError> for RelicError {
    fn from(e: EncryptionError) -> Self {
        match e {
            // An authentication failure is a verification failure as far as
            // callers are concerned.
            EncryptionError::DecryptFailed => RelicError::Verification(e.to_string()),
            other => RelicError::Crypto(other.to_string()),
        }
    }
}

impl From<SealingError> for RelicError {
    fn from(e: SealingError) -> Self {
        RelicError::Verification(e.to_string())
    }
}

impl From<KeyError> for RelicError {
    fn from(e: KeyError) -> Self {
        RelicError::Crypto(e.to_string())
    }
}

impl From<serde_json::Error> for RelicError {
    fn from(e: serde_json::Error) -> Self {
        RelicError::Serialization(e.to_string())
    }
}
