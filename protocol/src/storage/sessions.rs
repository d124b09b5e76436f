//! # Session Repository
//!
//! Persistent home of [`TransferSession`]s and of the per-asset claims that
//! keep two transfers of the same asset from running at once.
//!
//! Writes are optimistic: [`SessionRepository::update`] succeeds only if the
//! stored revision still matches the caller's, then bumps it. A stale writer
//! gets `RelicError::Conflict` and must re-read.

use super::db::{decode, encode, DbError, RelicDb};
use crate::error::{RelicError, Result};
use crate::transfer::session::TransferSession;

/// Storage for transfer sessions and asset claims.
pub trait SessionRepository: Send + Sync {
    /// Store a new session. `Conflict` if the id exists.
    fn insert(&self, session: &TransferSession) -> Result<()>;

    fn get(&self, transfer_id: &str) -> Result<Option<TransferSession>>;

    /// Compare-and-swap on `session.revision`. On success the stored and
    /// in-memory revisions are both incremented.
    fn update(&self, session: &mut TransferSession) -> Result<()>;

    fn list(&self) -> Result<Vec<TransferSession>>;

    /// Atomically claim `asset_id` for `transfer_id`. Returns the current
    /// holder if the claim is already taken.
    fn claim_asset(&self, asset_id: &str, transfer_id: &str) -> Result<Option<String>>;

    /// Replace a stale claim held by `stale_holder`. `false` if someone else
    /// changed the claim first.
    fn replace_claim(&self, asset_id: &str, stale_holder: &str, transfer_id: &str) -> Result<bool>;

    /// Release the claim if `transfer_id` holds it.
    fn release_asset(&self, asset_id: &str, transfer_id: &str) -> Result<()>;

    fn claim_holder(&self, asset_id: &str) -> Result<Option<String>>;
}

/// [`SessionRepository`] over the `sessions` and `asset_claims` trees.
#[derive(Debug, Clone)]
pub struct SledSessionRepository {
    db: RelicDb,
}

impl SledSessionRepository {
    pub fn new(db: RelicDb) -> Self {
        Self { db }
    }
}

impl SessionRepository for SledSessionRepository {
    fn insert(&self, session: &TransferSession) -> Result<()> {
        let bytes = encode(session)?;
        self.db
            .sessions
            .compare_and_swap(session.id.as_bytes(), None as Option<&[u8]>, Some(bytes))
            .map_err(DbError::from)?
            .map_err(|_| RelicError::Conflict(format!("transfer {} already exists", session.id)))
    }

    fn get(&self, transfer_id: &str) -> Result<Option<TransferSession>> {
        match self
            .db
            .sessions
            .get(transfer_id.as_bytes())
            .map_err(DbError::from)?
        {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn update(&self, session: &mut TransferSession) -> Result<()> {
        let key = session.id.as_bytes();
        let current = self
            .db
            .sessions
            .get(key)
            .map_err(DbError::from)?
            .ok_or_else(|| RelicError::not_found("transfer", session.id.as_str()))?;
        let stored: TransferSession = decode(&current)?;
        if stored.revision != session.revision {
            return Err(RelicError::Conflict(format!(
                "transfer {} at revision {}, writer had {}",
                session.id, stored.revision, session.revision
            )));
        }

        let mut next = session.clone();
        next.revision += 1;
        let bytes = encode(&next)?;
        self.db
            .sessions
            .compare_and_swap(key, Some(current), Some(bytes))
            .map_err(DbError::from)?
            .map_err(|_| RelicError::Conflict(format!("transfer {}", session.id)))?;

        session.revision = next.revision;
        Ok(())
    }

    fn list(&self) -> Result<Vec<TransferSession>> {
        let mut sessions = Vec::new();
        for item in self.db.sessions.iter().values() {
            let bytes = item.map_err(DbError::from)?;
            sessions.push(decode::<TransferSession>(&bytes)?);
        }
        sessions.sort_by(|a, b| a.initiated_at.cmp(&b.initiated_at));
        Ok(sessions)
    }

    fn claim_asset(&self, asset_id: &str, transfer_id: &str) -> Result<Option<String>> {
        let outcome = self
            .db
            .asset_claims
            .compare_and_swap(
                asset_id.as_bytes(),
                None as Option<&[u8]>,
                Some(transfer_id.as_bytes()),
            )
            .map_err(DbError::from)?;
        Ok(match outcome {
            Ok(()) => None,
            Err(e) => e
                .current
                .map(|holder| String::from_utf8_lossy(&holder).into_owned()),
        })
    }

    fn replace_claim(&self, asset_id: &str, stale_holder: &str, transfer_id: &str) -> Result<bool> {
        let outcome = self
            .db
            .asset_claims
            .compare_and_swap(
                asset_id.as_bytes(),
                Some(stale_holder.as_bytes()),
                Some(transfer_id.as_bytes()),
            )
            .map_err(DbError::from)?;
        Ok(outcome.is_ok())
    }

    fn release_asset(&self, asset_id: &str, transfer_id: &str) -> Result<()> {
        // Losing the race here means the claim already belongs to someone
        // else, which is exactly what releasing wanted.
        let _ = self
            .db
            .asset_claims
            .compare_and_swap(
                asset_id.as_bytes(),
                Some(transfer_id.as_bytes()),
                None as Option<&[u8]>,
            )
            .map_err(DbError::from)?;
        Ok(())
    }

    fn claim_holder(&self, asset_id: &str) -> Result<Option<String>> {
        Ok(self
            .db
            .asset_claims
            .get(asset_id.as_bytes())
            .map_err(DbError::from)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::session::TransferStatus;

    fn repo() -> SledSessionRepository {
        SledSessionRepository::new(RelicDb::open_temporary().unwrap())
    }

    #[test]
    fn insert_get_list() {
        let repo = repo();
        let s = TransferSession::new("a1", "alice", "bob");
        repo.insert(&s).unwrap();
        assert_eq!(repo.get(&s.id).unwrap().unwrap(), s);
        assert!(repo.get("missing").unwrap().is_none());
        assert_eq!(repo.list().unwrap().len(), 1);
        assert!(matches!(repo.insert(&s), Err(RelicError::Conflict(_))));
    }

    #[test]
    fn update_bumps_revision() {
        let repo = repo();
        let mut s = TransferSession::new("a1", "alice", "bob");
        repo.insert(&s).unwrap();

        s.transition(TransferStatus::Extracting).unwrap();
        repo.update(&mut s).unwrap();
        assert_eq!(s.revision, 1);

        let stored = repo.get(&s.id).unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Extracting);
        assert_eq!(stored.revision, 1);
    }

    #[test]
    fn stale_writer_conflicts() {
        let repo = repo();
        let s = TransferSession::new("a1", "alice", "bob");
        repo.insert(&s).unwrap();

        let mut first = repo.get(&s.id).unwrap().unwrap();
        let mut second = first.clone();

        first.transition(TransferStatus::Extracting).unwrap();
        repo.update(&mut first).unwrap();

        second.fail(&RelicError::Ledger("x".into()), false);
        assert!(matches!(repo.update(&mut second), Err(RelicError::Conflict(_))));
        assert_eq!(
            repo.get(&s.id).unwrap().unwrap().status,
            TransferStatus::Extracting
        );
    }

    #[test]
    fn update_of_unknown_session_is_not_found() {
        let repo = repo();
        let mut s = TransferSession::new("a1", "alice", "bob");
        assert!(matches!(repo.update(&mut s), Err(RelicError::NotFound { .. })));
    }

    #[test]
    fn asset_claim_is_exclusive() {
        let repo = repo();
        assert_eq!(repo.claim_asset("a1", "t1").unwrap(), None);
        assert_eq!(repo.claim_asset("a1", "t2").unwrap().as_deref(), Some("t1"));
        assert_eq!(repo.claim_holder("a1").unwrap().as_deref(), Some("t1"));

        // Only the holder can release.
        repo.release_asset("a1", "t2").unwrap();
        assert_eq!(repo.claim_holder("a1").unwrap().as_deref(), Some("t1"));
        repo.release_asset("a1", "t1").unwrap();
        assert_eq!(repo.claim_asset("a1", "t2").unwrap(), None);
    }

    #[test]
    fn stale_claim_can_be_replaced_once() {
        let repo = repo();
        repo.claim_asset("a1", "t1").unwrap();
        assert!(repo.replace_claim("a1", "t1", "t2").unwrap());
        assert!(!repo.replace_claim("a1", "t1", "t3").unwrap());
        assert_eq!(repo.claim_holder("a1").unwrap().as_deref(), Some("t2"));
    }
}
