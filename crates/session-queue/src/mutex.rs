//! Session mutex backed by a lease record in the store.
//!
//! One `session_lease` record per session carries an opaque holder token
//! and a millisecond-epoch expiry. Acquisition is a single conditional
//! UPSERT, so it is atomic in the store; expiry guarantees that a crashed
//! holder cannot starve the session. Fairness is best-effort: waiters poll
//! with a jittered retry interval.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::persistence::error::{PersistenceError, PersistenceResult, from_surrealdb_error};
use crate::persistence::SessionStore;

/// Lease record stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LeaseRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Thing>,
    holder_token: String,
    holder_worker: String,
    acquired_at: DateTime<Utc>,
    expires_at_ms: i64,
}

/// Proof of holding a session's mutex.
///
/// The token is unique per acquisition, so two tasks in the same worker
/// process can never both hold one session's lease.
#[derive(Debug)]
pub struct LeaseGuard {
    session_id: String,
    token: String,
}

impl LeaseGuard {
    /// The session this guard locks.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Keyed exclusive lock over sessions.
#[derive(Debug, Clone)]
pub struct SessionMutex {
    store: SessionStore,
    worker_id: String,
    retry_interval: Duration,
    lease_ttl: Duration,
}

impl SessionMutex {
    /// Create a mutex handle for one worker.
    #[must_use]
    pub fn new(
        store: SessionStore,
        worker_id: impl Into<String>,
        retry_interval: Duration,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            retry_interval,
            lease_ttl,
        }
    }

    /// Acquire the mutex for a session, waiting up to `wait_timeout`.
    ///
    /// The first attempt always happens, so a zero timeout still succeeds
    /// on an uncontended session. Returns `None` if the deadline passes
    /// without acquisition; the caller must not touch the session's work
    /// items in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn acquire(
        &self,
        session_id: &str,
        wait_timeout: Duration,
    ) -> PersistenceResult<Option<LeaseGuard>> {
        let deadline = tokio::time::Instant::now() + wait_timeout;

        loop {
            if let Some(guard) = self.try_acquire(session_id).await? {
                debug!(session_id, worker_id = %self.worker_id, "session mutex acquired");
                return Ok(Some(guard));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                debug!(session_id, worker_id = %self.worker_id, "session mutex wait timed out");
                return Ok(None);
            }

            // Jitter keeps a herd of waiters from retrying in lockstep.
            let jitter_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..=self.retry_interval.as_millis() as u64 / 2)
            };
            let backoff = self.retry_interval + Duration::from_millis(jitter_ms);
            let remaining = deadline - now;
            tokio::time::sleep(backoff.min(remaining)).await;
        }
    }

    /// Release a held lease.
    ///
    /// Deleting is conditional on the guard's token, so a lease that
    /// expired and was re-acquired by someone else is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    pub async fn release(&self, guard: LeaseGuard) -> PersistenceResult<()> {
        self.store
            .db()
            .query(
                "DELETE type::thing('session_lease', $session_id) \
                 WHERE holder_token = $lease_token;",
            )
            .bind(("session_id", guard.session_id.clone()))
            .bind(("lease_token", guard.token))
            .await
            .map_err(from_surrealdb_error)?;

        debug!(session_id = %guard.session_id, worker_id = %self.worker_id, "session mutex released");
        Ok(())
    }

    /// One conditional acquisition attempt.
    ///
    /// Two workers racing the UPSERT on the same lease record can make the
    /// store abort one side with a retryable write conflict. That is
    /// contention, not failure: the attempt reports "not acquired" and the
    /// caller's retry loop keeps going.
    async fn try_acquire(&self, session_id: &str) -> PersistenceResult<Option<LeaseGuard>> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let expires_at_ms = now.timestamp_millis() + self.lease_ttl.as_millis() as i64;

        let result = self
            .store
            .db()
            .query(
                "UPSERT type::thing('session_lease', $session_id) \
                 SET holder_token = $lease_token, holder_worker = $worker_id, \
                 acquired_at = $now, expires_at_ms = $expires_at_ms \
                 WHERE holder_token = NONE OR expires_at_ms < $now_ms \
                 RETURN AFTER;",
            )
            .bind(("session_id", session_id.to_string()))
            .bind(("lease_token", token.clone()))
            .bind(("worker_id", self.worker_id.clone()))
            .bind(("now", now))
            .bind(("expires_at_ms", expires_at_ms))
            .bind(("now_ms", now.timestamp_millis()))
            .await
            .map_err(from_surrealdb_error)
            .and_then(|mut response| response.take::<Vec<LeaseRecord>>(0).map_err(from_surrealdb_error));

        let updated = match result {
            Ok(updated) => updated,
            Err(PersistenceError::TransactionConflict { .. }) => {
                trace!(session_id, "lease upsert lost a write conflict");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let held = updated
            .into_iter()
            .next()
            .is_some_and(|lease| lease.holder_token == token);

        if held {
            Ok(Some(LeaseGuard {
                session_id: session_id.to_string(),
                token,
            }))
        } else {
            trace!(session_id, "session lease held elsewhere");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::persistence::StoreConfig;

    async fn setup() -> SessionStore {
        let store = SessionStore::connect(StoreConfig::in_memory()).await.unwrap();
        let _ = store.initialize_schema().await;
        store
    }

    fn mutex(store: &SessionStore, worker: &str) -> SessionMutex {
        SessionMutex::new(
            store.clone(),
            worker,
            Duration::from_millis(10),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn test_acquire_uncontended() {
        let store = setup().await;
        let mutex = mutex(&store, "worker-1");

        let guard = mutex.acquire("session-a", Duration::ZERO).await.unwrap();
        assert!(guard.is_some(), "free session should be acquired instantly");
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let store = setup().await;
        let first = mutex(&store, "worker-1");
        let second = mutex(&store, "worker-2");

        let held = first.acquire("session-b", Duration::ZERO).await.unwrap();
        assert!(held.is_some());

        let denied = second.acquire("session-b", Duration::ZERO).await.unwrap();
        assert!(denied.is_none(), "zero wait under contention must time out");
    }

    #[tokio::test]
    async fn test_release_allows_next_acquire() {
        let store = setup().await;
        let first = mutex(&store, "worker-1");
        let second = mutex(&store, "worker-2");

        let guard = first
            .acquire("session-c", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        first.release(guard).await.unwrap();

        let next = second.acquire("session-c", Duration::ZERO).await.unwrap();
        assert!(next.is_some(), "released session should be acquirable");
    }

    #[tokio::test]
    async fn test_same_worker_cannot_double_acquire() {
        let store = setup().await;
        let mutex = mutex(&store, "worker-1");

        let first = mutex.acquire("session-d", Duration::ZERO).await.unwrap();
        assert!(first.is_some());

        // Same worker id, different task: the token check must deny it.
        let second = mutex.acquire("session-d", Duration::ZERO).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reacquirable() {
        let store = setup().await;
        let crashed = SessionMutex::new(
            store.clone(),
            "worker-crashed",
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        let survivor = mutex(&store, "worker-2");

        let held = crashed.acquire("session-e", Duration::ZERO).await.unwrap();
        assert!(held.is_some());
        // The "crashed" worker never releases.

        tokio::time::sleep(Duration::from_millis(80)).await;

        let taken = survivor.acquire("session-e", Duration::ZERO).await.unwrap();
        assert!(taken.is_some(), "expired lease should be claimable");
    }

    #[tokio::test]
    async fn test_simultaneous_acquires_produce_one_winner_and_no_error() {
        let store = setup().await;
        let first = mutex(&store, "worker-1");
        let second = mutex(&store, "worker-2");

        // Racing UPSERTs on the same lease record may make the store abort
        // one side with a write conflict; that side must report "not
        // acquired", never an error.
        let (a, b) = tokio::join!(
            first.acquire("session-race", Duration::ZERO),
            second.acquire("session-race", Duration::ZERO),
        );

        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(
            usize::from(a.is_some()) + usize::from(b.is_some()),
            1,
            "exactly one side wins the lease"
        );
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let store = setup().await;
        let first = mutex(&store, "worker-1");
        let second = mutex(&store, "worker-2");

        let a = first.acquire("session-f", Duration::ZERO).await.unwrap();
        let b = second.acquire("session-g", Duration::ZERO).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some(), "locking one session must not lock another");
    }

    #[tokio::test]
    async fn test_stale_release_does_not_unlock_new_holder() {
        let store = setup().await;
        let first = SessionMutex::new(
            store.clone(),
            "worker-1",
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        let second = mutex(&store, "worker-2");

        let old_guard = first
            .acquire("session-h", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let new_guard = second.acquire("session-h", Duration::ZERO).await.unwrap();
        assert!(new_guard.is_some());

        // The old holder's release targets its own token and is a no-op now.
        first.release(old_guard).await.unwrap();

        let third = mutex(&store, "worker-3");
        let denied = third.acquire("session-h", Duration::ZERO).await.unwrap();
        assert!(denied.is_none(), "new holder's lease must survive a stale release");
    }
}
