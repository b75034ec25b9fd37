//! Work ledger persistence operations.
//!
//! The ledger is the durable record of queued work per session. Every
//! admitted request becomes a `WorkItemRecord` that moves through the
//! lifecycle `pending -> processing -> completed | failed`. Terminal
//! records are never overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Thing;
use uuid::Uuid;

use super::client::SessionStore;
use super::error::{PersistenceError, PersistenceResult, from_surrealdb_error};

/// Work item status in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Item is admitted and waiting its turn
    Pending,
    /// Item is being executed by exactly one worker
    Processing,
    /// Item completed successfully
    Completed,
    /// Item failed
    Failed,
}

impl Default for WorkStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl WorkStatus {
    /// Check if the status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a work item ended up `failed`.
///
/// Operators use this to separate genuine execution failures from
/// crash-recovery reclaims and admission-side lock timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The execution collaborator returned an error
    Execution,
    /// The execution collaborator exceeded the execution timeout
    ExecutionTimeout,
    /// Reclaimed: processing for longer than the stuck cutoff
    ReclaimedStale,
    /// Reclaimed: the owning worker's heartbeat is missing or stale
    ReclaimedDeadWorker,
    /// The caller never acquired the session mutex within its wait budget
    LockWaitTimeout,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execution => write!(f, "execution"),
            Self::ExecutionTimeout => write!(f, "execution_timeout"),
            Self::ReclaimedStale => write!(f, "reclaimed_stale"),
            Self::ReclaimedDeadWorker => write!(f, "reclaimed_dead_worker"),
            Self::LockWaitTimeout => write!(f, "lock_wait_timeout"),
        }
    }
}

impl FailureKind {
    /// Check if this failure was produced by the reclaim sweeper rather
    /// than by the item's own execution.
    #[must_use]
    pub const fn is_reclaim(&self) -> bool {
        matches!(self, Self::ReclaimedStale | Self::ReclaimedDeadWorker)
    }
}

/// Work item record stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRecord {
    /// SurrealDB record ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Thing>,
    /// Globally unique request identifier, assigned at admission
    pub request_id: String,
    /// Serialization domain this item belongs to
    pub session_id: String,
    /// Opaque unit of work (the normalized request to execute)
    pub payload: Value,
    /// Current lifecycle status
    pub status: WorkStatus,
    /// Admission timestamp
    pub created_at: DateTime<Utc>,
    /// Admission time in epoch millis; the FIFO ordering key
    pub created_at_ms: i64,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// When a worker started executing this item
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    /// Processing start in epoch millis, for the staleness cutoff
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at_ms: Option<i64>,
    /// Worker that transitioned this item to processing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_worker_id: Option<String>,
    /// Terminal result, set only on completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Terminal error message, set only on failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// What kind of failure this was, set only on failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
}

/// Input for creating a work item.
#[derive(Debug, Clone, Serialize)]
struct WorkItemInput {
    request_id: String,
    session_id: String,
    payload: Value,
    status: WorkStatus,
    created_at: DateTime<Utc>,
    created_at_ms: i64,
    updated_at: DateTime<Utc>,
}

impl SessionStore {
    /// Admit a new unit of work for a session.
    ///
    /// Creates a `pending` work item with a fresh request id. The
    /// `created_at_ms` of the stored record defines the item's place in
    /// the session's FIFO order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn enqueue_work_item(
        &self,
        session_id: &str,
        payload: Value,
    ) -> PersistenceResult<WorkItemRecord> {
        let request_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let input = WorkItemInput {
            request_id: request_id.clone(),
            session_id: session_id.to_string(),
            payload,
            status: WorkStatus::Pending,
            created_at: now,
            created_at_ms: now.timestamp_millis(),
            updated_at: now,
        };

        let result: Option<WorkItemRecord> = self
            .db()
            .create(("work_item", &request_id))
            .content(input)
            .await
            .map_err(from_surrealdb_error)?;

        result.ok_or_else(|| PersistenceError::query_failed("failed to enqueue work item"))
    }

    /// Atomically claim the oldest pending item for a session.
    ///
    /// Must be called while holding the session mutex. The transition is
    /// guarded by a conditional update (`WHERE status = 'pending'`) so two
    /// workers can never claim the same item even if the mutex is violated.
    ///
    /// Returns `None` when the session has no pending work.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn dequeue_oldest_pending(
        &self,
        session_id: &str,
        worker_id: &str,
    ) -> PersistenceResult<Option<WorkItemRecord>> {
        let now = Utc::now();
        let session_id_owned = session_id.to_string();
        let worker_id_owned = worker_id.to_string();

        let claimed: Vec<WorkItemRecord> = self
            .db()
            .query(
                "LET $oldest = (SELECT id, created_at_ms FROM work_item \
                 WHERE session_id = $session_id AND status = 'pending' \
                 ORDER BY created_at_ms ASC LIMIT 1); \
                 UPDATE $oldest.id SET status = 'processing', \
                 processing_started_at = $now, \
                 processing_started_at_ms = $now_ms, \
                 owner_worker_id = $worker_id, \
                 updated_at = $now \
                 WHERE status = 'pending' RETURN AFTER;",
            )
            .bind(("session_id", session_id_owned))
            .bind(("worker_id", worker_id_owned))
            .bind(("now", now))
            .bind(("now_ms", now.timestamp_millis()))
            .await
            .map_err(from_surrealdb_error)?
            .take(1)
            .map_err(from_surrealdb_error)?;

        Ok(claimed.into_iter().next())
    }

    /// Transition a `processing` item to `completed` with its result.
    ///
    /// Idempotent: a second call on an already-terminal item is a no-op
    /// that returns the stored record unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist, is still `pending`, or
    /// the database operation fails.
    pub async fn complete_work_item(
        &self,
        request_id: &str,
        result: Value,
    ) -> PersistenceResult<WorkItemRecord> {
        let now = Utc::now();
        let request_id_owned = request_id.to_string();

        let updated: Option<WorkItemRecord> = self
            .db()
            .query(
                "UPDATE type::thing('work_item', $request_id) \
                 SET status = 'completed', result = $result, updated_at = $now \
                 WHERE status = 'processing' RETURN AFTER;",
            )
            .bind(("request_id", request_id_owned))
            .bind(("result", result))
            .bind(("now", now))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        match updated {
            Some(record) => Ok(record),
            None => self.terminal_transition_noop(request_id).await,
        }
    }

    /// Transition a `processing` item to `failed` with an error message.
    ///
    /// Idempotent the same way as [`SessionStore::complete_work_item`].
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist, is still `pending`, or
    /// the database operation fails.
    pub async fn fail_work_item(
        &self,
        request_id: &str,
        error: &str,
        failure_kind: FailureKind,
    ) -> PersistenceResult<WorkItemRecord> {
        let now = Utc::now();
        let request_id_owned = request_id.to_string();
        let error_owned = error.to_string();

        let updated: Option<WorkItemRecord> = self
            .db()
            .query(
                "UPDATE type::thing('work_item', $request_id) \
                 SET status = 'failed', error = $error, \
                 failure_kind = $failure_kind, updated_at = $now \
                 WHERE status = 'processing' RETURN AFTER;",
            )
            .bind(("request_id", request_id_owned))
            .bind(("error", error_owned))
            .bind(("failure_kind", failure_kind))
            .bind(("now", now))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        match updated {
            Some(record) => Ok(record),
            None => self.terminal_transition_noop(request_id).await,
        }
    }

    /// Fail an item that never started executing.
    ///
    /// Used when a caller's mutex wait times out: the item goes straight
    /// from `pending` to `failed` with a lock-wait-timeout kind, and no
    /// execution ever occurs.
    ///
    /// # Errors
    ///
    /// Returns an error if the item does not exist, is already
    /// `processing`, or the database operation fails.
    pub async fn fail_unstarted_work_item(
        &self,
        request_id: &str,
        error: &str,
    ) -> PersistenceResult<WorkItemRecord> {
        let now = Utc::now();
        let request_id_owned = request_id.to_string();
        let error_owned = error.to_string();

        let updated: Option<WorkItemRecord> = self
            .db()
            .query(
                "UPDATE type::thing('work_item', $request_id) \
                 SET status = 'failed', error = $error, \
                 failure_kind = 'lock_wait_timeout', updated_at = $now \
                 WHERE status = 'pending' RETURN AFTER;",
            )
            .bind(("request_id", request_id_owned))
            .bind(("error", error_owned))
            .bind(("now", now))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        match updated {
            Some(record) => Ok(record),
            None => self.terminal_transition_noop(request_id).await,
        }
    }

    /// Get a work item by its request id.
    ///
    /// # Errors
    ///
    /// Returns an error if the item is not found or the query fails.
    pub async fn get_work_item(&self, request_id: &str) -> PersistenceResult<WorkItemRecord> {
        let result: Option<WorkItemRecord> = self
            .db()
            .select(("work_item", request_id))
            .await
            .map_err(from_surrealdb_error)?;

        result.ok_or_else(|| PersistenceError::not_found("work_item", request_id))
    }

    /// Get all work items for a session in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_session_items(
        &self,
        session_id: &str,
    ) -> PersistenceResult<Vec<WorkItemRecord>> {
        let session_id_owned = session_id.to_string();
        let items: Vec<WorkItemRecord> = self
            .db()
            .query(
                "SELECT * FROM work_item WHERE session_id = $session_id \
                 ORDER BY created_at_ms ASC",
            )
            .bind(("session_id", session_id_owned))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        Ok(items)
    }

    /// Get the items currently marked `processing` for a session.
    ///
    /// Feeds the reclaim sweeper. Under the mutual-exclusion invariant
    /// this returns at most one item, but the sweeper handles any number.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_processing_items(
        &self,
        session_id: &str,
    ) -> PersistenceResult<Vec<WorkItemRecord>> {
        let session_id_owned = session_id.to_string();
        let items: Vec<WorkItemRecord> = self
            .db()
            .query(
                "SELECT * FROM work_item WHERE session_id = $session_id \
                 AND status = 'processing' ORDER BY created_at_ms ASC",
            )
            .bind(("session_id", session_id_owned))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        Ok(items)
    }

    /// Find which of the given requests have reached a terminal state.
    ///
    /// Feeds the completion waiter poller.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_terminal_items(
        &self,
        request_ids: Vec<String>,
    ) -> PersistenceResult<Vec<WorkItemRecord>> {
        if request_ids.is_empty() {
            return Ok(Vec::new());
        }

        let items: Vec<WorkItemRecord> = self
            .db()
            .query(
                "SELECT * FROM work_item WHERE request_id IN $request_ids \
                 AND status IN ['completed', 'failed']",
            )
            .bind(("request_ids", request_ids))
            .await
            .map_err(from_surrealdb_error)?
            .take(0)
            .map_err(from_surrealdb_error)?;

        Ok(items)
    }

    /// Resolve a guarded transition that matched no rows.
    ///
    /// Terminal items make the transition a no-op; anything else is an
    /// invalid transition or a missing record.
    async fn terminal_transition_noop(
        &self,
        request_id: &str,
    ) -> PersistenceResult<WorkItemRecord> {
        let existing = self.get_work_item(request_id).await?;
        if existing.status.is_terminal() {
            Ok(existing)
        } else {
            Err(PersistenceError::invalid_transition(format!(
                "work item '{}' is {} and cannot reach a terminal state from here",
                request_id, existing.status
            )))
        }
    }
}
