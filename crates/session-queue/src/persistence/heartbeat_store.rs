//! Worker heartbeat persistence operations.
//!
//! Each worker process upserts its own row; every other worker only reads.
//! Rows are never deleted by their owner - staleness, not absence, is what
//! signals a dead worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use super::client::SessionStore;
use super::error::{PersistenceError, PersistenceResult, from_surrealdb_error};

/// Heartbeat record stored in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHeartbeatRecord {
    /// SurrealDB record ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Thing>,
    /// Stable identifier for a worker process
    pub worker_id: String,
    /// When this worker was last seen alive
    pub last_seen_at: DateTime<Utc>,
    /// Last-seen time in epoch millis, for the staleness check
    pub last_seen_at_ms: i64,
}

impl WorkerHeartbeatRecord {
    /// Check whether this heartbeat is older than the given grace period.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, grace_period: std::time::Duration) -> bool {
        let cutoff_ms = now.timestamp_millis() - grace_period.as_millis() as i64;
        self.last_seen_at_ms < cutoff_ms
    }
}

/// Input for upserting a heartbeat.
#[derive(Debug, Clone, Serialize)]
struct HeartbeatInput {
    worker_id: String,
    last_seen_at: DateTime<Utc>,
    last_seen_at_ms: i64,
}

impl SessionStore {
    /// Record that a worker was alive at the given instant.
    ///
    /// Upserts the worker's heartbeat row; the first call creates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn record_heartbeat(
        &self,
        worker_id: &str,
        last_seen_at: DateTime<Utc>,
    ) -> PersistenceResult<WorkerHeartbeatRecord> {
        let input = HeartbeatInput {
            worker_id: worker_id.to_string(),
            last_seen_at,
            last_seen_at_ms: last_seen_at.timestamp_millis(),
        };

        let result: Option<WorkerHeartbeatRecord> = self
            .db()
            .upsert(("worker_heartbeat", worker_id))
            .content(input)
            .await
            .map_err(from_surrealdb_error)?;

        result.ok_or_else(|| PersistenceError::query_failed("failed to record heartbeat"))
    }

    /// Get a worker's heartbeat row, if it has ever emitted one.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_worker_heartbeat(
        &self,
        worker_id: &str,
    ) -> PersistenceResult<Option<WorkerHeartbeatRecord>> {
        let result: Option<WorkerHeartbeatRecord> = self
            .db()
            .select(("worker_heartbeat", worker_id))
            .await
            .map_err(from_surrealdb_error)?;

        Ok(result)
    }
}
