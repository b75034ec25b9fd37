//! Reclaim sweeper - turns crashed workers into forward progress.
//!
//! Runs at the start of every turn, after the session mutex is held and
//! before dequeuing. A `processing` item whose owner died would otherwise
//! block its session forever: the mutex only protects the next turn, not
//! the abandoned item's status.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::TurnConfig;
use crate::persistence::{FailureKind, PersistenceResult, SessionStore, WorkItemRecord};

/// Why an item was judged stuck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StuckReason {
    /// Processing started longer ago than the stuck cutoff
    Stale,
    /// The owner's heartbeat is missing or older than the grace period
    DeadWorker,
}

/// Sweeps a session's stuck `processing` items into `failed`.
#[derive(Debug, Clone)]
pub struct ReclaimSweeper {
    store: SessionStore,
    stuck_cutoff: Duration,
    heartbeat_grace_period: Duration,
}

impl ReclaimSweeper {
    /// Create a sweeper from the turn configuration.
    #[must_use]
    pub fn new(store: SessionStore, config: &TurnConfig) -> Self {
        Self {
            store,
            stuck_cutoff: config.stuck_cutoff(),
            heartbeat_grace_period: config.heartbeat_grace_period,
        }
    }

    /// Fail every stuck `processing` item for the session.
    ///
    /// Must be called while holding the session's mutex. Returns the items
    /// that were reclaimed. Transitions are guarded, so an item that
    /// reaches a terminal state concurrently is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a store operation fails.
    pub async fn sweep(&self, session_id: &str) -> PersistenceResult<Vec<WorkItemRecord>> {
        let processing = self.store.get_processing_items(session_id).await?;
        if processing.is_empty() {
            return Ok(Vec::new());
        }

        let mut reclaimed = Vec::new();
        for item in processing {
            let Some(reason) = self.judge(&item).await? else {
                continue;
            };

            let (kind, error) = match reason {
                StuckReason::Stale => (
                    FailureKind::ReclaimedStale,
                    format!(
                        "reclaimed: processing since {} exceeded the stuck cutoff of {}ms",
                        item.processing_started_at
                            .map_or_else(|| "unknown".to_string(), |t| t.to_rfc3339()),
                        self.stuck_cutoff.as_millis()
                    ),
                ),
                StuckReason::DeadWorker => (
                    FailureKind::ReclaimedDeadWorker,
                    format!(
                        "reclaimed: owner worker '{}' heartbeat missing or stale",
                        item.owner_worker_id.as_deref().unwrap_or("unknown")
                    ),
                ),
            };

            warn!(
                session_id,
                request_id = %item.request_id,
                kind = %kind,
                "reclaiming stuck work item"
            );
            let failed = self.store.fail_work_item(&item.request_id, &error, kind).await?;
            reclaimed.push(failed);
        }

        if !reclaimed.is_empty() {
            info!(session_id, count = reclaimed.len(), "reclaim sweep failed stuck items");
        }
        Ok(reclaimed)
    }

    /// Decide whether one `processing` item is stuck, and why.
    async fn judge(&self, item: &WorkItemRecord) -> PersistenceResult<Option<StuckReason>> {
        let now = Utc::now();

        // Trigger (a): elapsed-time cutoff.
        if let Some(started_ms) = item.processing_started_at_ms {
            let cutoff_ms = now.timestamp_millis() - self.stuck_cutoff.as_millis() as i64;
            if started_ms < cutoff_ms {
                return Ok(Some(StuckReason::Stale));
            }
        }

        // Trigger (b): owner liveness. An item with no recorded owner has
        // no one to vouch for it.
        let Some(owner) = item.owner_worker_id.as_deref() else {
            return Ok(Some(StuckReason::DeadWorker));
        };

        match self.store.get_worker_heartbeat(owner).await? {
            None => Ok(Some(StuckReason::DeadWorker)),
            Some(hb) if hb.is_stale(now, self.heartbeat_grace_period) => {
                Ok(Some(StuckReason::DeadWorker))
            }
            Some(_) => Ok(None),
        }
    }
}
