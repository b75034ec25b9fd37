//! Completion waiter - cross-replica resolution of blocked callers.
//!
//! A caller's own request may be drained and executed by a different
//! worker than the one it is blocked in. Each process therefore keeps a
//! registry of `request_id -> oneshot sender`, and a low-frequency poller
//! watches the work ledger for registered requests reaching a terminal
//! state. Terminal items with no registered sender belong to another
//! process and are ignored here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TurnError;
use crate::persistence::{FailureKind, SessionStore, WorkItemRecord, WorkStatus};

/// What a blocked caller ultimately receives.
pub type TurnOutcome = Result<Value, TurnError>;

/// Map a terminal ledger record to the outcome its caller should see.
///
/// Returns `None` for non-terminal records.
#[must_use]
pub fn outcome_from_record(record: &WorkItemRecord) -> Option<TurnOutcome> {
    match record.status {
        WorkStatus::Completed => Some(Ok(record.result.clone().unwrap_or(Value::Null))),
        WorkStatus::Failed => {
            let reason = record
                .error
                .clone()
                .unwrap_or_else(|| "work item failed without a recorded error".to_string());
            let err = match record.failure_kind {
                Some(FailureKind::ReclaimedStale | FailureKind::ReclaimedDeadWorker) => {
                    TurnError::reclaimed(reason)
                }
                Some(FailureKind::LockWaitTimeout) => {
                    TurnError::lock_wait_denied(record.session_id.clone(), reason)
                }
                Some(FailureKind::Execution | FailureKind::ExecutionTimeout) | None => {
                    TurnError::execution_failed(reason)
                }
            };
            Some(Err(err))
        }
        WorkStatus::Pending | WorkStatus::Processing => None,
    }
}

/// Per-process registry of callers blocked on their own request.
#[derive(Debug, Clone, Default)]
pub struct CompletionWaiters {
    inner: Arc<Mutex<HashMap<String, oneshot::Sender<TurnOutcome>>>>,
}

impl CompletionWaiters {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a request and get the receiving end.
    ///
    /// Registering the same request twice replaces the earlier sender,
    /// which closes the earlier receiver.
    pub async fn register(&self, request_id: &str) -> oneshot::Receiver<TurnOutcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(request_id.to_string(), tx);
        rx
    }

    /// Drop a registration without resolving it.
    pub async fn deregister(&self, request_id: &str) {
        self.inner.lock().await.remove(request_id);
    }

    /// Resolve a registered waiter with its outcome.
    ///
    /// Returns `false` if no waiter was registered for the request, which
    /// is the normal case for requests admitted by another process.
    pub async fn resolve(&self, request_id: &str, outcome: TurnOutcome) -> bool {
        let sender = self.inner.lock().await.remove(request_id);
        match sender {
            Some(tx) => {
                // A dropped receiver means the caller gave up; fine either way.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// The request ids currently being waited on in this process.
    pub async fn pending_ids(&self) -> Vec<String> {
        self.inner.lock().await.keys().cloned().collect()
    }
}

/// Polls the ledger and resolves registered waiters.
#[derive(Debug, Clone)]
pub struct CompletionPoller {
    store: SessionStore,
    waiters: CompletionWaiters,
    interval: Duration,
}

/// Handle to a running completion poller.
#[derive(Debug)]
pub struct PollerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Stop the poller and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl CompletionPoller {
    /// Create a poller over this process's waiter registry.
    #[must_use]
    pub fn new(store: SessionStore, waiters: CompletionWaiters, interval: Duration) -> Self {
        Self {
            store,
            waiters,
            interval,
        }
    }

    /// Spawn the background polling loop.
    #[must_use]
    pub fn spawn(self) -> PollerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.poll_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("completion poller stopping");
                        break;
                    }
                }
            }
        });

        PollerHandle { shutdown_tx, task }
    }

    /// One polling pass over the registered requests.
    async fn poll_once(&self) {
        let ids = self.waiters.pending_ids().await;
        if ids.is_empty() {
            return;
        }

        match self.store.find_terminal_items(ids).await {
            Ok(items) => {
                for item in items {
                    if let Some(outcome) = outcome_from_record(&item) {
                        let resolved = self.waiters.resolve(&item.request_id, outcome).await;
                        if resolved {
                            debug!(request_id = %item.request_id, "resolved waiter from ledger");
                        }
                    }
                }
            }
            Err(e) => {
                // Transient store trouble; the next tick retries.
                warn!(error = %e, "completion poll failed");
            }
        }
    }
}
