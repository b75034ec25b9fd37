//! Heartbeat emitter - background liveness loop for one worker process.
//!
//! Runs for the process lifetime and upserts this worker's heartbeat row
//! every interval. The loop has no effect on correctness by itself; it
//! only feeds the reclaim sweeper's liveness check, so store errors are
//! logged and retried on the next tick instead of crashing anything.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::persistence::SessionStore;

/// Emits periodic heartbeats for one worker.
#[derive(Debug, Clone)]
pub struct HeartbeatEmitter {
    store: SessionStore,
    worker_id: String,
    interval: Duration,
}

/// Handle to a running heartbeat loop.
#[derive(Debug)]
pub struct HeartbeatHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Stop the heartbeat loop and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

impl HeartbeatEmitter {
    /// Create an emitter for one worker.
    #[must_use]
    pub fn new(store: SessionStore, worker_id: impl Into<String>, interval: Duration) -> Self {
        Self {
            store,
            worker_id: worker_id.into(),
            interval,
        }
    }

    /// Spawn the background loop.
    ///
    /// The first tick fires immediately, so a fresh worker is visible in
    /// the liveness registry before its first turn.
    #[must_use]
    pub fn spawn(self) -> HeartbeatHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.store.record_heartbeat(&self.worker_id, Utc::now()).await {
                            Ok(_) => {
                                debug!(worker_id = %self.worker_id, "heartbeat recorded");
                            }
                            Err(e) => {
                                // Transient store trouble; the next tick retries.
                                warn!(worker_id = %self.worker_id, error = %e, "heartbeat failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!(worker_id = %self.worker_id, "heartbeat loop stopping");
                        break;
                    }
                }
            }
        });

        HeartbeatHandle { shutdown_tx, task }
    }
}
