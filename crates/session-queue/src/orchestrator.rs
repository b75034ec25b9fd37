//! Turn orchestrator - the top-level procedure a worker runs per request.
//!
//! One call to [`TurnOrchestrator::handle_request`] is one turn: enqueue,
//! acquire the session mutex, reclaim stuck items, drain the single oldest
//! pending item, release, and resolve the original caller. The drained
//! item may belong to a different concurrent caller than the one running
//! the turn; that caller's in-process wait is resolved out-of-band once
//! its own item reaches a terminal state.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TurnConfig;
use crate::error::{TurnError, TurnResult};
use crate::executor::TurnExecutor;
use crate::heartbeat::{HeartbeatEmitter, HeartbeatHandle};
use crate::mutex::SessionMutex;
use crate::persistence::{FailureKind, SessionStore, WorkItemRecord};
use crate::reclaim::ReclaimSweeper;
use crate::waiter::{CompletionPoller, CompletionWaiters, PollerHandle, TurnOutcome, outcome_from_record};

/// Handles to this worker's background loops.
#[derive(Debug)]
pub struct BackgroundTasks {
    heartbeat: HeartbeatHandle,
    poller: PollerHandle,
}

impl BackgroundTasks {
    /// Stop both loops and wait for them to exit.
    pub async fn shutdown(self) {
        self.heartbeat.shutdown().await;
        self.poller.shutdown().await;
    }
}

/// Serializes request execution per session across any number of workers.
///
/// All instances coordinate only through the shared store; none of them
/// keeps authoritative state in memory beyond the scope of one turn.
pub struct TurnOrchestrator<E> {
    store: SessionStore,
    config: TurnConfig,
    worker_id: String,
    executor: Arc<E>,
    waiters: CompletionWaiters,
}

// Manual impl: cloning shares the store, executor, and waiter registry
// without requiring `E: Clone`.
impl<E> Clone for TurnOrchestrator<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
            worker_id: self.worker_id.clone(),
            executor: Arc::clone(&self.executor),
            waiters: self.waiters.clone(),
        }
    }
}

impl<E: TurnExecutor> TurnOrchestrator<E> {
    /// Create an orchestrator for one worker process.
    ///
    /// The worker id defaults to a fresh UUID; override it with
    /// [`TurnOrchestrator::with_worker_id`] when the process has a stable
    /// identity of its own.
    #[must_use]
    pub fn new(store: SessionStore, executor: Arc<E>, config: TurnConfig) -> Self {
        Self {
            store,
            config,
            worker_id: Uuid::new_v4().to_string(),
            executor,
            waiters: CompletionWaiters::new(),
        }
    }

    /// Set a stable worker id.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    /// This worker's id.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The shared store handle.
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Spawn the heartbeat emitter and completion poller for this worker.
    ///
    /// Call once per process; the handles stop the loops on shutdown.
    #[must_use]
    pub fn spawn_background(&self) -> BackgroundTasks {
        let heartbeat = HeartbeatEmitter::new(
            self.store.clone(),
            self.worker_id.clone(),
            self.config.heartbeat_interval,
        )
        .spawn();

        let poller = CompletionPoller::new(
            self.store.clone(),
            self.waiters.clone(),
            self.config.completion_poll_interval,
        )
        .spawn();

        BackgroundTasks { heartbeat, poller }
    }

    /// Run one turn for an incoming request and return its result.
    ///
    /// Blocks the calling task (never the process) until the request
    /// reaches a terminal state or a timeout fires. A timeout of the
    /// caller does not cancel the work: the enqueued item stays in the
    /// ledger and is drained by a future turn.
    ///
    /// # Errors
    ///
    /// Returns one of the [`TurnError`] variants; see the error taxonomy
    /// on that type.
    pub async fn handle_request(&self, session_id: &str, payload: Value) -> TurnResult<Value> {
        // (1) Admission. Nothing is persisted if this fails.
        let item = self
            .store
            .enqueue_work_item(session_id, payload)
            .await
            .map_err(TurnError::admission)?;
        let request_id = item.request_id.clone();
        info!(session_id, request_id = %request_id, "request admitted");

        // (2) Register the waiter before anyone could drain the item.
        let rx = self.waiters.register(&request_id).await;

        // (3) Bounded wait for the session mutex.
        let wait_started = tokio::time::Instant::now();
        let mutex = self.session_mutex();
        let guard = match mutex.acquire(session_id, self.config.mutex_wait_timeout).await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                let waited_ms = wait_started.elapsed().as_millis() as u64;
                self.waiters.deregister(&request_id).await;
                let err = TurnError::lock_wait_timeout(session_id, waited_ms);
                if let Err(e) = self
                    .store
                    .fail_unstarted_work_item(&request_id, &err.to_string())
                    .await
                {
                    // A peer may have drained the item in the meantime;
                    // the caller still gets the timeout it observed.
                    warn!(request_id = %request_id, error = %e, "could not fail unstarted item");
                }
                return Err(err);
            }
            Err(e) => {
                self.waiters.deregister(&request_id).await;
                return Err(e.into());
            }
        };

        // (4)-(6) Reclaim, drain, execute. The mutex is released on every
        // path out, including store and executor errors.
        let turn = self.run_locked_turn(session_id).await;
        if let Err(e) = mutex.release(guard).await {
            // The lease TTL still bounds how long the session stays locked.
            warn!(session_id, error = %e, "failed to release session mutex");
        }
        let executed = match turn {
            Ok(executed) => executed,
            Err(e) => {
                self.waiters.deregister(&request_id).await;
                return Err(e);
            }
        };

        // (7) Resolve the original caller.
        if let Some((record, outcome)) = executed {
            if record.request_id == request_id {
                self.waiters.deregister(&request_id).await;
                return outcome;
            }
            // We drained a concurrent caller's item; wake them if they
            // live in this process. Peers in other processes are resolved
            // by their own pollers.
            self.waiters.resolve(&record.request_id, outcome).await;
        }

        debug!(request_id = %request_id, "waiting for peer to complete this request");
        match tokio::time::timeout(self.config.completion_wait_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_closed)) => Err(TurnError::execution_failed(
                "completion waiter closed before resolving",
            )),
            Err(_elapsed) => {
                self.waiters.deregister(&request_id).await;
                Err(TurnError::completion_wait_timeout(
                    request_id,
                    self.config.completion_wait_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Steps (4)-(6): everything that happens while holding the mutex.
    ///
    /// Returns the drained item and its outcome, or `None` when the
    /// session had no pending work left.
    async fn run_locked_turn(
        &self,
        session_id: &str,
    ) -> TurnResult<Option<(WorkItemRecord, TurnOutcome)>> {
        // (4) Reclaim stuck items so a crashed worker cannot stall the
        // session. Wake any local waiters for what got reclaimed.
        let sweeper = ReclaimSweeper::new(self.store.clone(), &self.config);
        let reclaimed = sweeper.sweep(session_id).await?;
        for item in &reclaimed {
            if let Some(outcome) = outcome_from_record(item) {
                self.waiters.resolve(&item.request_id, outcome).await;
            }
        }

        // (5) Drain the single oldest pending item.
        let Some(claimed) = self
            .store
            .dequeue_oldest_pending(session_id, &self.worker_id)
            .await?
        else {
            return Ok(None);
        };
        debug!(
            session_id,
            request_id = %claimed.request_id,
            worker_id = %self.worker_id,
            "executing work item"
        );

        // (6) Execute exactly one item, bounded by the execution timeout.
        let execution = tokio::time::timeout(
            self.config.execution_timeout,
            self.executor.execute(session_id, &claimed.payload),
        )
        .await;

        let record = match execution {
            Ok(Ok(result)) => {
                self.store
                    .complete_work_item(&claimed.request_id, result)
                    .await?
            }
            Ok(Err(e)) => {
                self.store
                    .fail_work_item(&claimed.request_id, &e.to_string(), FailureKind::Execution)
                    .await?
            }
            Err(_elapsed) => {
                let message = format!(
                    "execution timed out after {}ms",
                    self.config.execution_timeout.as_millis()
                );
                self.store
                    .fail_work_item(&claimed.request_id, &message, FailureKind::ExecutionTimeout)
                    .await?
            }
        };

        let outcome = outcome_from_record(&record).unwrap_or_else(|| {
            Err(TurnError::execution_failed(
                "work item left in a non-terminal state",
            ))
        });
        Ok(Some((record, outcome)))
    }

    /// Build this worker's mutex handle.
    fn session_mutex(&self) -> SessionMutex {
        SessionMutex::new(
            self.store.clone(),
            self.worker_id.clone(),
            self.config.mutex_retry_interval,
            self.config.lease_ttl,
        )
    }
}
