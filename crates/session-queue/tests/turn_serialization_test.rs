//! End-to-end turn serialization across multiple worker instances.
//!
//! Two orchestrators sharing one store stand in for two worker processes.
//! These tests exercise FIFO admission order, mutual exclusion, and the
//! cross-replica completion path with real components - no mocks.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use session_queue::executor::ExecutionError;
use session_queue::persistence::{SessionStore, StoreConfig, WorkStatus};
use session_queue::{TurnConfig, TurnError, TurnExecutor, TurnOrchestrator};

/// Executor that records execution order and tracks in-flight concurrency.
struct TrackingExecutor {
    active: AtomicUsize,
    max_active: AtomicUsize,
    order: Mutex<Vec<i64>>,
    delay: Duration,
}

impl TrackingExecutor {
    fn new(delay: Duration) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
            delay,
        }
    }

    fn execution_order(&self) -> Vec<i64> {
        self.order.lock().unwrap().clone()
    }

    fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TurnExecutor for TrackingExecutor {
    async fn execute(&self, _session_id: &str, payload: &Value) -> Result<Value, ExecutionError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        if let Some(n) = payload.get("n").and_then(Value::as_i64) {
            self.order.lock().unwrap().push(n);
        }
        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({"echo": payload}))
    }
}

async fn shared_store() -> SessionStore {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = SessionStore::connect(StoreConfig::in_memory()).await.unwrap();
    store.initialize_schema().await.unwrap();
    store
}

#[tokio::test]
async fn test_two_concurrent_callers_get_their_own_results_in_order() {
    let store = shared_store().await;
    let executor = Arc::new(TrackingExecutor::new(Duration::from_millis(30)));

    let worker_a = TurnOrchestrator::new(store.clone(), executor.clone(), TurnConfig::for_testing())
        .with_worker_id("worker-a");
    let worker_b = TurnOrchestrator::new(store.clone(), executor.clone(), TurnConfig::for_testing())
        .with_worker_id("worker-b");
    let bg_a = worker_a.spawn_background();
    let bg_b = worker_b.spawn_background();

    let a = worker_a.clone();
    let task_a = tokio::spawn(async move { a.handle_request("session-fifo", json!({"n": 1})).await });
    // Admission order defines FIFO order; give the first caller a head start.
    tokio::time::sleep(Duration::from_millis(25)).await;
    let b = worker_b.clone();
    let task_b = tokio::spawn(async move { b.handle_request("session-fifo", json!({"n": 2})).await });

    let result_a = task_a.await.unwrap();
    let result_b = task_b.await.unwrap();

    assert_eq!(result_a.unwrap(), json!({"echo": {"n": 1}}), "caller A gets its own result");
    assert_eq!(result_b.unwrap(), json!({"echo": {"n": 2}}), "caller B gets its own result");

    assert_eq!(executor.execution_order(), vec![1, 2], "older item executes first");

    let items = store.get_session_items("session-fifo").await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.status == WorkStatus::Completed));

    bg_a.shutdown().await;
    bg_b.shutdown().await;
}

#[tokio::test]
async fn test_mutual_exclusion_under_concurrent_admission() {
    let store = shared_store().await;
    let executor = Arc::new(TrackingExecutor::new(Duration::from_millis(25)));

    let workers: Vec<_> = (0..3)
        .map(|i| {
            TurnOrchestrator::new(store.clone(), executor.clone(), TurnConfig::for_testing())
                .with_worker_id(format!("worker-{i}"))
        })
        .collect();
    let backgrounds: Vec<_> = workers.iter().map(|w| w.spawn_background()).collect();

    let mut tasks = Vec::new();
    for (i, worker) in workers.iter().enumerate() {
        let w = worker.clone();
        tasks.push(tokio::spawn(async move {
            w.handle_request("session-mutex", json!({"n": i})).await
        }));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for task in tasks {
        let result = task.await.unwrap();
        assert!(result.is_ok(), "every caller resolves: {:?}", result.err());
    }

    assert_eq!(
        executor.max_concurrency(),
        1,
        "no two items of one session may execute simultaneously"
    );

    for bg in backgrounds {
        bg.shutdown().await;
    }
}

#[tokio::test]
async fn test_requests_for_different_sessions_run_independently() {
    let store = shared_store().await;
    let executor = Arc::new(TrackingExecutor::new(Duration::from_millis(10)));

    let worker = TurnOrchestrator::new(store.clone(), executor.clone(), TurnConfig::for_testing())
        .with_worker_id("worker-multi");
    let bg = worker.spawn_background();

    let w1 = worker.clone();
    let t1 = tokio::spawn(async move { w1.handle_request("session-x", json!({"n": 1})).await });
    let w2 = worker.clone();
    let t2 = tokio::spawn(async move { w2.handle_request("session-y", json!({"n": 2})).await });

    assert!(t1.await.unwrap().is_ok());
    assert!(t2.await.unwrap().is_ok());

    bg.shutdown().await;
}

#[tokio::test]
async fn test_peer_drain_resolves_the_original_caller() {
    let store = shared_store().await;
    let executor = Arc::new(TrackingExecutor::new(Duration::from_millis(10)));

    let config = TurnConfig::for_testing().with_completion_wait_timeout(Duration::from_millis(400));
    let worker_a = TurnOrchestrator::new(store.clone(), executor.clone(), config.clone())
        .with_worker_id("worker-a");
    let worker_b = TurnOrchestrator::new(store.clone(), executor.clone(), config.clone())
        .with_worker_id("worker-b");
    let bg_a = worker_a.spawn_background();
    let bg_b = worker_b.spawn_background();

    // An orphaned pending item from a third process that crashed before
    // running its turn. Worker A's turn will drain this instead of its own.
    let orphan = store
        .enqueue_work_item("session-peer", json!({"n": 0}))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let a = worker_a.clone();
    let task_a = tokio::spawn(async move { a.handle_request("session-peer", json!({"n": 1})).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Worker B's turn drains A's item (the oldest pending) and completes
    // it; A's blocked call must resolve with A's actual result.
    let b = worker_b.clone();
    let task_b = tokio::spawn(async move { b.handle_request("session-peer", json!({"n": 2})).await });

    let result_a = task_a.await.unwrap();
    assert_eq!(
        result_a.unwrap(),
        json!({"echo": {"n": 1}}),
        "peer-drained request resolves with its own result"
    );

    let orphan_after = store.get_work_item(&orphan.request_id).await.unwrap();
    assert_eq!(orphan_after.status, WorkStatus::Completed, "orphan was drained by A");

    // Nobody is left to drain B's item, so B's wait times out - and the
    // timeout is explicitly retryable, since the work itself survives.
    let result_b = task_b.await.unwrap();
    let err = result_b.unwrap_err();
    assert!(matches!(err, TurnError::CompletionWaitTimeout { .. }));
    assert!(err.is_retryable());

    // The caller's timeout did not cancel the work: a later turn drains it.
    let drain = worker_a.handle_request("session-peer", json!({"n": 3})).await;
    assert!(drain.is_err(), "this turn drained B's item, not its own");

    let items = store.get_session_items("session-peer").await.unwrap();
    let b_item = items.iter().find(|i| i.payload == json!({"n": 2})).unwrap();
    assert_eq!(b_item.status, WorkStatus::Completed, "B's work still completed");

    bg_a.shutdown().await;
    bg_b.shutdown().await;
}

#[tokio::test]
async fn test_zero_mutex_wait_under_contention_fails_immediately() {
    let store = shared_store().await;
    let executor = Arc::new(TrackingExecutor::new(Duration::from_millis(200)));

    let patient = TurnOrchestrator::new(store.clone(), executor.clone(), TurnConfig::for_testing())
        .with_worker_id("worker-patient");
    let impatient_config = TurnConfig::for_testing().with_mutex_wait_timeout(Duration::ZERO);
    let impatient = TurnOrchestrator::new(store.clone(), executor.clone(), impatient_config)
        .with_worker_id("worker-impatient");
    let bg_p = patient.spawn_background();
    let bg_i = impatient.spawn_background();

    let p = patient.clone();
    let slow_turn =
        tokio::spawn(async move { p.handle_request("session-zero", json!({"n": 1})).await });
    // Let the patient worker take the mutex and start executing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let contending = impatient.handle_request("session-zero", json!({"n": 2})).await;
    let err = contending.unwrap_err();
    assert!(matches!(err, TurnError::LockWaitTimeout { .. }));

    let items = store.get_session_items("session-zero").await.unwrap();
    let failed = items.iter().find(|i| i.payload == json!({"n": 2})).unwrap();
    assert_eq!(failed.status, WorkStatus::Failed);
    assert!(failed.owner_worker_id.is_none(), "contender never dequeued anything");

    assert!(slow_turn.await.unwrap().is_ok(), "the holder's turn is unaffected");

    bg_p.shutdown().await;
    bg_i.shutdown().await;
}
