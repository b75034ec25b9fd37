//! # Session Queue
//!
//! Per-session turn serialization over a shared durable store.
//!
//! For any conversation session, at most one unit of work executes at a
//! time, units execute in strict arrival order, pending work survives
//! process crashes, and a crashed or hung worker never permanently stalls
//! a session. Any number of stateless worker replicas coordinate only
//! through the shared store - no lock server, no sticky routing, no
//! in-memory state that has to survive a restart.
//!
//! # Components
//!
//! - [`persistence`]: the work ledger and liveness registry in SurrealDB
//! - [`mutex`]: keyed exclusive lock per session, backed by a lease record
//! - [`heartbeat`]: background "last seen alive" loop per worker
//! - [`reclaim`]: sweeps stuck `processing` items into `failed`
//! - [`orchestrator`]: the per-request turn procedure
//! - [`waiter`]: resolves callers whose request was drained by a peer
//! - [`executor`]: the seam to the external inference step

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod executor;
pub mod heartbeat;
pub mod mutex;
pub mod orchestrator;
pub mod persistence;
pub mod reclaim;
pub mod waiter;

pub use config::TurnConfig;
pub use error::{TurnError, TurnResult};
pub use executor::{ExecutionError, TurnExecutor};
pub use orchestrator::{BackgroundTasks, TurnOrchestrator};
pub use persistence::{
    FailureKind, PersistenceError, PersistenceResult, SessionStore, StoreConfig, WorkItemRecord,
    WorkStatus, WorkerHeartbeatRecord,
};
