//! Persistence layer for the session queue.
//!
//! This module provides SurrealDB-backed persistence for:
//! - Work items and their lifecycle state (the work ledger)
//! - Worker heartbeats (the liveness registry)
//! - Session leases (backing the session mutex)
//!
//! # Architecture
//!
//! The persistence layer uses SurrealDB as the backing store with:
//! - `SessionStore`: Connection management and health checks
//! - `WorkItemRecord`: One admitted unit of work and its lifecycle state
//! - `WorkerHeartbeatRecord`: "Last seen alive" per worker process
//!
//! The store is the only authoritative state in the system; workers never
//! cache records beyond the scope of one turn.
//!
//! # Example
//!
//! ```ignore
//! use session_queue::persistence::{SessionStore, StoreConfig};
//!
//! let config = StoreConfig::in_memory();
//! let store = SessionStore::connect(config).await?;
//! store.initialize_schema().await?;
//!
//! let item = store.enqueue_work_item("session-1", payload).await?;
//! ```

pub mod client;
pub mod error;
pub mod heartbeat_store;
pub mod work_ledger;

// Re-export main types
pub use client::{Credentials, SessionStore, StoreConfig};
pub use error::{PersistenceError, PersistenceResult};
pub use heartbeat_store::WorkerHeartbeatRecord;
pub use work_ledger::{FailureKind, WorkItemRecord, WorkStatus};
