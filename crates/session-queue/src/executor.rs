//! The execution collaborator seam.
//!
//! The session queue does not know how to produce a response; it hands the
//! dequeued payload to a [`TurnExecutor`] and records whatever comes back.
//! Inference, channel normalization, and delivery all live behind this
//! trait, outside the crate.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error returned by an execution collaborator.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct ExecutionError {
    /// Human-readable cause, recorded on the failed work item.
    pub reason: String,
}

impl ExecutionError {
    /// Create a new execution error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Executes one dequeued unit of work.
///
/// Implementations must be safe to call concurrently for different
/// sessions; the orchestrator guarantees at most one in-flight call per
/// session. The orchestrator bounds each call with its configured
/// execution timeout, so implementations need not enforce one themselves.
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    /// Execute the payload and return the response to persist.
    async fn execute(&self, session_id: &str, payload: &Value) -> Result<Value, ExecutionError>;
}
