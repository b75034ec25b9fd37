//! Turn-level error types.
//!
//! Every failure a caller can observe maps to one of these variants. All
//! of them are terminal for the specific work item, never for the session:
//! the mutex is always released and the next turn re-runs the reclaim
//! sweep, so the session keeps making progress.

use thiserror::Error;

use crate::persistence::PersistenceError;

/// Errors surfaced to the caller of a turn.
#[derive(Debug, Error)]
pub enum TurnError {
    /// The store was unreachable while admitting the request; nothing was
    /// persisted.
    #[error("admission failed: {source}")]
    Admission {
        #[source]
        source: PersistenceError,
    },

    /// The session mutex was not acquired within the wait budget; no
    /// execution occurred.
    #[error("session mutex not acquired for '{session_id}': {reason}")]
    LockWaitTimeout { session_id: String, reason: String },

    /// The execution collaborator returned an error or exceeded its
    /// timeout.
    #[error("execution failed: {reason}")]
    ExecutionFailed { reason: String },

    /// The item was reclaimed by a sweep rather than failed by its own
    /// execution; usually means the owning worker crashed.
    #[error("request was reclaimed: {reason}")]
    Reclaimed { reason: String },

    /// A peer drained this request but did not report completion within
    /// the caller's wait budget. The underlying work may still complete;
    /// callers should retry or poll the ledger.
    #[error(
        "timed out waiting for completion of request '{request_id}' after {waited_ms}ms; \
         the work may still complete"
    )]
    CompletionWaitTimeout { request_id: String, waited_ms: u64 },

    /// A persistence operation failed mid-turn.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl TurnError {
    /// Create an admission error.
    #[must_use]
    pub const fn admission(source: PersistenceError) -> Self {
        Self::Admission { source }
    }

    /// Create a lock wait timeout error for a wait the caller measured.
    pub fn lock_wait_timeout(session_id: impl Into<String>, waited_ms: u64) -> Self {
        Self::LockWaitTimeout {
            session_id: session_id.into(),
            reason: format!("timed out after {waited_ms}ms"),
        }
    }

    /// Create a lock wait error from a recorded failure reason, for
    /// failures observed in the ledger rather than measured locally.
    pub fn lock_wait_denied(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::LockWaitTimeout {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an execution failure error.
    pub fn execution_failed(reason: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            reason: reason.into(),
        }
    }

    /// Create a reclaimed error.
    pub fn reclaimed(reason: impl Into<String>) -> Self {
        Self::Reclaimed {
            reason: reason.into(),
        }
    }

    /// Create a completion wait timeout error.
    pub fn completion_wait_timeout(request_id: impl Into<String>, waited_ms: u64) -> Self {
        Self::CompletionWaitTimeout {
            request_id: request_id.into(),
            waited_ms,
        }
    }

    /// Check if the caller may retry the same request.
    ///
    /// Completion-wait timeouts do not mean the work failed, and retryable
    /// persistence errors are transient by definition.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::CompletionWaitTimeout { .. } | Self::LockWaitTimeout { .. } => true,
            Self::Persistence(e) | Self::Admission { source: e } => e.is_retryable(),
            Self::ExecutionFailed { .. } | Self::Reclaimed { .. } => false,
        }
    }
}

/// Result type for turn operations.
pub type TurnResult<T> = Result<T, TurnError>;
