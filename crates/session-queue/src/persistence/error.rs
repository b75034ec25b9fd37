//! Persistence error types for the session queue.
//!
//! All errors are explicit, typed, and recoverable - no panics allowed.

use std::fmt;

use thiserror::Error;

/// Errors that can occur during persistence operations.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Failed to connect to the database
    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Query execution failed
    #[error("query failed: {reason}")]
    QueryFailed { reason: String },

    /// The store aborted a transaction due to a read/write conflict with a
    /// concurrent transaction; safe to retry
    #[error("transaction conflict: {reason}")]
    TransactionConflict { reason: String },

    /// Record not found
    #[error("record not found: {entity_type} with id '{id}'")]
    NotFound { entity_type: String, id: String },

    /// Record already exists
    #[error("record already exists: {entity_type} with id '{id}'")]
    AlreadyExists { entity_type: String, id: String },

    /// A state transition was attempted from a state that does not allow it
    #[error("invalid state transition: {reason}")]
    InvalidTransition { reason: String },

    /// Schema error
    #[error("schema error: {reason}")]
    SchemaError { reason: String },
}

impl PersistenceError {
    /// Create a connection failed error.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            reason: reason.into(),
        }
    }

    /// Create a query failed error.
    pub fn query_failed(reason: impl Into<String>) -> Self {
        Self::QueryFailed {
            reason: reason.into(),
        }
    }

    /// Create a transaction conflict error.
    pub fn transaction_conflict(reason: impl Into<String>) -> Self {
        Self::TransactionConflict {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create an already exists error.
    pub fn already_exists(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create an invalid transition error.
    pub fn invalid_transition(reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema_error(reason: impl Into<String>) -> Self {
        Self::SchemaError {
            reason: reason.into(),
        }
    }

    /// Check if error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::TransactionConflict { .. }
        )
    }
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper to convert SurrealDB errors to PersistenceError.
pub fn from_surrealdb_error(err: impl fmt::Display) -> PersistenceError {
    let msg = err.to_string();

    // Categorize based on error message patterns
    if msg.contains("read or write conflict") || msg.contains("transaction can be retried") {
        PersistenceError::transaction_conflict(msg)
    } else if msg.contains("connection") || msg.contains("Connection") || msg.contains("connect") {
        PersistenceError::connection_failed(msg)
    } else if msg.contains("already exists") || msg.contains("duplicate") {
        PersistenceError::already_exists("unknown", msg)
    } else if msg.contains("not found") || msg.contains("does not exist") {
        PersistenceError::not_found("unknown", msg)
    } else {
        PersistenceError::query_failed(msg)
    }
}
