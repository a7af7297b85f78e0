//! Error types for relgraph

use thiserror::Error;

use crate::validate::ValidationError;

/// Result type alias for relgraph operations
pub type Result<T> = std::result::Result<T, RelgraphError>;

/// Main error type for relgraph
#[derive(Error, Debug)]
pub enum RelgraphError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Transient backing-store failure; the traversal engine retries these.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelgraphError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelgraphError::StoreUnavailable(_))
    }

    /// Get error code for the JSON-RPC protocol
    pub fn code(&self) -> i64 {
        match self {
            RelgraphError::Validation(_) => -32602,
            RelgraphError::InvalidInput(_) => -32602,
            RelgraphError::StoreUnavailable(_) => -32010,
            RelgraphError::Cancelled => -32011,
            _ => -32000,
        }
    }

    /// Stable reason string surfaced to callers in failure lists
    pub fn reason(&self) -> &'static str {
        match self {
            RelgraphError::Validation(e) => e.kind(),
            RelgraphError::StoreUnavailable(_) => "store_unavailable",
            RelgraphError::Cancelled => "cancelled",
            RelgraphError::InvalidInput(_) => "invalid_input",
            _ => "internal",
        }
    }

    /// Classify a rusqlite error: contention and I/O failures are transient,
    /// everything else is a hard database error.
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy
                        | ErrorCode::DatabaseLocked
                        | ErrorCode::OperationInterrupted
                        | ErrorCode::SystemIoFailure
                        | ErrorCode::CannotOpen
                ) =>
            {
                RelgraphError::StoreUnavailable(err.to_string())
            }
            _ => RelgraphError::Database(err),
        }
    }
}
