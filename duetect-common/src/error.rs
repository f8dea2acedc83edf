//! Common error types for Duetect

use thiserror::Error;

/// Common result type for Duetect operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the Duetect binaries
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound detection event with missing or out-of-range fields.
    /// Dropped with a log entry, never fatal to the ingestion loop.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected numeric failure inside scoring.
    /// Caught locally; callers degrade to the average-confidence fallback.
    #[error("Verifier error: {0}")]
    Verifier(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error represents a transient persistence failure that a
    /// caller or scheduler should retry rather than treat as permanent.
    pub fn is_transient_store(&self) -> bool {
        match self {
            Error::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }
}
