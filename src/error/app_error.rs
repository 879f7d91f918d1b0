use thiserror::Error;

use crate::config::error::ConfigError;
use crate::jobs::JobError;
use crate::log_store::LogStoreError;
use crate::store::StoreError;

/// Application-wide error type for the worker process.
///
/// Per-task failures never surface here; they are funneled into execution
/// results by the scheduling engine. This type covers startup and
/// infrastructure failures that bubble up to the binary.
#[derive(Error, Debug)]
pub enum AppError {
    /// Validation error with field-specific details
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Coordination store operation failed
    #[error("Coordination store operation failed: {operation}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },

    /// Log store operation failed
    #[error("Log store error: {0}")]
    LogStore(#[from] LogStoreError),

    /// Scheduling engine failure during setup
    #[error("Job engine error: {0}")]
    Job(#[from] JobError),

    /// Database operation error with operation context
    #[error("Database operation failed: {operation}")]
    Database {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    /// Connection pool error
    #[error("Connection pool error")]
    ConnectionPool {
        #[source]
        source: anyhow::Error,
    },

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    /// Wrap a coordination store error with the operation that produced it
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        AppError::Store {
            operation: operation.into(),
            source,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
