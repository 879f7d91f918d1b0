//! Coordination store error types.

use thiserror::Error;

use crate::store::LeaseId;

/// Errors returned by a coordination store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store operation failed: {0}")]
    Operation(String),

    #[error("Lease {0} not found or expired")]
    LeaseNotFound(LeaseId),

    #[error("Requested revision {requested} has been compacted (oldest retained: {oldest})")]
    Compacted { requested: i64, oldest: i64 },

    #[error("Store is closed")]
    Closed,
}
