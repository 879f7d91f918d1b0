use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    /// Another worker holds the task lock. Expected and never logged as a failure.
    #[error("lock already occupied")]
    LockOccupied,

    #[error("Invalid cron expression: {0}")]
    InvalidCronExpression(String),

    #[error("Cron expression has no upcoming occurrence: {0}")]
    ScheduleExhausted(String),

    #[error("Failed to decode task: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Command cancelled")]
    Cancelled,

    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("No non-loopback IPv4 address found")]
    NoLocalIpFound,

    #[error("Coordination store error: {0}")]
    Store(#[from] StoreError),
}

impl JobError {
    pub fn is_lock_occupied(&self) -> bool {
        matches!(self, JobError::LockOccupied)
    }
}

pub type JobResult<T> = Result<T, JobError>;
