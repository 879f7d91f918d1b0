use async_trait::async_trait;

use crate::jobs::LogRecord;
use crate::log_store::{LogStore, LogStoreError};

/// Emits every record as a structured event on the `task_log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogStore;

#[async_trait]
impl LogStore for TracingLogStore {
    async fn insert_many(&self, records: &[LogRecord]) -> Result<(), LogStoreError> {
        for record in records {
            tracing::info!(
                target: "task_log",
                task = %record.task_name,
                command = %record.command,
                output = %record.output,
                error = %record.error,
                plan_time = record.plan_time,
                real_time = record.real_time,
                start_time = record.start_time,
                end_time = record.end_time,
                "Task execution finished"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}
