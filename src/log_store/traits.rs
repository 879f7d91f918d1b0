use async_trait::async_trait;

use crate::jobs::LogRecord;
use crate::log_store::LogStoreError;

/// Append-only sink for execution log records.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one batch. Records keep their order.
    async fn insert_many(&self, records: &[LogRecord]) -> Result<(), LogStoreError>;

    /// Backend name for diagnostics
    fn name(&self) -> &'static str;
}
