use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::jobs::LogRecord;
use crate::log_store::{LogStore, LogStoreError};

/// Keeps every flushed batch in arrival order.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    batches: Arc<Mutex<Vec<Vec<LogRecord>>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all batches flushed so far.
    pub fn batches(&self) -> Vec<Vec<LogRecord>> {
        self.batches.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn record_count(&self) -> usize {
        self.batches
            .lock()
            .map(|b| b.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert_many(&self, records: &[LogRecord]) -> Result<(), LogStoreError> {
        let mut batches = self
            .batches
            .lock()
            .map_err(|e| LogStoreError::Unavailable(e.to_string()))?;
        batches.push(records.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
