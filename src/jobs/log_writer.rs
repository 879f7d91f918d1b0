//! Batched persistence of execution logs.
//!
//! Records accumulate in a current batch. The batch is flushed as soon as it
//! reaches `batch_size`, or when its commit timeout fires, whichever comes
//! first. The timer carries the id of the batch it was armed for; an expiry
//! for a batch that is no longer current is ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LogSinkConfig;
use crate::jobs::types::{LogBatch, LogRecord};
use crate::log_store::LogStore;

/// Producer side. Never blocks: a full queue drops the record.
#[derive(Clone)]
pub struct LogWriter {
    tx: mpsc::Sender<LogRecord>,
}

impl LogWriter {
    /// Queue `record` for persistence. Returns false when it was dropped.
    pub fn save(&self, record: LogRecord) -> bool {
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(record)) => {
                tracing::warn!(task = %record.task_name, "Log queue full, dropping record");
                false
            }
            Err(TrySendError::Closed(record)) => {
                tracing::debug!(task = %record.task_name, "Log writer stopped, dropping record");
                false
            }
        }
    }
}

/// Build a writer handle and the loop that consumes it.
pub fn log_writer(store: Arc<dyn LogStore>, config: &LogSinkConfig) -> (LogWriter, LogWriterLoop) {
    let (tx, records) = mpsc::channel(config.channel_size.max(1));
    let (expired_tx, expired_rx) = mpsc::unbounded_channel();

    let writer_loop = LogWriterLoop {
        records,
        expired_tx,
        expired_rx,
        store,
        batch_size: config.batch_size.max(1),
        commit_timeout: config.commit_timeout(),
        current: None,
        timer: None,
        next_batch_id: 0,
    };

    (LogWriter { tx }, writer_loop)
}

pub struct LogWriterLoop {
    records: mpsc::Receiver<LogRecord>,
    expired_tx: mpsc::UnboundedSender<u64>,
    expired_rx: mpsc::UnboundedReceiver<u64>,
    store: Arc<dyn LogStore>,
    batch_size: usize,
    commit_timeout: Duration,
    current: Option<LogBatch>,
    timer: Option<AbortHandle>,
    next_batch_id: u64,
}

impl LogWriterLoop {
    /// Consume records until `shutdown` fires or every writer handle is gone,
    /// then persist whatever is still queued.
    pub async fn run(mut self, shutdown: CancellationToken) {
        tracing::info!(
            backend = self.store.name(),
            batch_size = self.batch_size,
            commit_timeout_ms = self.commit_timeout.as_millis() as u64,
            "Log writer started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                record = self.records.recv() => match record {
                    Some(record) => self.on_record(record).await,
                    None => break,
                },
                Some(batch_id) = self.expired_rx.recv() => self.on_expired(batch_id).await,
            }
        }

        self.records.close();
        while let Ok(record) = self.records.try_recv() {
            self.on_record(record).await;
        }
        self.flush_current().await;

        tracing::info!("Log writer stopped");
    }

    async fn on_record(&mut self, record: LogRecord) {
        if self.current.is_none() {
            let id = self.next_batch_id;
            self.next_batch_id += 1;
            self.arm_timer(id);
            self.current = Some(LogBatch::new(id));
        }

        let full = match self.current.as_mut() {
            Some(batch) => {
                batch.records.push(record);
                batch.len() >= self.batch_size
            }
            None => false,
        };

        if full {
            self.flush_current().await;
        }
    }

    async fn on_expired(&mut self, batch_id: u64) {
        if self.current.as_ref().is_some_and(|b| b.id == batch_id) {
            self.flush_current().await;
        }
    }

    fn arm_timer(&mut self, batch_id: u64) {
        let expired_tx = self.expired_tx.clone();
        let timeout = self.commit_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expired_tx.send(batch_id);
        });
        self.timer = Some(handle.abort_handle());
    }

    async fn flush_current(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let Some(batch) = self.current.take() else {
            return;
        };
        if batch.is_empty() {
            return;
        }

        match self.store.insert_many(&batch.records).await {
            Ok(()) => tracing::debug!(batch = batch.id, records = batch.len(), "Log batch flushed"),
            Err(e) => tracing::error!(
                batch = batch.id,
                records = batch.len(),
                error = %e,
                "Failed to persist log batch"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_store::MemoryLogStore;

    fn record(name: &str) -> LogRecord {
        LogRecord {
            task_name: name.to_string(),
            command: "true".to_string(),
            output: String::new(),
            error: String::new(),
            plan_time: 0,
            real_time: 0,
            start_time: 0,
            end_time: 0,
        }
    }

    fn config(batch_size: usize, timeout_ms: u64, channel_size: usize) -> LogSinkConfig {
        LogSinkConfig {
            batch_size,
            commit_timeout_ms: timeout_ms,
            channel_size,
            ..Default::default()
        }
    }

    fn start(
        batch_size: usize,
        timeout_ms: u64,
    ) -> (LogWriter, MemoryLogStore, CancellationToken, tokio::task::JoinHandle<()>) {
        let store = MemoryLogStore::new();
        let (writer, writer_loop) =
            log_writer(Arc::new(store.clone()), &config(batch_size, timeout_ms, 100));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(writer_loop.run(shutdown.clone()));
        (writer, store, shutdown, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_flushes_once() {
        let (writer, store, _shutdown, _handle) = start(3, 100);

        for name in ["a", "b", "c"] {
            assert!(writer.save(record(name)));
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        let names: Vec<_> = batches[0].iter().map(|r| r.task_name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_flushes_partial_batch() {
        let (writer, store, _shutdown, _handle) = start(3, 100);

        writer.save(record("lonely"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.batches().is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_flush_cancels_pending_timer() {
        let (writer, store, _shutdown, _handle) = start(3, 100);

        for name in ["a", "b", "c"] {
            writer.save(record(name));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.batches().len(), 1);

        // well past the first batch's deadline
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.batches().len(), 1);
        assert_eq!(store.record_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_batch_gets_its_own_timer() {
        let (writer, store, _shutdown, _handle) = start(2, 100);

        writer.save(record("a"));
        writer.save(record("b"));
        tokio::time::sleep(Duration::from_millis(60)).await;
        writer.save(record("c"));

        // the first batch's timer would have fired here
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.batches().len(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let batches = store.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].task_name, "c");
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let store = MemoryLogStore::new();
        let (writer, _writer_loop) = log_writer(Arc::new(store), &config(10, 100, 2));

        assert!(writer.save(record("a")));
        assert!(writer.save(record("b")));
        assert!(!writer.save(record("c")));
    }

    #[tokio::test]
    async fn test_save_after_loop_is_gone_reports_drop() {
        let store = MemoryLogStore::new();
        let (writer, writer_loop) = log_writer(Arc::new(store), &config(10, 100, 2));
        drop(writer_loop);
        assert!(!writer.save(record("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drains_queue_and_flushes() {
        let store = MemoryLogStore::new();
        let (writer, writer_loop) =
            log_writer(Arc::new(store.clone()), &config(100, 60_000, 100));

        for name in ["a", "b", "c", "d"] {
            writer.save(record(name));
        }

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        writer_loop.run(shutdown).await;

        assert_eq!(store.record_count(), 4);
        assert_eq!(store.batches().len(), 1);
    }
}
