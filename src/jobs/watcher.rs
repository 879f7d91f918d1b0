//! Turns coordination store mutations into scheduler events.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::jobs::error::JobResult;
use crate::jobs::scheduler::SchedulerHandle;
use crate::jobs::types::{Task, TaskEvent};
use crate::store::{CoordinationStore, EventKind, KeyLayout, WatchEvent, WatchStream};

#[derive(Clone)]
pub struct TaskWatcher {
    store: Arc<dyn CoordinationStore>,
    layout: KeyLayout,
    scheduler: SchedulerHandle,
}

impl TaskWatcher {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        layout: KeyLayout,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            store,
            layout,
            scheduler,
        }
    }

    /// Push a put for every stored task, then follow the task namespace from
    /// the revision right after the listing.
    ///
    /// Errors from the initial listing or from opening the watch are returned;
    /// later failures end the spawned loop.
    pub async fn watch_tasks(&self, shutdown: CancellationToken) -> JobResult<JoinHandle<()>> {
        let prefix = self.layout.task_prefix.clone();
        let listing = self.store.get_prefix(&prefix).await?;

        tracing::info!(tasks = listing.kvs.len(), revision = listing.revision, "Loaded tasks");
        for kv in &listing.kvs {
            match Task::decode(&kv.value) {
                Ok(task) => {
                    if !self.scheduler.push_event(TaskEvent::put(task)).await {
                        tracing::warn!("Scheduler stopped during initial task load");
                        break;
                    }
                }
                Err(e) => tracing::warn!(key = %kv.key, error = %e, "Skipping undecodable task"),
            }
        }

        let stream = self.store.watch(&prefix, Some(listing.revision + 1)).await?;
        let scheduler = self.scheduler.clone();

        Ok(tokio::spawn(follow(
            "task",
            stream,
            shutdown,
            scheduler,
            move |event| task_event(event, &prefix),
        )))
    }

    /// Follow the kill namespace. Creating a marker kills the running attempt
    /// of that task; marker deletion (expiry) is ignored.
    pub async fn watch_kills(&self, shutdown: CancellationToken) -> JobResult<JoinHandle<()>> {
        let prefix = self.layout.kill_prefix.clone();
        let stream = self.store.watch(&prefix, None).await?;
        let scheduler = self.scheduler.clone();

        Ok(tokio::spawn(follow(
            "kill",
            stream,
            shutdown,
            scheduler,
            move |event| kill_event(event, &prefix),
        )))
    }
}

fn task_event(event: WatchEvent, prefix: &str) -> Option<TaskEvent> {
    match event.kind {
        EventKind::Put => match Task::decode(&event.kv.value) {
            Ok(task) => Some(TaskEvent::put(task)),
            Err(e) => {
                tracing::warn!(key = %event.kv.key, error = %e, "Skipping undecodable task");
                None
            }
        },
        EventKind::Delete => Some(TaskEvent::delete(KeyLayout::extract_name(
            &event.kv.key,
            prefix,
        ))),
    }
}

fn kill_event(event: WatchEvent, prefix: &str) -> Option<TaskEvent> {
    match event.kind {
        EventKind::Put => Some(TaskEvent::kill(KeyLayout::extract_name(
            &event.kv.key,
            prefix,
        ))),
        EventKind::Delete => None,
    }
}

async fn follow<F>(
    namespace: &'static str,
    mut stream: WatchStream,
    shutdown: CancellationToken,
    scheduler: SchedulerHandle,
    convert: F,
) where
    F: Fn(WatchEvent) -> Option<TaskEvent> + Send,
{
    tracing::debug!(namespace, "Watch started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.recv() => {
                let Some(event) = event else {
                    tracing::error!(namespace, "Watch stream closed");
                    break;
                };
                if let Some(event) = convert(event)
                    && !scheduler.push_event(event).await
                {
                    break;
                }
            }
        }
    }
    tracing::debug!(namespace, "Watch stopped");
}
