//! Worker process lifecycle.
//!
//! Builds every component once from [`Settings`] and runs the long-lived
//! loops (scheduler, watches, registration, log writer, plus the lease reaper
//! of the in-process store) under one root [`CancellationToken`].

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{CoordinationBackend, CoordinationConfig, LogSinkBackend, Settings};
use crate::db::{MIGRATIONS, establish_async_connection_pool};
use crate::error::{AppError, AppResult};
use crate::jobs::{
    LockFactory, Scheduler, ShellRunner, Task, TaskExecutor, TaskWatcher, WorkerRegistration,
    channels, log_writer, node_id,
};
use crate::log_store::{LogStore, MemoryLogStore, TracingLogStore};
use crate::repositories::PostgresLogStore;
use crate::store::{CoordinationStore, KeyLayout, MemoryStore};

/// Interval of the background sweep expiring idle leases.
const LEASE_REAPER_INTERVAL: Duration = Duration::from_millis(500);

pub struct Worker {
    settings: Settings,
    store: Arc<dyn CoordinationStore>,
    /// Set when leases live in this process and need a local sweep.
    memory: Option<MemoryStore>,
    log_store: Arc<dyn LogStore>,
}

impl Worker {
    pub fn new(settings: Settings, store: MemoryStore, log_store: Arc<dyn LogStore>) -> Self {
        Self {
            settings,
            store: Arc::new(store.clone()),
            memory: Some(store),
            log_store,
        }
    }

    /// Worker over a store that expires its own leases, such as etcd.
    pub fn with_store(
        settings: Settings,
        store: Arc<dyn CoordinationStore>,
        log_store: Arc<dyn LogStore>,
    ) -> Self {
        Self {
            settings,
            store,
            memory: None,
            log_store,
        }
    }

    /// Build a worker with the coordination store selected by
    /// `coordination.backend` and the log store selected by `log_sink.backend`.
    pub async fn from_settings(settings: Settings) -> AppResult<Self> {
        let log_store = build_log_store(&settings).await?;
        match settings.coordination.backend {
            CoordinationBackend::Memory => Ok(Self::new(settings, MemoryStore::new(), log_store)),
            CoordinationBackend::Etcd => {
                let store = connect_etcd(&settings.coordination).await?;
                Ok(Self::with_store(settings, store, log_store))
            }
        }
    }

    /// Run until `shutdown` fires. Startup failures cancel whatever was
    /// already spawned before returning.
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<()> {
        let mut loops = JoinSet::new();
        let result = self.start(&mut loops, &shutdown).await;
        if result.is_err() {
            shutdown.cancel();
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker loop panicked");
            }
        }

        tracing::info!("Worker stopped");
        result
    }

    async fn start(self, loops: &mut JoinSet<()>, shutdown: &CancellationToken) -> AppResult<()> {
        let Worker {
            settings,
            store,
            memory,
            log_store,
        } = self;
        let layout = KeyLayout::from_config(&settings.coordination);

        let node = node_id(settings.worker.node_id.as_deref())?;
        tracing::info!(
            node = %node,
            version = %settings.application.version,
            coordination = ?settings.coordination.backend,
            log_sink = log_store.name(),
            "Starting worker"
        );

        if let Some(memory) = memory {
            let token = shutdown.clone();
            loops.spawn(async move { memory.run_lease_reaper(LEASE_REAPER_INTERVAL, token).await });
        }

        seed_tasks(&*store, &layout, &settings).await?;

        // The writer loop ends once the scheduler drops its handle, after
        // draining what is still queued.
        let (writer, writer_loop) = log_writer(log_store, &settings.log_sink);
        loops.spawn(writer_loop.run(CancellationToken::new()));

        let (handle, inbox) = channels(settings.worker.channel_size);
        let locks = LockFactory::new(
            Arc::clone(&store),
            layout.clone(),
            settings.coordination.lock_lease_ttl(),
        );
        let executor = TaskExecutor::new(
            locks,
            ShellRunner::new(settings.worker.shell_path.clone()),
            settings.worker.jitter_max(),
            handle.clone(),
        );
        let mut scheduler = Scheduler::new(
            inbox,
            Arc::new(executor),
            writer,
            settings.worker.idle_delay(),
        );
        {
            let token = shutdown.clone();
            loops.spawn(async move { scheduler.run(token).await });
        }

        let watcher = TaskWatcher::new(Arc::clone(&store), layout.clone(), handle);
        let tasks = watcher.watch_tasks(shutdown.clone()).await?;
        let kills = watcher.watch_kills(shutdown.clone()).await?;
        loops.spawn(async move {
            let _ = tokio::join!(tasks, kills);
        });

        let registration = WorkerRegistration::new(
            Arc::clone(&store),
            &layout,
            &node,
            settings.coordination.register_lease_ttl(),
            settings.coordination.register_retry(),
        );
        loops.spawn(registration.run(shutdown.clone()));

        tracing::info!(node = %node, "Worker started");
        Ok(())
    }
}

async fn seed_tasks(
    store: &dyn CoordinationStore,
    layout: &KeyLayout,
    settings: &Settings,
) -> AppResult<()> {
    for seed in &settings.tasks {
        let task = Task::new(&seed.name, &seed.shell, &seed.cron_expr);
        store
            .put(&layout.task_key(&task.name), task.encode()?, None)
            .await
            .map_err(|e| AppError::store("seed task", e))?;
        tracing::debug!(task = %task.name, cron_expr = %task.cron_expr, "Seeded task");
    }
    Ok(())
}

#[cfg(feature = "etcd")]
async fn connect_etcd(config: &CoordinationConfig) -> AppResult<Arc<dyn CoordinationStore>> {
    let store = crate::store::EtcdStore::connect(&config.endpoints, config.dial_timeout())
        .await
        .map_err(|e| AppError::store("connect to etcd", e))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "etcd"))]
async fn connect_etcd(_config: &CoordinationConfig) -> AppResult<Arc<dyn CoordinationStore>> {
    Err(AppError::Validation {
        field: "coordination.backend".to_string(),
        reason: "etcd backend requires building with the `etcd` feature".to_string(),
    })
}

/// Log store for the configured backend. The postgres backend applies pending
/// migrations first when `database.auto_migrate` is set.
pub async fn build_log_store(settings: &Settings) -> AppResult<Arc<dyn LogStore>> {
    match settings.log_sink.backend {
        LogSinkBackend::Tracing => Ok(Arc::new(TracingLogStore)),
        LogSinkBackend::Memory => Ok(Arc::new(MemoryLogStore::new())),
        LogSinkBackend::Postgres => {
            if settings.database.auto_migrate {
                run_migrations(settings.database.url.clone()).await?;
            }
            let pool = establish_async_connection_pool(&settings.database).await?;
            Ok(Arc::new(PostgresLogStore::new(pool)))
        }
    }
}

/// Apply pending migrations on a blocking connection. Returns the applied
/// migration names.
pub async fn run_migrations(database_url: String) -> AppResult<Vec<String>> {
    tokio::task::spawn_blocking(move || {
        use diesel::Connection;
        use diesel::pg::PgConnection;
        use diesel_migrations::MigrationHarness;

        let mut conn = PgConnection::establish(&database_url).map_err(|e| AppError::Database {
            operation: "establish connection for migrations".to_string(),
            source: anyhow::anyhow!("Connection error: {}", e),
        })?;

        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| AppError::Database {
                operation: "run pending migrations".to_string(),
                source: anyhow::anyhow!("Migration error: {}", e),
            })?;

        let names: Vec<String> = applied.iter().map(|m| m.to_string()).collect();
        for name in &names {
            tracing::info!(migration = %name, "Applied migration");
        }
        Ok::<_, AppError>(names)
    })
    .await
    .map_err(|e| AppError::Internal {
        source: anyhow::Error::from(e),
    })?
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskSeed;

    fn settings(tasks: &[(&str, &str, &str)]) -> Settings {
        let mut settings = Settings::default();
        settings.worker.node_id = Some("test-node".to_string());
        settings.worker.jitter_max_ms = 0;
        settings.log_sink.backend = LogSinkBackend::Memory;
        settings.log_sink.commit_timeout_ms = 50;
        settings.tasks = tasks
            .iter()
            .map(|(name, shell, cron_expr)| TaskSeed {
                name: name.to_string(),
                shell: shell.to_string(),
                cron_expr: cron_expr.to_string(),
            })
            .collect();
        settings
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_runs_seeded_task_and_logs_it() {
        let store = MemoryStore::new();
        let logs = MemoryLogStore::new();
        let worker = Worker::new(
            settings(&[("tick", "echo tick", "* * * * * *")]),
            store.clone(),
            Arc::new(logs.clone()),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert!(store.contains_key("/cron/worker/test-node"));
        assert!(store.contains_key("/cron/task/tick"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let records = logs.batches().concat();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.task_name == "tick"));
        assert!(records.iter().any(|r| r.output == "tick\n" && r.error.is_empty()));
        assert!(!store.contains_key("/cron/worker/test-node"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_kill_marker_cancels_running_command() {
        let store = MemoryStore::new();
        let logs = MemoryLogStore::new();
        let worker = Worker::new(
            settings(&[("sleepy", "sleep 30", "* * * * * *")]),
            store.clone(),
            Arc::new(logs.clone()),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        // wait for the first attempt to take its lock
        let mut locked = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if store.contains_key("/cron/lock/sleepy") {
                locked = true;
                break;
            }
        }
        assert!(locked, "task never started");

        store.put("/cron/kill/sleepy", Vec::new(), None).await.unwrap();
        for _ in 0..30 {
            if logs.record_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        shutdown.cancel();
        handle.await.unwrap().unwrap();

        let records = logs.batches().concat();
        assert!(records.iter().any(|r| r.error == "Command cancelled"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_logs_cancelled_running_command() {
        let store = MemoryStore::new();
        let logs = MemoryLogStore::new();
        let worker = Worker::new(
            settings(&[("long", "sleep 30", "* * * * * *")]),
            store.clone(),
            Arc::new(logs.clone()),
        );

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        let mut locked = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if store.contains_key("/cron/lock/long") {
                locked = true;
                break;
            }
        }
        assert!(locked, "task never started");
        assert_eq!(logs.record_count(), 0);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let records = logs.batches().concat();
        assert!(
            records
                .iter()
                .any(|r| r.task_name == "long" && r.error == "Command cancelled")
        );
        assert!(!store.contains_key("/cron/lock/long"));
    }

    #[tokio::test]
    async fn test_memory_backend_selected() {
        let store = build_log_store(&settings(&[])).await.unwrap();
        assert_eq!(store.name(), "memory");
    }

    #[tokio::test]
    async fn test_shared_store_worker_runs_without_reaper() {
        let store = MemoryStore::new();
        let worker = Worker::with_store(
            settings(&[("seeded", "true", "0 0 1 1 *")]),
            Arc::new(store.clone()),
            Arc::new(MemoryLogStore::new()),
        );
        assert!(worker.memory.is_none());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));
        for _ in 0..20 {
            if store.contains_key("/cron/worker/test-node") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(store.contains_key("/cron/task/seeded"));
        assert!(store.contains_key("/cron/worker/test-node"));

        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert!(!store.contains_key("/cron/worker/test-node"));
    }

    #[cfg(not(feature = "etcd"))]
    #[tokio::test]
    async fn test_etcd_backend_needs_feature() {
        let mut settings = settings(&[]);
        settings.coordination.backend = CoordinationBackend::Etcd;
        settings.coordination.endpoints = vec!["http://127.0.0.1:2379".to_string()];

        match Worker::from_settings(settings).await {
            Err(AppError::Validation { field, .. }) => assert_eq!(field, "coordination.backend"),
            Err(other) => panic!("Expected validation error, got {:?}", other),
            Ok(_) => panic!("Expected validation error, got a worker"),
        }
    }
}
