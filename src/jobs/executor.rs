//! Concurrent execution of single task attempts.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;

use crate::jobs::command::ShellRunner;
use crate::jobs::lock::LockFactory;
use crate::jobs::scheduler::SchedulerHandle;
use crate::jobs::types::{ExecutionResult, ExecutionState};

/// Hands a due execution off without blocking the caller.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, state: ExecutionState);
}

/// Runs each dispatched attempt on its own tokio task: jitter, lock, command,
/// unlock, then report the result back to the scheduler.
#[derive(Clone)]
pub struct TaskExecutor {
    locks: LockFactory,
    runner: ShellRunner,
    jitter_max: Duration,
    scheduler: SchedulerHandle,
}

impl TaskExecutor {
    pub fn new(
        locks: LockFactory,
        runner: ShellRunner,
        jitter_max: Duration,
        scheduler: SchedulerHandle,
    ) -> Self {
        Self {
            locks,
            runner,
            jitter_max,
            scheduler,
        }
    }

    /// One full attempt. Always yields a result, including on lock contention.
    pub async fn execute(&self, state: ExecutionState) -> ExecutionResult {
        tokio::select! {
            _ = tokio::time::sleep(self.jitter()) => {}
            _ = state.cancel.cancelled() => {}
        }

        let mut lock = self.locks.create(&state.task.name);
        let result = match lock.try_lock().await {
            Err(e) => {
                if !e.is_lock_occupied() {
                    tracing::warn!(task = %state.task.name, error = %e, "Lock attempt failed");
                }
                let now = Utc::now();
                ExecutionResult {
                    state,
                    output: Vec::new(),
                    error: Some(e),
                    start_time: now,
                    end_time: now,
                }
            }
            Ok(()) => {
                let start_time = Utc::now();
                tracing::info!(
                    task = %state.task.name,
                    execution_id = %state.execution_id,
                    plan_time = %state.plan_time,
                    "Running task"
                );
                let (output, error) = self.runner.run(&state.task.shell, &state.cancel).await;
                ExecutionResult {
                    state,
                    output,
                    error,
                    start_time,
                    end_time: Utc::now(),
                }
            }
        };
        lock.unlock().await;

        result
    }

    /// Staggers lock attempts across the fleet.
    fn jitter(&self) -> Duration {
        let max_ms = self.jitter_max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

impl Dispatcher for TaskExecutor {
    fn dispatch(&self, state: ExecutionState) {
        let executor = self.clone();
        tokio::spawn(async move {
            let result = executor.execute(state).await;
            let task = result.state.task.name.clone();
            if !executor.scheduler.push_result(result).await {
                tracing::debug!(task = %task, "Scheduler stopped, discarding result");
            }
        });
    }
}
