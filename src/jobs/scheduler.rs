//! The authoritative scheduling loop.
//!
//! A single task owns the plan table (one parsed schedule per known task) and
//! the state table (one entry per attempt in flight). Watch events, execution
//! results and the recompute timer all arrive through this loop, so neither
//! table is ever touched concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::Dispatcher;
use crate::jobs::log_writer::LogWriter;
use crate::jobs::plan::Plan;
use crate::jobs::types::{ExecutionResult, ExecutionState, LogRecord, TaskEvent, TaskEventKind};

/// How long `run` keeps collecting results of cancelled attempts after shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Producer side of the scheduler's queues.
#[derive(Clone)]
pub struct SchedulerHandle {
    events: mpsc::Sender<TaskEvent>,
    results: mpsc::Sender<ExecutionResult>,
}

impl SchedulerHandle {
    /// Returns false once the scheduler is gone.
    pub async fn push_event(&self, event: TaskEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// Returns false once the scheduler is gone.
    pub async fn push_result(&self, result: ExecutionResult) -> bool {
        self.results.send(result).await.is_ok()
    }
}

/// Consumer side of the scheduler's queues.
pub struct SchedulerInbox {
    events: mpsc::Receiver<TaskEvent>,
    results: mpsc::Receiver<ExecutionResult>,
}

impl SchedulerInbox {
    pub async fn next_event(&mut self) -> Option<TaskEvent> {
        self.events.recv().await
    }

    pub async fn next_result(&mut self) -> Option<ExecutionResult> {
        self.results.recv().await
    }
}

/// Bounded event and result queues feeding one scheduler.
pub fn channels(capacity: usize) -> (SchedulerHandle, SchedulerInbox) {
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
    let (results_tx, results_rx) = mpsc::channel(capacity.max(1));
    (
        SchedulerHandle {
            events: events_tx,
            results: results_tx,
        },
        SchedulerInbox {
            events: events_rx,
            results: results_rx,
        },
    )
}

pub struct Scheduler {
    inbox: SchedulerInbox,
    dispatcher: Arc<dyn Dispatcher>,
    log_writer: LogWriter,
    idle_delay: Duration,
    shutdown_grace: Duration,
    plans: HashMap<String, Plan>,
    running: HashMap<String, ExecutionState>,
}

impl Scheduler {
    pub fn new(
        inbox: SchedulerInbox,
        dispatcher: Arc<dyn Dispatcher>,
        log_writer: LogWriter,
        idle_delay: Duration,
    ) -> Self {
        Self {
            inbox,
            dispatcher,
            log_writer,
            idle_delay,
            shutdown_grace: SHUTDOWN_GRACE,
            plans: HashMap::new(),
            running: HashMap::new(),
        }
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    /// Names of all planned tasks, sorted.
    pub fn plan_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plans.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Apply one task event to the tables.
    ///
    /// A put whose cron expression does not parse leaves the table untouched
    /// and returns the error. A put whose expression never fires again
    /// removes the plan.
    pub fn handle_event(&mut self, event: TaskEvent, now: DateTime<Utc>) -> JobResult<()> {
        let name = event.task.name.clone();
        match event.kind {
            TaskEventKind::Put => match Plan::build(event.task, now) {
                Ok(plan) => {
                    tracing::debug!(task = %name, next_time = %plan.next_time, "Task planned");
                    self.plans.insert(name, plan);
                }
                Err(JobError::ScheduleExhausted(expr)) => {
                    tracing::warn!(task = %name, cron_expr = %expr, "Task never fires again, removing plan");
                    self.plans.remove(&name);
                }
                Err(e) => return Err(e),
            },
            TaskEventKind::Delete => {
                if self.plans.remove(&name).is_some() {
                    tracing::debug!(task = %name, "Task unplanned");
                }
            }
            TaskEventKind::Kill => {
                if let Some(state) = self.running.get(&name) {
                    tracing::info!(task = %name, execution_id = %state.execution_id, "Killing running task");
                    state.cancel.cancel();
                }
            }
        }
        Ok(())
    }

    /// Retire a finished attempt and forward its log record. Lock contention
    /// is not recorded.
    pub fn handle_result(&mut self, result: ExecutionResult) {
        let name = &result.state.task.name;
        if self
            .running
            .get(name)
            .is_some_and(|s| s.execution_id == result.state.execution_id)
        {
            self.running.remove(name);
        }

        if result.error.as_ref().is_some_and(JobError::is_lock_occupied) {
            tracing::debug!(task = %name, "Lock held elsewhere, attempt skipped");
            return;
        }

        if let Some(ref e) = result.error {
            tracing::warn!(task = %name, error = %e, "Task finished with error");
        }
        self.log_writer.save(LogRecord::from(&result));
    }

    /// Dispatch every due plan and return the delay until the next fire time.
    ///
    /// A due plan whose task is still running is skipped for this tick. Every
    /// due plan advances past `now` either way.
    pub fn schedule_at(&mut self, now: DateTime<Utc>) -> Duration {
        let mut exhausted = Vec::new();
        let mut nearest: Option<DateTime<Utc>> = None;

        for (name, plan) in self.plans.iter_mut() {
            if plan.is_due(now) {
                if self.running.contains_key(name) {
                    tracing::debug!(task = %name, plan_time = %plan.next_time, "Still running, tick dropped");
                } else {
                    let state = ExecutionState::new(plan.task.clone(), plan.next_time, now);
                    self.running.insert(name.clone(), state.clone());
                    self.dispatcher.dispatch(state);
                }

                if !plan.advance(now) {
                    exhausted.push(name.clone());
                    continue;
                }
            }

            nearest = Some(match nearest {
                Some(t) if t <= plan.next_time => t,
                _ => plan.next_time,
            });
        }

        for name in exhausted {
            tracing::warn!(task = %name, "Schedule exhausted, removing plan");
            self.plans.remove(&name);
        }

        match nearest {
            Some(next) => (next - now).to_std().unwrap_or(Duration::ZERO),
            None => self.idle_delay,
        }
    }

    /// Serve events, results and the timer until `shutdown` fires. Attempts
    /// still in flight are cancelled on the way out and their results are
    /// collected for up to the shutdown grace period.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        tracing::info!("Scheduler started");

        let mut delay = self.schedule_at(Utc::now());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = self.inbox.events.recv() => {
                    let name = event.task.name.clone();
                    if let Err(e) = self.handle_event(event, Utc::now()) {
                        tracing::warn!(task = %name, error = %e, "Dropping task event");
                    }
                }
                Some(result) = self.inbox.results.recv() => self.handle_result(result),
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.schedule_at(Utc::now());
        }

        for state in self.running.values() {
            state.cancel.cancel();
        }
        self.drain_results().await;
        tracing::info!(in_flight = self.running.len(), "Scheduler stopped");
    }

    /// Retire cancelled attempts as their results come back, so their log
    /// records reach the writer before it is dropped.
    async fn drain_results(&mut self) {
        if self.running.is_empty() {
            return;
        }

        let deadline = tokio::time::sleep(self.shutdown_grace);
        tokio::pin!(deadline);
        while !self.running.is_empty() {
            tokio::select! {
                _ = &mut deadline => {
                    tracing::warn!(
                        in_flight = self.running.len(),
                        grace_ms = self.shutdown_grace.as_millis() as u64,
                        "Attempts still running after shutdown grace, abandoning their results"
                    );
                    break;
                }
                result = self.inbox.results.recv() => match result {
                    Some(result) => self.handle_result(result),
                    None => break,
                },
            }
        }
    }
}
