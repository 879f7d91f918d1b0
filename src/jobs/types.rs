use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jobs::error::{JobError, JobResult};

/// Task definition as stored under the task namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Task {
    pub name: String,
    pub shell: String,
    #[serde(rename = "cronExpr")]
    pub cron_expr: String,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        shell: impl Into<String>,
        cron_expr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            shell: shell.into(),
            cron_expr: cron_expr.into(),
        }
    }

    /// Task carrying only its name, as known from delete and kill events.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn decode(bytes: &[u8]) -> JobResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> JobResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskEventKind {
    Put,
    Delete,
    Kill,
}

/// Change fed into the scheduler loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task: Task,
}

impl TaskEvent {
    pub fn put(task: Task) -> Self {
        Self {
            kind: TaskEventKind::Put,
            task,
        }
    }

    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            kind: TaskEventKind::Delete,
            task: Task::named(name),
        }
    }

    pub fn kill(name: impl Into<String>) -> Self {
        Self {
            kind: TaskEventKind::Kill,
            task: Task::named(name),
        }
    }
}

/// Marker for an attempt in flight. Present in the scheduler's state table
/// from dispatch until the matching result comes back.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub execution_id: Uuid,
    pub task: Task,
    /// Fire time the plan was due at
    pub plan_time: DateTime<Utc>,
    /// Moment the scheduler dispatched the attempt
    pub real_time: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl ExecutionState {
    pub fn new(task: Task, plan_time: DateTime<Utc>, real_time: DateTime<Utc>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            task,
            plan_time,
            real_time,
            cancel: CancellationToken::new(),
        }
    }
}

/// Outcome of one executor run.
#[derive(Debug)]
pub struct ExecutionResult {
    pub state: ExecutionState,
    pub output: Vec<u8>,
    pub error: Option<JobError>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Persisted execution log entry. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub task_name: String,
    pub command: String,
    pub output: String,
    pub error: String,
    pub plan_time: i64,
    pub real_time: i64,
    pub start_time: i64,
    pub end_time: i64,
}

impl From<&ExecutionResult> for LogRecord {
    fn from(result: &ExecutionResult) -> Self {
        Self {
            task_name: result.state.task.name.clone(),
            command: result.state.task.shell.clone(),
            output: String::from_utf8_lossy(&result.output).into_owned(),
            error: result
                .error
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            plan_time: result.state.plan_time.timestamp_millis(),
            real_time: result.state.real_time.timestamp_millis(),
            start_time: result.start_time.timestamp_millis(),
            end_time: result.end_time.timestamp_millis(),
        }
    }
}

/// Records collected between two flushes. `id` tells an expired timer
/// whether the batch it was armed for is still the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogBatch {
    pub id: u64,
    pub records: Vec<LogRecord>,
}

impl LogBatch {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
