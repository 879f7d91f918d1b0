//! Worker-side scheduling engine.
//!
//! Data flow: [`TaskWatcher`] turns store mutations into events for the
//! [`Scheduler`], which fires due plans through a [`Dispatcher`]. The
//! [`TaskExecutor`] takes the per-task [`TaskLock`], runs the command and
//! reports back; finished attempts become [`LogRecord`]s batched by the
//! [`LogWriter`].

pub mod command;
pub mod error;
pub mod executor;
pub mod lock;
pub mod log_writer;
pub mod plan;
pub mod register;
pub mod scheduler;
pub mod types;
pub mod watcher;

pub use command::ShellRunner;
pub use error::{JobError, JobResult};
pub use executor::{Dispatcher, TaskExecutor};
pub use lock::{LockFactory, TaskLock};
pub use log_writer::{LogWriter, LogWriterLoop, log_writer};
pub use plan::Plan;
pub use register::{WorkerRegistration, node_id};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerInbox, channels};
pub use types::{
    ExecutionResult, ExecutionState, LogBatch, LogRecord, Task, TaskEvent, TaskEventKind,
};
pub use watcher::TaskWatcher;
