//! Repository layer for data access operations.

mod task_log_repo;

pub use task_log_repo::{NewTaskLog, PostgresLogStore};
