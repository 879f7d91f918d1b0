//! Task log repository for async database operations.
//!
//! Provides batch inserts into the task_logs table.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::AsyncDbPool;
use crate::jobs::LogRecord;
use crate::log_store::{LogStore, LogStoreError};
use crate::schema::task_logs;

#[derive(Debug, Insertable)]
#[diesel(table_name = task_logs)]
pub struct NewTaskLog<'a> {
    pub task_name: &'a str,
    pub command: &'a str,
    pub output: &'a str,
    pub error: &'a str,
    pub plan_time: i64,
    pub real_time: i64,
    pub start_time: i64,
    pub end_time: i64,
}

impl<'a> From<&'a LogRecord> for NewTaskLog<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            task_name: &record.task_name,
            command: &record.command,
            output: &record.output,
            error: &record.error,
            plan_time: record.plan_time,
            real_time: record.real_time,
            start_time: record.start_time,
            end_time: record.end_time,
        }
    }
}

/// Log store writing each batch with a single multi-row INSERT.
#[derive(Clone)]
pub struct PostgresLogStore {
    pool: AsyncDbPool,
}

impl PostgresLogStore {
    /// Creates a new PostgresLogStore with the given connection pool.
    pub fn new(pool: AsyncDbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LogStore for PostgresLogStore {
    async fn insert_many(&self, records: &[LogRecord]) -> Result<(), LogStoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| LogStoreError::ConnectionPool(e.to_string()))?;

        let rows: Vec<NewTaskLog<'_>> = records.iter().map(NewTaskLog::from).collect();
        diesel::insert_into(task_logs::table)
            .values(&rows)
            .execute(&mut conn)
            .await?;

        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use diesel::pg::Pg;

    fn record(name: &str) -> LogRecord {
        LogRecord {
            task_name: name.to_string(),
            command: "echo hi".to_string(),
            output: "hi\n".to_string(),
            error: String::new(),
            plan_time: 1,
            real_time: 2,
            start_time: 3,
            end_time: 4,
        }
    }

    #[test]
    fn test_batch_becomes_single_insert() {
        let records = [record("a"), record("b")];
        let rows: Vec<NewTaskLog<'_>> = records.iter().map(NewTaskLog::from).collect();

        let query = diesel::insert_into(task_logs::table).values(&rows);
        let sql = debug_query::<Pg, _>(&query).to_string();

        assert!(sql.starts_with("INSERT INTO \"task_logs\""), "{sql}");
        assert_eq!(sql.matches("VALUES").count(), 1);
        assert!(sql.contains("\"task_name\""));
    }
}
