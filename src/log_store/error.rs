use thiserror::Error;

#[derive(Debug, Error)]
pub enum LogStoreError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    #[error("Log store unavailable: {0}")]
    Unavailable(String),
}
