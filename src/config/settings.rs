//! Configuration settings structures for cronfleet
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "cronfleet".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_shell_path() -> String {
    "/bin/sh".to_string()
}

fn default_channel_size() -> usize {
    1000
}

fn default_jitter_max_ms() -> u64 {
    1000
}

fn default_idle_delay_ms() -> u64 {
    1000
}

fn default_task_prefix() -> String {
    "/cron/task/".to_string()
}

fn default_kill_prefix() -> String {
    "/cron/kill/".to_string()
}

fn default_lock_prefix() -> String {
    "/cron/lock/".to_string()
}

fn default_worker_prefix() -> String {
    "/cron/worker/".to_string()
}

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_lock_lease_ttl() -> u64 {
    5
}

fn default_register_lease_ttl() -> u64 {
    10
}

fn default_register_retry_ms() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

fn default_commit_timeout_ms() -> u64 {
    1000
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/cronfleet.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Worker Configuration
// ============================================================================

/// Scheduling engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Identity registered under the worker namespace.
    /// Falls back to the first non-loopback IPv4 address when unset.
    #[serde(default)]
    pub node_id: Option<String>,

    /// Shell used to run task commands as `<shell_path> -c <command>`
    #[serde(default = "default_shell_path")]
    pub shell_path: String,

    /// Capacity of the scheduler's event and result queues
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,

    /// Upper bound of the random delay before each lock attempt, in milliseconds
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,

    /// Scheduler wake-up delay when no task is planned, in milliseconds
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
}

impl WorkerConfig {
    pub fn jitter_max(&self) -> Duration {
        Duration::from_millis(self.jitter_max_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            shell_path: default_shell_path(),
            channel_size: default_channel_size(),
            jitter_max_ms: default_jitter_max_ms(),
            idle_delay_ms: default_idle_delay_ms(),
        }
    }
}

// ============================================================================
// Coordination Store Configuration
// ============================================================================

/// Which coordination store the worker talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackend {
    /// In-process store, for a standalone worker
    #[default]
    Memory,
    /// Shared etcd v3 cluster
    Etcd,
}

/// Coordination store connection, key namespaces and lease timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// Store backend
    #[serde(default)]
    pub backend: CoordinationBackend,

    /// etcd endpoints, e.g. `http://127.0.0.1:2379`
    #[serde(default)]
    pub endpoints: Vec<String>,

    /// Connect timeout for the etcd client, in milliseconds
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,

    /// Prefix of task definitions
    #[serde(default = "default_task_prefix")]
    pub task_prefix: String,

    /// Prefix of kill markers
    #[serde(default = "default_kill_prefix")]
    pub kill_prefix: String,

    /// Prefix of per-task lock keys
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,

    /// Prefix of worker registrations
    #[serde(default = "default_worker_prefix")]
    pub worker_prefix: String,

    /// Lease TTL backing a task lock, in seconds
    #[serde(default = "default_lock_lease_ttl")]
    pub lock_lease_ttl: u64,

    /// Lease TTL backing the worker registration, in seconds
    #[serde(default = "default_register_lease_ttl")]
    pub register_lease_ttl: u64,

    /// Delay before re-registering after the registration lease is lost, in milliseconds
    #[serde(default = "default_register_retry_ms")]
    pub register_retry_ms: u64,
}

impl CoordinationConfig {
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn lock_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_lease_ttl)
    }

    pub fn register_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.register_lease_ttl)
    }

    pub fn register_retry(&self) -> Duration {
        Duration::from_millis(self.register_retry_ms)
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: CoordinationBackend::default(),
            endpoints: Vec::new(),
            dial_timeout_ms: default_dial_timeout_ms(),
            task_prefix: default_task_prefix(),
            kill_prefix: default_kill_prefix(),
            lock_prefix: default_lock_prefix(),
            worker_prefix: default_worker_prefix(),
            lock_lease_ttl: default_lock_lease_ttl(),
            register_lease_ttl: default_register_lease_ttl(),
            register_retry_ms: default_register_retry_ms(),
        }
    }
}

// ============================================================================
// Log Sink Configuration
// ============================================================================

/// Where execution log batches are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkBackend {
    /// Emit each record as a structured tracing event
    #[default]
    Tracing,
    /// Batch insert into the `task_logs` table
    Postgres,
    /// Keep batches in memory
    Memory,
}

/// Execution log batching configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSinkConfig {
    /// Log store backend
    #[serde(default)]
    pub backend: LogSinkBackend,

    /// Number of records that triggers an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Inactivity timeout after which a partial batch is flushed, in milliseconds
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,

    /// Capacity of the inbound record queue; records beyond it are dropped
    #[serde(default = "default_channel_size")]
    pub channel_size: usize,
}

impl LogSinkConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self {
            backend: LogSinkBackend::default(),
            batch_size: default_batch_size(),
            commit_timeout_ms: default_commit_timeout_ms(),
            channel_size: default_channel_size(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Diesel database connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Whether to automatically run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

// ============================================================================
// Logger Settings
// ============================================================================

/// Console output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    /// Whether console output is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether to use colored output
    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

/// File output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    /// Whether file output is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Path to the log file
    #[serde(default = "default_log_path")]
    pub path: String,

    /// Whether to append to existing file
    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
        }
    }
}

/// Logger configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console output settings
    #[serde(default)]
    pub console: ConsoleSettings,

    /// File output settings
    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert LoggerSettings to the runtime LoggerConfig
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console_config = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let file_config = self.file.into_file_config()?;

        LoggerConfig::new(console_config, file_config, self.level).map_err(|e| {
            ConfigError::ValidationError {
                field: "logger".to_string(),
                message: e.to_string(),
            }
        })
    }
}

impl FileSettings {
    /// Convert FileSettings to FileConfig
    pub fn into_file_config(self) -> Result<FileConfig, ConfigError> {
        let format = self.parse_format()?;

        FileConfig::new(self.enabled, PathBuf::from(self.path), self.append, format).map_err(
            |e| ConfigError::ValidationError {
                field: "logger.file".to_string(),
                message: e.to_string(),
            },
        )
    }

    /// Parse the format string into LogFormat enum
    pub(crate) fn parse_format(&self) -> Result<LogFormat, ConfigError> {
        self.format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::ValidationError {
                field: "logger.file.format".to_string(),
                message: e.to_string(),
            })
    }
}

// ============================================================================
// Seed Tasks
// ============================================================================

/// Task written into the coordination store at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSeed {
    pub name: String,
    pub shell: String,
    pub cron_expr: String,
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete worker settings
///
/// This structure represents the entire configuration that can be loaded
/// from TOML files and environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application information
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Scheduling engine configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Coordination store namespaces and leases
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Execution log batching
    #[serde(default)]
    pub log_sink: LogSinkConfig,

    /// Database configuration (postgres log sink)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logger configuration
    #[serde(default)]
    pub logger: LoggerSettings,

    /// Tasks to define before the worker starts watching
    #[serde(default)]
    pub tasks: Vec<TaskSeed>,
}
