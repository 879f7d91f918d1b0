//! Configuration validation logic
//!
//! This module provides validation methods for all configuration structures
//! to ensure configuration values are within acceptable ranges and formats.

use crate::config::error::ConfigError;
use crate::config::settings::{
    CoordinationBackend, CoordinationConfig, DatabaseConfig, LogSinkBackend, LogSinkConfig, LoggerSettings, Settings,
    TaskSeed, WorkerConfig,
};

/// Valid log levels
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl WorkerConfig {
    /// Validate scheduling engine configuration
    ///
    /// # Validation Rules
    /// - Shell path must not be empty
    /// - Channel size must be greater than 0
    /// - Idle delay must be greater than 0
    /// - Node id, when set, must not be blank
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shell_path.trim().is_empty() {
            return Err(ConfigError::validation(
                "worker.shell_path",
                "Shell path is required to run task commands.",
            ));
        }

        if self.channel_size == 0 {
            return Err(ConfigError::validation(
                "worker.channel_size",
                "Channel size must be greater than 0.",
            ));
        }

        if self.idle_delay_ms == 0 {
            return Err(ConfigError::validation(
                "worker.idle_delay_ms",
                "Idle delay must be greater than 0 milliseconds.",
            ));
        }

        if matches!(&self.node_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::validation(
                "worker.node_id",
                "Node id cannot be blank. Remove it to detect the local address.",
            ));
        }

        Ok(())
    }
}

impl CoordinationConfig {
    /// Validate coordination store connection, namespaces and lease timings
    ///
    /// # Validation Rules
    /// - The etcd backend needs at least one non-blank endpoint
    /// - Dial timeout must be greater than 0
    /// - Every prefix must be non-empty and end with `/`
    /// - No prefix may contain another one
    /// - Lease TTLs must be greater than 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == CoordinationBackend::Etcd {
            if self.endpoints.is_empty() {
                return Err(ConfigError::MissingEndpoints);
            }
            if self.endpoints.iter().any(|e| e.trim().is_empty()) {
                return Err(ConfigError::validation(
                    "coordination.endpoints",
                    "Endpoints cannot be blank.",
                ));
            }
        }

        if self.dial_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "coordination.dial_timeout_ms",
                "Dial timeout must be greater than 0 milliseconds.",
            ));
        }

        let prefixes = [
            ("coordination.task_prefix", &self.task_prefix),
            ("coordination.kill_prefix", &self.kill_prefix),
            ("coordination.lock_prefix", &self.lock_prefix),
            ("coordination.worker_prefix", &self.worker_prefix),
        ];

        for (field, prefix) in &prefixes {
            if prefix.is_empty() || !prefix.ends_with('/') {
                return Err(ConfigError::invalid_prefix(
                    field,
                    prefix,
                    "must be non-empty and end with '/'",
                ));
            }
        }

        // a watch on one namespace must not see keys of another
        for (i, (field, prefix)) in prefixes.iter().enumerate() {
            let overlaps = prefixes
                .iter()
                .enumerate()
                .any(|(j, (_, other))| i != j && other.starts_with(prefix.as_str()));
            if overlaps {
                return Err(ConfigError::invalid_prefix(
                    field,
                    prefix,
                    "overlaps another coordination namespace",
                ));
            }
        }

        if self.lock_lease_ttl == 0 {
            return Err(ConfigError::validation(
                "coordination.lock_lease_ttl",
                "Lock lease TTL must be greater than 0 seconds.",
            ));
        }

        if self.register_lease_ttl == 0 {
            return Err(ConfigError::validation(
                "coordination.register_lease_ttl",
                "Registration lease TTL must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }
}

impl LogSinkConfig {
    /// Validate log batching configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::validation(
                "log_sink.batch_size",
                "Batch size must be greater than 0.",
            ));
        }

        if self.commit_timeout_ms == 0 {
            return Err(ConfigError::validation(
                "log_sink.commit_timeout_ms",
                "Commit timeout must be greater than 0 milliseconds.",
            ));
        }

        if self.channel_size == 0 {
            return Err(ConfigError::validation(
                "log_sink.channel_size",
                "Channel size must be greater than 0.",
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Validation Rules
    /// - URL must not be empty and must use a postgres scheme
    /// - Max connections must be greater than 0
    /// - Min connections must not exceed max connections
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required. Please specify a valid database connection string.",
            ));
        }

        if !self.url.starts_with("postgres://") && !self.url.starts_with("postgresql://") {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected format: postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::ValidationError {
                field: "database.min_connections".to_string(),
                message: format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            });
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Validate logger configuration
    ///
    /// # Validation Rules
    /// - Level must be one of: trace, debug, info, warn, error
    /// - File path must not be empty when file output is enabled
    /// - File format must be one of: full, compact, json
    /// - At least one output must be enabled
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError {
                field: "logger.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if self.file.enabled && self.file.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "Log file path cannot be empty when file output is enabled.",
            ));
        }

        self.file.parse_format()?;

        if !self.console.enabled && !self.file.enabled {
            return Err(ConfigError::validation(
                "logger",
                "At least one output (console or file) must be enabled.",
            ));
        }

        Ok(())
    }
}

impl TaskSeed {
    /// Names become store keys, so they must be non-empty and slash-free.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() || self.name.contains('/') {
            return Err(ConfigError::invalid_task(
                &self.name,
                "name must be non-empty and contain no '/'",
            ));
        }

        if self.shell.trim().is_empty() {
            return Err(ConfigError::invalid_task(&self.name, "command is empty"));
        }

        Ok(())
    }
}

impl Settings {
    /// Validate the complete settings tree
    ///
    /// The database section is only checked when the postgres log sink is selected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker.validate()?;
        self.coordination.validate()?;
        self.log_sink.validate()?;
        if self.log_sink.backend == LogSinkBackend::Postgres {
            self.database.validate()?;
        }
        self.logger.validate()?;

        for (i, task) in self.tasks.iter().enumerate() {
            task.validate()?;
            if self.tasks[..i].iter().any(|t| t.name == task.name) {
                return Err(ConfigError::invalid_task(&task.name, "defined more than once"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::FileSettings;

    fn field_of(err: ConfigError) -> String {
        match err.field() {
            Some(field) => field.to_string(),
            None => panic!("Expected a field error, got {:?}", err),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_worker_empty_shell() {
        let config = WorkerConfig {
            shell_path: "  ".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "worker.shell_path");
    }

    #[test]
    fn test_worker_zero_channel() {
        let config = WorkerConfig {
            channel_size: 0,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "worker.channel_size");
    }

    #[test]
    fn test_worker_blank_node_id() {
        let config = WorkerConfig {
            node_id: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "worker.node_id");
    }

    #[test]
    fn test_prefix_must_end_with_slash() {
        let config = CoordinationConfig {
            lock_prefix: "/cron/lock".to_string(),
            ..Default::default()
        };
        match config.validate() {
            Err(ConfigError::InvalidPrefix { field, prefix, .. }) => {
                assert_eq!(field, "coordination.lock_prefix");
                assert_eq!(prefix, "/cron/lock");
            }
            other => panic!("Expected InvalidPrefix, got {:?}", other),
        }
    }

    #[test]
    fn test_prefixes_must_be_distinct() {
        let config = CoordinationConfig {
            kill_prefix: "/cron/task/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "coordination.task_prefix"
        );
    }

    #[test]
    fn test_nested_prefixes_rejected() {
        let config = CoordinationConfig {
            task_prefix: "/cron/".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPrefix { field, .. }) if field == "coordination.task_prefix"
        ));
    }

    #[test]
    fn test_etcd_backend_requires_endpoints() {
        let mut config = CoordinationConfig {
            backend: CoordinationBackend::Etcd,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingEndpoints)));

        config.endpoints = vec![" ".to_string()];
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "coordination.endpoints"
        );

        config.endpoints = vec!["http://127.0.0.1:2379".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_dial_timeout() {
        let config = CoordinationConfig {
            dial_timeout_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "coordination.dial_timeout_ms"
        );
    }

    #[test]
    fn test_zero_lock_ttl() {
        let config = CoordinationConfig {
            lock_lease_ttl: 0,
            ..Default::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "coordination.lock_lease_ttl"
        );
    }

    #[test]
    fn test_log_sink_zero_batch() {
        let config = LogSinkConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert_eq!(field_of(config.validate().unwrap_err()), "log_sink.batch_size");
    }

    #[test]
    fn test_database_only_checked_for_postgres_sink() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());

        settings.log_sink.backend = LogSinkBackend::Postgres;
        assert_eq!(field_of(settings.validate().unwrap_err()), "database.url");

        settings.database.url = "postgres://localhost/cron".to_string();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_database_min_exceeds_max() {
        let config = DatabaseConfig {
            url: "postgres://localhost/cron".to_string(),
            max_connections: 2,
            min_connections: 5,
            ..Default::default()
        };
        assert_eq!(
            field_of(config.validate().unwrap_err()),
            "database.min_connections"
        );
    }

    #[test]
    fn test_task_seeds() {
        let seed = |name: &str| TaskSeed {
            name: name.to_string(),
            shell: "true".to_string(),
            cron_expr: "* * * * *".to_string(),
        };

        let mut settings = Settings::default();
        settings.tasks = vec![seed("a"), seed("b")];
        assert!(settings.validate().is_ok());

        settings.tasks.push(seed("a"));
        match settings.validate() {
            Err(ConfigError::InvalidTask { name, reason }) => {
                assert_eq!(name, "a");
                assert!(reason.contains("more than once"));
            }
            other => panic!("Expected InvalidTask, got {:?}", other),
        }

        settings.tasks = vec![seed("nested/name")];
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidTask { name, .. }) if name == "nested/name"
        ));
    }

    #[test]
    fn test_logger_invalid_level() {
        let settings = LoggerSettings {
            level: "verbose".to_string(),
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger.level");
    }

    #[test]
    fn test_logger_invalid_format() {
        let settings = LoggerSettings {
            file: FileSettings {
                format: "xml".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(field_of(settings.validate().unwrap_err()), "logger.file.format");
    }
}
