//! Configuration loader for cronfleet
//!
//! This module provides the `ConfigLoader` struct that handles loading
//! configuration from multiple sources with proper precedence.

use std::path::{Path, PathBuf};

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};

use crate::config::error::ConfigError;
use crate::config::settings::Settings;

/// Environment variable for configuration directory
const CONFIG_DIR_ENV: &str = "CRONFLEET_CONFIG_DIR";

/// Environment variable for specific configuration file
const CONFIG_FILE_ENV: &str = "CRONFLEET_CONFIG_FILE";

/// Environment variable selecting the `{environment}.toml` layer
pub const APP_ENV_VAR: &str = "CRONFLEET_APP_ENV";

/// Default configuration directory
const DEFAULT_CONFIG_DIR: &str = "config";

/// Environment used when `CRONFLEET_APP_ENV` is unset
const DEFAULT_ENVIRONMENT: &str = "development";

/// Environment variable prefix for configuration overrides
const ENV_PREFIX: &str = "CRONFLEET";

/// Separator for nested configuration keys in environment variables
const ENV_SEPARATOR: &str = "__";

/// Configuration loader that handles layered configuration loading
///
/// Sources, in order of priority:
/// 1. `default.toml` (required)
/// 2. `{environment}.toml` (optional)
/// 3. `local.toml` (optional)
/// 4. `CRONFLEET_*` environment variables (highest priority)
#[derive(Debug)]
pub struct ConfigLoader {
    /// Configuration directory path
    config_dir: PathBuf,
    /// Specific configuration file path (if set, skips layered loading)
    config_file: Option<PathBuf>,
    /// Name of the deployment environment, lowercase
    environment: String,
}

impl ConfigLoader {
    /// Create a new configuration loader from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if both `CRONFLEET_CONFIG_DIR` and `CRONFLEET_CONFIG_FILE`
    /// are set, as they are mutually exclusive.
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = std::env::var(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

        let config_file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);

        if config_file.is_some() && std::env::var(CONFIG_DIR_ENV).is_ok() {
            return Err(ConfigError::ConflictingSources(
                "CRONFLEET_CONFIG_DIR and CRONFLEET_CONFIG_FILE cannot both be set. \
                 Use CRONFLEET_CONFIG_DIR for layered configuration or \
                 CRONFLEET_CONFIG_FILE for a single configuration file."
                    .to_string(),
            ));
        }

        Ok(Self {
            config_dir,
            config_file,
            environment: current_environment(),
        })
    }

    /// Create a loader that reads a single file, as given on the command line
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            config_file: Some(path.into()),
            environment: current_environment(),
        }
    }

    /// Name of the deployment environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Load configuration from all sources and validate it
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `default.toml` (or the single configured file) is not found
    /// - Configuration parsing fails
    /// - Configuration validation fails
    pub fn load(&self) -> Result<Settings, ConfigError> {
        let config = self.build_config()?;
        let settings: Settings = config.try_deserialize().map_err(|e| {
            ConfigError::ParseError(format!("Failed to deserialize configuration: {}", e))
        })?;

        settings.validate()?;

        Ok(settings)
    }

    fn build_config(&self) -> Result<Config, ConfigError> {
        let builder = Config::builder();

        let builder = match self.config_file {
            Some(ref config_file) => Self::add_file_source(builder, config_file, true)?,
            None => self.build_layered_config(builder)?,
        };

        // CRONFLEET_LOG_SINK__BATCH_SIZE -> log_sink.batch_size
        let builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator(ENV_SEPARATOR)
                .ignore_empty(true)
                .try_parsing(true),
        );

        builder.build().map_err(ConfigError::from)
    }

    fn build_layered_config(
        &self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let default_path = self.config_dir.join("default.toml");
        let builder = Self::add_file_source(builder, &default_path, true)?;

        let env_path = self.config_dir.join(format!("{}.toml", self.environment));
        let builder = Self::add_file_source(builder, &env_path, false)?;

        let local_path = self.config_dir.join("local.toml");
        Self::add_file_source(builder, &local_path, false)
    }

    fn add_file_source(
        builder: ConfigBuilder<DefaultState>,
        path: &Path,
        required: bool,
    ) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        if required && !path.exists() {
            return Err(ConfigError::FileNotFound(format!(
                "Required configuration file not found: {}",
                path.display()
            )));
        }

        Ok(builder.add_source(
            File::new(path.to_str().unwrap_or_default(), FileFormat::Toml).required(required),
        ))
    }
}

fn current_environment() -> String {
    std::env::var(APP_ENV_VAR)
        .ok()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Held by every test that loads configuration, since loading reads
/// process-wide environment variables
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LogSinkBackend;
    use std::fs;
    use tempfile::TempDir;

    const DEFAULT_TOML: &str = r#"
[application]
name = "test-worker"

[worker]
node_id = "node-a"
channel_size = 64

[coordination]
lock_lease_ttl = 5

[log_sink]
backend = "memory"
batch_size = 10
commit_timeout_ms = 500

[logger]
level = "info"
"#;

    fn setup_config_dir(files: &[(&str, &str)]) -> TempDir {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        for (name, content) in files {
            fs::write(temp_dir.path().join(name), content).expect("Failed to write config file");
        }
        temp_dir
    }

    /// Restores every touched variable on drop
    struct EnvGuard {
        vars_to_restore: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self {
                vars_to_restore: Vec::new(),
            }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars_to_restore
                .push((key.to_string(), std::env::var(key).ok()));
            unsafe {
                std::env::set_var(key, value);
            }
        }

        fn remove(&mut self, key: &str) {
            self.vars_to_restore
                .push((key.to_string(), std::env::var(key).ok()));
            unsafe {
                std::env::remove_var(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, original_value) in self.vars_to_restore.iter().rev() {
                unsafe {
                    match original_value {
                        Some(value) => std::env::set_var(key, value),
                        None => std::env::remove_var(key),
                    }
                }
            }
        }
    }

    fn layered_env(env: &mut EnvGuard, dir: &TempDir) {
        env.set(CONFIG_DIR_ENV, dir.path().to_str().unwrap());
        env.remove(CONFIG_FILE_ENV);
        env.remove(APP_ENV_VAR);
        env.remove("CRONFLEET_LOG_SINK__BATCH_SIZE");
    }

    #[test]
    fn test_config_loader_new_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();
        env.remove(CONFIG_DIR_ENV);
        env.remove(CONFIG_FILE_ENV);
        env.remove(APP_ENV_VAR);

        let loader = ConfigLoader::new().expect("Should create loader");
        assert_eq!(loader.config_dir, PathBuf::from("config"));
        assert!(loader.config_file.is_none());
        assert_eq!(loader.environment(), "development");
    }

    #[test]
    fn test_config_loader_conflicting_sources_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();
        env.set(CONFIG_DIR_ENV, "/custom/config");
        env.set(CONFIG_FILE_ENV, "/path/to/config.toml");

        match ConfigLoader::new() {
            Err(ConfigError::ConflictingSources(msg)) => {
                assert!(msg.contains(CONFIG_DIR_ENV));
                assert!(msg.contains(CONFIG_FILE_ENV));
            }
            other => panic!("Expected ConflictingSources, got {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_default_toml() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();
        let temp_dir = setup_config_dir(&[]);
        layered_env(&mut env, &temp_dir);

        let loader = ConfigLoader::new().expect("Should create loader");
        match loader.load() {
            Err(ConfigError::FileNotFound(msg)) => assert!(msg.contains("default.toml")),
            other => panic!("Expected FileNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_default_toml_only() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();
        let temp_dir = setup_config_dir(&[("default.toml", DEFAULT_TOML)]);
        layered_env(&mut env, &temp_dir);

        let settings = ConfigLoader::new().unwrap().load().expect("Should load settings");

        assert_eq!(settings.application.name, "test-worker");
        assert_eq!(settings.worker.node_id.as_deref(), Some("node-a"));
        assert_eq!(settings.worker.channel_size, 64);
        assert_eq!(settings.log_sink.backend, LogSinkBackend::Memory);
        assert_eq!(settings.log_sink.batch_size, 10);
        // Untouched keys keep their defaults
        assert_eq!(settings.coordination.task_prefix, "/cron/task/");
        assert_eq!(settings.worker.shell_path, "/bin/sh");
    }

    #[test]
    fn test_load_full_precedence_chain() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();

        let production = r#"
[log_sink]
batch_size = 200
commit_timeout_ms = 2000

[worker]
channel_size = 128
"#;
        let local = r#"
[log_sink]
batch_size = 300
"#;
        let temp_dir = setup_config_dir(&[
            ("default.toml", DEFAULT_TOML),
            ("production.toml", production),
            ("local.toml", local),
        ]);
        layered_env(&mut env, &temp_dir);
        env.set(APP_ENV_VAR, "Production");
        env.set("CRONFLEET_WORKER__JITTER_MAX_MS", "250");

        let settings = ConfigLoader::new().unwrap().load().expect("Should load settings");

        // environment variable beats every file
        assert_eq!(settings.worker.jitter_max_ms, 250);
        // local.toml beats production.toml
        assert_eq!(settings.log_sink.batch_size, 300);
        // production.toml beats default.toml
        assert_eq!(settings.log_sink.commit_timeout_ms, 2000);
        assert_eq!(settings.worker.channel_size, 128);
        // default.toml provides the base
        assert_eq!(settings.application.name, "test-worker");

        env.remove("CRONFLEET_WORKER__JITTER_MAX_MS");
    }

    #[test]
    fn test_load_single_file_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();
        env.remove("CRONFLEET_LOG_SINK__BATCH_SIZE");

        let temp_dir = setup_config_dir(&[("worker.toml", DEFAULT_TOML)]);
        let loader = ConfigLoader::from_file(temp_dir.path().join("worker.toml"));
        let settings = loader.load().expect("Should load settings");

        assert_eq!(settings.application.name, "test-worker");
        assert_eq!(settings.log_sink.commit_timeout_ms, 500);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        let mut env = EnvGuard::new();
        let temp_dir = setup_config_dir(&[("default.toml", DEFAULT_TOML)]);
        layered_env(&mut env, &temp_dir);
        env.set("CRONFLEET_LOG_SINK__BATCH_SIZE", "0");

        match ConfigLoader::new().unwrap().load() {
            Err(ConfigError::ValidationError { field, .. }) => {
                assert_eq!(field, "log_sink.batch_size")
            }
            other => panic!("Expected ValidationError, got {:?}", other),
        }
    }
}
