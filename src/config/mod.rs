//! Configuration management module for cronfleet
//!
//! Layered configuration loading with support for:
//! - TOML configuration files
//! - Environment variable overrides
//! - Per-deployment environment files (development, test, production, ...)
//!
//! # Configuration Priority (lowest to highest)
//! 1. `default.toml` - Base default configuration
//! 2. `{environment}.toml` - Environment-specific configuration
//! 3. `local.toml` - Local overrides (not committed to version control)
//! 4. `CRONFLEET_*` environment variables

pub mod error;
pub mod loader;
pub mod settings;
pub mod validation;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use settings::{
    CoordinationBackend, CoordinationConfig, DatabaseConfig, LogSinkBackend, LogSinkConfig,
    Settings, TaskSeed, WorkerConfig,
};
