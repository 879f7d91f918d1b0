//! CLI module for cronfleet
//!
//! This module provides command-line interface functionality including:
//! - Argument parsing with clap
//! - Layered configuration loading with `--config` and level flag overrides
//! - Command handlers for serve and migrate operations

pub mod handlers;
pub mod parser;
pub mod validation;

pub use parser::{Cli, Commands};

use clap::Parser;

use crate::config::error::ConfigError;
use crate::config::{ConfigLoader, Settings};
use crate::error::AppResult;
use crate::logger::init_logger;
use handlers::{MigrateCommandHandler, ServeCommandHandler};

/// Parse arguments, load configuration, initialize logging and run the
/// selected command. Running without a subcommand is the same as `serve`.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(&cli)?;
    let logger_config = settings
        .logger
        .clone()
        .into_logger_config()?;
    let logger_config = match cli.level_override() {
        Some(level) => logger_config.with_level(level),
        None => logger_config,
    };
    init_logger(logger_config)?;

    execute_command(&cli, settings).await?;
    Ok(())
}

/// Load settings from `--config` or the layered configuration directory and
/// apply the global flag overrides.
pub fn load_settings(cli: &Cli) -> Result<Settings, ConfigError> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::from_file(path),
        None => ConfigLoader::new()?,
    };

    let mut settings = loader.load()?;
    if let Some(level) = cli.level_override() {
        settings.logger.level = level.to_string();
    }
    Ok(settings)
}

/// Dispatch to the handler of the parsed subcommand
pub async fn execute_command(cli: &Cli, settings: Settings) -> AppResult<()> {
    match &cli.command {
        Some(Commands::Serve { dry_run }) => {
            ServeCommandHandler::new(settings).execute(*dry_run).await
        }
        None => ServeCommandHandler::new(settings).execute(false).await,
        Some(Commands::Migrate { dry_run, rollback }) => {
            MigrateCommandHandler::new(settings)
                .execute(*dry_run, *rollback)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::ENV_LOCK;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_settings_from_file_with_verbose() {
        let _guard = ENV_LOCK.lock().unwrap();
        let file = config_file(
            r#"
[worker]
node_id = "node-a"

[logger]
level = "warn"
"#,
        );
        let path = file.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["cronfleet", "--config", path, "--verbose"]).unwrap();
        let settings = load_settings(&cli).unwrap();

        assert_eq!(settings.worker.node_id.as_deref(), Some("node-a"));
        assert_eq!(settings.logger.level, "debug");
    }

    #[test]
    fn test_load_settings_keeps_file_level_without_flags() {
        let _guard = ENV_LOCK.lock().unwrap();
        let file = config_file("[logger]\nlevel = \"warn\"\n");
        let path = file.path().to_str().unwrap();

        let cli = Cli::try_parse_from(["cronfleet", "-c", path, "serve"]).unwrap();
        assert_eq!(load_settings(&cli).unwrap().logger.level, "warn");
    }

    #[tokio::test]
    async fn test_execute_serve_dry_run() {
        let cli = Cli::try_parse_from(["cronfleet", "serve", "--dry-run"]).unwrap();
        assert!(execute_command(&cli, Settings::default()).await.is_ok());
    }
}
