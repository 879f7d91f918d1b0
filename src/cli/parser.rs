//! CLI argument parsing with clap
//!
//! This module defines the command-line interface structure using clap,
//! including all commands, arguments, and their documentation.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::build;

/// Distributed cron worker
#[derive(Parser, Debug)]
#[command(name = "cronfleet")]
#[command(about = "Distributed cron worker backed by a coordination store")]
#[command(long_about = "
cronfleet runs shell commands on cron schedules. Task definitions live in a
coordination store; every worker plans every task, and a per-task lock makes
sure a single worker runs each fire time. Execution logs are batched into the
configured log sink.

EXAMPLES:
    # Start the worker with default configuration
    cronfleet serve

    # Use custom configuration file
    cronfleet --config /etc/cronfleet/production.toml serve

    # Check configuration and seeded tasks without starting
    cronfleet serve --dry-run

    # Create the task_logs table for the postgres log sink
    cronfleet migrate

    # Preview pending migrations
    cronfleet migrate --dry-run
")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Load this single TOML file instead of the layered configuration
    /// directory. Environment variables still override it.
    ///
    /// Example: --config /etc/cronfleet/production.toml
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Increases log output to debug level. Cannot be used with --quiet.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-error output
    ///
    /// Reduces log output to error level only. Cannot be used with --verbose.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the worker (default)
    ///
    /// Registers the worker, loads and watches task definitions, and fires
    /// due tasks until interrupted with Ctrl+C or SIGTERM.
    ///
    /// Examples:
    ///   cronfleet serve              # Start with defaults
    ///   cronfleet serve --dry-run    # Validate config without starting
    Serve {
        /// Validate configuration and exit
        ///
        /// Checks every configuration section and parses the cron expression
        /// of each seeded task. Returns exit code 0 if valid, non-zero if invalid.
        #[arg(long)]
        dry_run: bool,
    },
    /// Database migration operations
    ///
    /// Manage the schema used by the postgres log sink.
    ///
    /// Examples:
    ///   cronfleet migrate                    # Apply all pending migrations
    ///   cronfleet migrate --dry-run          # Show pending migrations without applying
    ///   cronfleet migrate --rollback 1       # Revert the last migration
    Migrate {
        /// Show pending migrations without applying
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to rollback
        ///
        /// Reverts the specified number of most recent migrations.
        /// Must be between 1 and 100. Cannot be used with --dry-run.
        #[arg(long, value_name = "STEPS", conflicts_with = "dry_run", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },
}

impl Cli {
    /// Log level forced by the global flags, if any
    pub fn level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_help_flag() {
        let err = Cli::try_parse_from(["cronfleet", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["cronfleet", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_default_behavior() {
        let cli = Cli::try_parse_from(["cronfleet"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert_eq!(cli.level_override(), None);
    }

    #[test]
    fn test_serve_dry_run() {
        let cli = Cli::try_parse_from(["cronfleet", "serve", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve { dry_run: true })));
    }

    #[test]
    fn test_migrate_command() {
        let cli = Cli::try_parse_from(["cronfleet", "migrate", "--rollback", "2"]).unwrap();
        match cli.command {
            Some(Commands::Migrate { dry_run, rollback }) => {
                assert!(!dry_run);
                assert_eq!(rollback, Some(2));
            }
            other => panic!("Expected Migrate command, got {:?}", other),
        }
    }

    #[test]
    fn test_migrate_dry_run_conflicts_with_rollback() {
        let err = Cli::try_parse_from(["cronfleet", "migrate", "--dry-run", "--rollback", "1"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_level_flags() {
        let cli = Cli::try_parse_from(["cronfleet", "--verbose"]).unwrap();
        assert_eq!(cli.level_override(), Some("debug"));

        let cli = Cli::try_parse_from(["cronfleet", "-q", "serve"]).unwrap();
        assert_eq!(cli.level_override(), Some("error"));
    }

    #[test]
    fn test_conflicting_verbose_quiet() {
        let err = Cli::try_parse_from(["cronfleet", "--verbose", "--quiet"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
