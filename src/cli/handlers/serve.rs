//! Serve command handler
//!
//! Runs the worker until a shutdown signal arrives, or validates the
//! configuration and exits when `--dry-run` is given.

use tokio_util::sync::CancellationToken;

use crate::config::settings::{CoordinationBackend, Settings};
use crate::error::AppResult;
use crate::jobs::plan::parse_cron_expr;
use crate::worker::{Worker, shutdown_signal};

/// Handler for the serve command
pub struct ServeCommandHandler {
    config: Settings,
}

impl ServeCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    pub async fn execute(self, dry_run: bool) -> AppResult<()> {
        if dry_run {
            return self.validate_only();
        }

        let worker = Worker::from_settings(self.config).await?;

        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            signal_token.cancel();
        });

        worker.run(shutdown).await
    }

    /// Validate configuration and seeded cron expressions without starting
    pub fn validate_only(&self) -> AppResult<()> {
        self.config.validate()?;
        for seed in &self.config.tasks {
            parse_cron_expr(&seed.cron_expr)?;
        }

        let worker = &self.config.worker;
        println!("✓ Configuration is valid");
        println!(
            "✓ Node id: {}",
            worker.node_id.as_deref().unwrap_or("<first non-loopback IPv4>")
        );
        println!("✓ Shell: {}", worker.shell_path);
        let coordination = &self.config.coordination;
        match coordination.backend {
            CoordinationBackend::Memory => println!("✓ Coordination: in-process store"),
            CoordinationBackend::Etcd => {
                println!("✓ Coordination: etcd at {}", coordination.endpoints.join(", "))
            }
        }
        println!("✓ Log sink: {:?}", self.config.log_sink.backend);
        println!("✓ Seeded tasks: {}", self.config.tasks.len());
        for seed in &self.config.tasks {
            println!("  - {} [{}] {}", seed.name, seed.cron_expr, seed.shell);
        }

        println!("Dry run completed successfully - configuration is ready for deployment");
        Ok(())
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}
