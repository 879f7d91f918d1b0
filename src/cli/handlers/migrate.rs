//! Migrate command handler
//!
//! Manages the `task_logs` schema used by the postgres log sink.

use diesel::Connection;
use diesel::pg::PgConnection;
use diesel_migrations::MigrationHarness;

use crate::config::settings::Settings;
use crate::db::MIGRATIONS;
use crate::error::{AppError, AppResult};
use crate::worker::run_migrations;

/// Handler for the migrate command
pub struct MigrateCommandHandler {
    config: Settings,
}

impl MigrateCommandHandler {
    pub fn new(config: Settings) -> Self {
        Self { config }
    }

    /// Apply pending migrations, list them (`dry_run`), or revert the last
    /// `rollback` ones.
    ///
    /// The database section is validated here even when the configured log
    /// sink is not postgres.
    pub async fn execute(&self, dry_run: bool, rollback: Option<u32>) -> AppResult<()> {
        if let Some(0) = rollback {
            return Err(AppError::Validation {
                field: "rollback_steps".to_string(),
                reason: "Number of rollback steps must be greater than 0".to_string(),
            });
        }

        self.config.database.validate()?;

        if dry_run {
            return self.show_pending_migrations().await;
        }

        match rollback {
            Some(steps) => self.rollback_migrations(steps).await,
            None => self.apply_migrations().await,
        }
    }

    async fn show_pending_migrations(&self) -> AppResult<()> {
        println!("Checking for pending migrations...");

        let pending = self
            .with_connection("check pending migrations", |conn| {
                conn.pending_migrations(MIGRATIONS)
                    .map(|pending| pending.iter().map(|m| m.name().to_string()).collect::<Vec<_>>())
                    .map_err(|e| anyhow::anyhow!("Migration error: {}", e))
            })
            .await?;

        if pending.is_empty() {
            println!("✓ No pending migrations found - database is up to date");
        } else {
            println!("Found {} pending migration(s):", pending.len());
            for name in &pending {
                println!("  - {}", name);
            }
            println!("\nRun without --dry-run to apply these migrations");
        }

        Ok(())
    }

    async fn apply_migrations(&self) -> AppResult<()> {
        println!("Running database migrations...");

        let applied = run_migrations(self.config.database.url.clone()).await?;

        if applied.is_empty() {
            println!("✓ No migrations to apply - database is already up to date");
        } else {
            println!("✓ Applied {} migration(s):", applied.len());
            for migration in &applied {
                println!("  - {}", migration);
            }
        }

        Ok(())
    }

    async fn rollback_migrations(&self, steps: u32) -> AppResult<()> {
        println!("Rolling back {} migration(s)...", steps);

        let reverted = self
            .with_connection("revert migrations", move |conn| {
                let applied = conn
                    .applied_migrations()
                    .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
                if applied.len() < steps as usize {
                    anyhow::bail!(
                        "Cannot rollback {} migrations - only {} applied",
                        steps,
                        applied.len()
                    );
                }

                let mut reverted = Vec::with_capacity(steps as usize);
                for _ in 0..steps {
                    let version = conn
                        .revert_last_migration(MIGRATIONS)
                        .map_err(|e| anyhow::anyhow!("Migration rollback error: {}", e))?;
                    reverted.push(version.to_string());
                }
                Ok(reverted)
            })
            .await?;

        println!("✓ Rolled back {} migration(s):", reverted.len());
        for version in &reverted {
            println!("  - {}", version);
        }

        Ok(())
    }

    /// Run `f` on a blocking connection to the configured database.
    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> anyhow::Result<T> + Send + 'static,
    {
        let database_url = self.config.database.url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&database_url).map_err(|e| {
                AppError::Database {
                    operation: format!("establish connection to {}", operation),
                    source: anyhow::anyhow!("Connection error: {}", e),
                }
            })?;

            f(&mut conn).map_err(|source| AppError::Database {
                operation: operation.to_string(),
                source,
            })
        })
        .await
        .map_err(|e| AppError::Internal {
            source: anyhow::Error::from(e),
        })?
    }

    pub fn config(&self) -> &Settings {
        &self.config
    }
}
