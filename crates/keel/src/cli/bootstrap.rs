use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing::info;

use keel_runtime::{Database, Migrator, Seeder};

/// The application's startup sequence: connect, migrate when enabled, then
/// seed. A migration failure is fatal; a seed failure is only a warning.
#[derive(Parser)]
pub struct BootstrapCommand {
    /// Apply pending migrations even if AUTO_MIGRATE is not set.
    #[arg(long)]
    pub migrate: bool,

    /// Do not load seed data.
    #[arg(long)]
    pub skip_seed: bool,
}

impl BootstrapCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let config = super::load_config(config_path)?;
        let db = Database::connect(&config.database)
            .await
            .context("Failed to initialize database")?;

        if config.migrations.auto_migrate || self.migrate {
            info!("Auto-migration enabled, running migrations...");
            let mut migrator = Migrator::connect(&db, &config.migrations).await?;
            let report = migrator
                .run()
                .await
                .context("Failed to run migrations")?;
            println!(
                "  {} {} migration(s) applied, {} already applied",
                style("✓").green(),
                report.applied.len(),
                report.skipped.len()
            );
        } else {
            info!("Auto-migration disabled. Use `keel migrate up` to run migrations manually.");
        }

        if !self.skip_seed {
            match Seeder::new(&db, &config.migrations).run_soft().await {
                Some(report) => println!(
                    "  {} {} seed file(s) executed",
                    style("✓").green(),
                    report.executed.len()
                ),
                None => println!("  {} Seeding failed, continuing", style("⚠").yellow()),
            }
        }

        db.health_check().await?;
        db.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};

    fn parse(args: &[&str]) -> BootstrapCommand {
        match Cli::try_parse_from(args).unwrap().command {
            Commands::Bootstrap(cmd) => cmd,
            _ => panic!("expected bootstrap command"),
        }
    }

    #[test]
    fn test_bootstrap_defaults() {
        let cmd = parse(&["keel", "bootstrap"]);
        assert!(!cmd.migrate);
        assert!(!cmd.skip_seed);
    }

    #[test]
    fn test_bootstrap_flags() {
        let cmd = parse(&["keel", "bootstrap", "--migrate", "--skip-seed"]);
        assert!(cmd.migrate);
        assert!(cmd.skip_seed);
    }
}
