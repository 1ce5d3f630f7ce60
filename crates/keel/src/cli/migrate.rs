use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;

use keel_core::error::KeelError;
use keel_runtime::{Confirm, Database, FixedAnswer, MigrationOutcome, MigrationReport, Migrator};

/// Manage database migrations.
#[derive(Parser)]
pub struct MigrateCommand {
    #[command(subcommand)]
    pub action: MigrateAction,

    /// Migrations directory path (overrides config).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Run all pending migrations.
    Up {
        /// Re-run every migration regardless of history (dangerous!).
        #[arg(long)]
        force: bool,

        /// Skip the confirmation prompt for --force.
        #[arg(short, long, requires = "force")]
        yes: bool,
    },

    /// Roll back the last migration (not implemented).
    Down,

    /// Show applied and pending migrations.
    Status,
}

/// Interactive yes/no prompt on the terminal, defaulting to "no".
struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> keel_core::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(|e| KeelError::InvalidState(format!("confirmation prompt failed: {}", e)))
    }
}

impl MigrateCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let mut config = super::load_config(config_path)?;
        if let Some(dir) = self.migrations_dir {
            config.migrations.dir = dir;
        }

        let db = Database::connect(&config.database).await?;
        let mut migrator = Migrator::connect(&db, &config.migrations).await?;

        println!();
        println!(
            "  {}  {} Migrations",
            style("⚓").bold(),
            style("KEEL").bold().cyan()
        );
        println!();

        match self.action {
            MigrateAction::Up { force: false, .. } => {
                println!("  {} Running pending migrations...", style("→").dim());
                let report = migrator.run().await?;
                print_report(&report);
            }

            MigrateAction::Up { force: true, yes } => {
                println!(
                    "  {} {} This will run all migrations regardless of history!",
                    style("⚠").yellow(),
                    style("FORCE MODE:").bold().yellow()
                );

                let outcome = if yes {
                    migrator.force(&FixedAnswer(true)).await?
                } else {
                    migrator.force(&TerminalConfirm).await?
                };

                match outcome {
                    MigrationOutcome::Completed(report) => print_report(&report),
                    MigrationOutcome::Cancelled => {
                        println!("  {} Migration cancelled.", style("ℹ").blue());
                    }
                }
            }

            MigrateAction::Down => {
                if let Err(e) = migrator.rollback() {
                    println!("  {} Rollback functionality is not implemented.", style("⚠").yellow());
                    println!("  To roll back by hand:");
                    println!("    1. Connect to your database");
                    println!("    2. Run the reverse SQL statements");
                    println!(
                        "    3. Delete the change-set's row from the {} table",
                        style(&config.migrations.table).cyan()
                    );
                    println!();
                    return Err(e.into());
                }
            }

            MigrateAction::Status => {
                let status = migrator.status().await?;

                if status.is_empty() {
                    println!("  {} No migrations found", style("ℹ").blue());
                    return Ok(());
                }

                if !status.applied.is_empty() {
                    println!("  {} Applied:", style("✓").green());
                    for record in &status.applied {
                        println!(
                            "    {} {} ({})",
                            style(&record.name).cyan(),
                            style("at").dim(),
                            record.executed_at.format("%Y-%m-%d %H:%M:%S")
                        );
                    }
                }

                if !status.pending.is_empty() {
                    if !status.applied.is_empty() {
                        println!();
                    }
                    println!("  {} Pending:", style("○").yellow());
                    for name in &status.pending {
                        println!("    {} {}", style("→").dim(), style(name).yellow());
                    }
                }

                if !status.missing.is_empty() {
                    println!();
                    println!("  {} Recorded but no longer on disk:", style("!").red());
                    for name in &status.missing {
                        println!("    {} {}", style("×").dim(), style(name).red());
                    }
                }

                println!();
                println!(
                    "  {} {} applied, {} pending",
                    style("ℹ").blue(),
                    status.applied.len(),
                    status.pending.len()
                );
            }
        }

        println!();
        Ok(())
    }
}

fn print_report(report: &MigrationReport) {
    for name in &report.skipped {
        println!("  {} {} already applied", style("-").dim(), style(name).dim());
    }
    for name in &report.applied {
        println!("  {} Applied {}", style("✓").green(), style(name).cyan());
    }

    if report.is_noop() {
        println!("  {} Database is up to date", style("✓").green());
    } else {
        println!(
            "  {} {} migration(s) applied",
            style("✓").green(),
            report.applied.len()
        );
    }
}
