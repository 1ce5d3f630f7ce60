use anyhow::Result;
use clap::Parser;
use console::style;

use keel_runtime::{Database, Seeder};

/// Load seed data.
#[derive(Parser)]
pub struct SeedCommand {
    /// Seeds directory path (overrides config).
    #[arg(short, long)]
    pub seeds_dir: Option<String>,
}

impl SeedCommand {
    pub async fn execute(self, config_path: &str) -> Result<()> {
        let mut config = super::load_config(config_path)?;
        if let Some(dir) = self.seeds_dir {
            config.migrations.seeds_dir = dir;
        }

        let db = Database::connect(&config.database).await?;
        let seeder = Seeder::new(&db, &config.migrations);

        println!();
        println!("  {} Seeding from {}", style("→").dim(), seeder.dir().display());
        let report = seeder.run().await?;
        println!(
            "  {} {} seed file(s) executed",
            style("✓").green(),
            report.executed.len()
        );
        println!();

        db.close().await;
        Ok(())
    }
}
