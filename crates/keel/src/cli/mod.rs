mod bootstrap;
mod migrate;
mod seed;

pub use bootstrap::BootstrapCommand;
pub use migrate::MigrateCommand;
pub use seed::SeedCommand;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keel_core::config::KeelConfig;

/// keel - versioned SQL migrations and seed data for PostgreSQL
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path. Optional; environment variables are enough.
    #[arg(short, long, default_value = "keel.toml", global = true)]
    pub config: String,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Manage database migrations.
    Migrate(MigrateCommand),

    /// Load seed data.
    Seed(SeedCommand),

    /// Connect, migrate if AUTO_MIGRATE is set, then seed.
    Bootstrap(BootstrapCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.verbose);

        match self.command {
            Commands::Migrate(cmd) => cmd.execute(&self.config).await,
            Commands::Seed(cmd) => cmd.execute(&self.config).await,
            Commands::Bootstrap(cmd) => cmd.execute(&self.config).await,
        }
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .with_target(false)
        .try_init();
}

/// Load `.env`, the optional config file and environment overrides.
pub(crate) fn load_config(path: &str) -> Result<KeelConfig> {
    // Real environment variables take precedence over .env
    dotenvy::dotenv().ok();

    KeelConfig::load(path).with_context(|| format!("Failed to load configuration ({})", path))
}
