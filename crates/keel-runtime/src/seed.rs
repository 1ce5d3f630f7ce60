//! Baseline data loading.
//!
//! Seed files are discovered like change-sets but are not tracked: every file
//! runs on every invocation, and idempotence is left to the statements
//! themselves (e.g. `INSERT ... ON CONFLICT (email) DO NOTHING`).

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::{info, warn};

use keel_core::config::MigrationsConfig;
use keel_core::error::{KeelError, Result};

use crate::discovery::discover;

/// Something seed scripts can be executed against.
pub trait SeedTarget: Send + Sync {
    /// Execute the whole script `sql`, read from the seed file `name`.
    /// Failures are [`KeelError::Execution`] naming the file.
    fn execute_script<'a>(&'a self, name: &'a str, sql: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Seed files executed by a run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub executed: Vec<String>,
}

/// The seed executor.
pub struct Seeder<'a, T> {
    target: &'a T,
    dir: PathBuf,
    suffix: String,
}

impl<'a, T: SeedTarget> Seeder<'a, T> {
    pub fn new(target: &'a T, config: &MigrationsConfig) -> Self {
        Self {
            target,
            dir: PathBuf::from(&config.seeds_dir),
            suffix: config.suffix.clone(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Execute every seed file in ascending name order.
    ///
    /// The first failure stops the remaining files and is returned.
    pub async fn run(&self) -> Result<SeedReport> {
        let names = discover(&self.dir, &self.suffix)?;

        let mut report = SeedReport::default();
        for name in names {
            info!("Executing seed file {}", name);

            let sql = std::fs::read_to_string(self.dir.join(&name)).map_err(|e| {
                KeelError::Discovery(format!("Failed to read seed file {}: {}", name, e))
            })?;
            self.target.execute_script(&name, &sql).await?;

            info!("Seed file {} executed successfully", name);
            report.executed.push(name);
        }

        Ok(report)
    }

    /// Like [`Seeder::run`], but a failure is logged as a warning and
    /// swallowed so startup can continue.
    pub async fn run_soft(&self) -> Option<SeedReport> {
        match self.run().await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Failed to seed database: {}", e);
                None
            }
        }
    }
}
