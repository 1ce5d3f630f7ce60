mod database;
mod migrations;

pub use database::DatabaseConfig;
pub use migrations::{is_valid_identifier, MigrationsConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{KeelError, Result};

/// Environment variable holding the connection string.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Environment variable enabling migrations during bootstrap.
pub const AUTO_MIGRATE_ENV: &str = "AUTO_MIGRATE";
/// Environment variable overriding the migrations directory.
pub const MIGRATIONS_DIR_ENV: &str = "KEEL_MIGRATIONS_DIR";
/// Environment variable overriding the seeds directory.
pub const SEEDS_DIR_ENV: &str = "KEEL_SEEDS_DIR";

/// Root configuration for keel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration and seed layout.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

impl KeelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| KeelError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| KeelError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load `path` if it exists, then layer the process environment on top.
    ///
    /// The config file is optional; a deployment can be driven entirely by
    /// `DATABASE_URL` and friends.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(path)?
        } else {
            Self::default()
        };

        config.apply_env_map(&std::env::vars().collect())?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with defaults and the given database URL.
    pub fn default_with_database_url(url: &str) -> Self {
        Self {
            database: DatabaseConfig::with_url(url),
            migrations: MigrationsConfig::default(),
        }
    }

    /// Apply environment overrides. Set variables win over file values.
    pub fn apply_env_map(&mut self, env_map: &HashMap<String, String>) -> Result<()> {
        if let Some(url) = env_map.get(DATABASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.database.url = url.clone();
            }
        }

        if let Some(value) = env_map.get(AUTO_MIGRATE_ENV) {
            self.migrations.auto_migrate = parse_flag(value);
        }

        if let Some(dir) = env_map.get(MIGRATIONS_DIR_ENV) {
            self.migrations.dir = dir.clone();
        }

        if let Some(dir) = env_map.get(SEEDS_DIR_ENV) {
            self.migrations.seeds_dir = dir.clone();
        }

        Ok(())
    }

    /// Check the configuration is usable before anything connects.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(KeelError::Config(format!(
                "{} environment variable is not set",
                DATABASE_URL_ENV
            )));
        }

        if !is_valid_identifier(&self.migrations.table) {
            return Err(KeelError::Config(format!(
                "Invalid tracker table name: {:?}",
                self.migrations.table
            )));
        }

        if self.migrations.suffix.is_empty() {
            return Err(KeelError::Config("File suffix must not be empty".into()));
        }

        if self.database.pool_size == 0 {
            return Err(KeelError::Config("pool_size must be at least 1".into()));
        }

        Ok(())
    }
}

/// Interpret an on/off environment value (`true`, `1`, `yes`).
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

/// Substitute `${VAR}` references with environment values.
fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") else {
        return content.to_string();
    };

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
