use serde::{Deserialize, Serialize};

/// Where change-sets and seed files live and how they are tracked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding migration change-sets.
    #[serde(default = "default_dir")]
    pub dir: String,

    /// Directory holding seed files.
    #[serde(default = "default_seeds_dir")]
    pub seeds_dir: String,

    /// File suffix that marks a file as a change-set or seed file.
    #[serde(default = "default_suffix")]
    pub suffix: String,

    /// Name of the tracker table.
    #[serde(default = "default_table")]
    pub table: String,

    /// Hold a PostgreSQL advisory lock for the duration of a run.
    #[serde(default = "default_true")]
    pub lock: bool,

    /// Reject change-set names whose numeric prefixes would sort ambiguously.
    #[serde(default)]
    pub strict_ordering: bool,

    /// Apply pending migrations during `bootstrap`.
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            seeds_dir: default_seeds_dir(),
            suffix: default_suffix(),
            table: default_table(),
            lock: true,
            strict_ordering: false,
            auto_migrate: false,
        }
    }
}

/// Whether `name` can be spliced into SQL as a bare identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_dir() -> String {
    "migrations".to_string()
}

fn default_seeds_dir() -> String {
    "seeds".to_string()
}

fn default_suffix() -> String {
    ".sql".to_string()
}

fn default_table() -> String {
    "migrations".to_string()
}

fn default_true() -> bool {
    true
}
