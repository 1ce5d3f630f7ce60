//! Directory listing shared by the migration and seed executors.
//!
//! File names are the only sequencing mechanism: they are returned in plain
//! ascending string order, so authors must use fixed-width numeric prefixes
//! (`001_`, `002_`, ...) to get the apply order they intend.

use std::path::Path;

use keel_core::error::{KeelError, Result};
use tracing::{debug, warn};

/// List files in `dir` whose names end with `suffix`, sorted ascending.
///
/// Sub-directories are ignored. An existing but empty directory yields an
/// empty list; a directory that cannot be listed is a
/// [`KeelError::Discovery`].
pub fn discover(dir: &Path, suffix: &str) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        KeelError::Discovery(format!("Failed to read directory {}: {}", dir.display(), e))
    })?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            KeelError::Discovery(format!("Failed to read directory {}: {}", dir.display(), e))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non UTF-8 file name in {}: {:?}", dir.display(), entry.file_name());
            continue;
        };

        if name.ends_with(suffix) && name.len() > suffix.len() {
            names.push(name);
        }
    }

    names.sort();

    debug!("Discovered {} file(s) in {}", names.len(), dir.display());
    Ok(names)
}
