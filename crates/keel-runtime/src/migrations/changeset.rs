use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;

use keel_core::error::{KeelError, Result};
use tracing::{debug, warn};

use crate::discovery::discover;

/// A single named, ordered unit of schema-altering statements.
///
/// The name is the file name (e.g. `001_create_users_table.sql`) and is what
/// the tracker records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    /// File name, unique within a directory.
    pub name: String,
    /// Statement text as read from disk.
    pub sql: String,
}

impl ChangeSet {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Read the change-set `name` from `dir`.
    pub fn read(dir: &Path, name: &str) -> Result<Self> {
        let sql = std::fs::read_to_string(dir.join(name)).map_err(|e| {
            KeelError::Discovery(format!("Failed to read {}: {}", name, e))
        })?;
        Ok(Self::new(name, sql))
    }
}

impl PartialOrd for ChangeSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ChangeSet {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// Numeric sequence plus description, e.g. `007_add_posts.sql` is
/// sequence 7, width 3, description `add_posts.sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetId {
    pub sequence: u64,
    /// Number of digits in the prefix, including leading zeros.
    pub width: usize,
    pub description: String,
}

impl ChangeSetId {
    /// Parse `<digits>_<description>`. Returns `None` without a prefix.
    pub fn parse(name: &str) -> Option<Self> {
        let width = name.chars().take_while(|c| c.is_ascii_digit()).count();
        if width == 0 {
            return None;
        }

        let (digits, rest) = name.split_at(width);
        let description = rest.strip_prefix('_')?;
        let sequence = digits.parse().ok()?;

        Some(Self {
            sequence,
            width,
            description: description.to_string(),
        })
    }
}

/// Discover and read every change-set in `dir`, in apply order.
pub fn load_change_sets(dir: &Path, suffix: &str) -> Result<Vec<ChangeSet>> {
    let change_sets = discover(dir, suffix)?
        .into_iter()
        .map(|name| ChangeSet::read(dir, &name))
        .collect::<Result<Vec<_>>>()?;

    debug!("Loaded {} change-set(s)", change_sets.len());
    Ok(change_sets)
}

/// Reject names whose string order may not be the intended order.
///
/// Every name needs a `<digits>_` prefix, all prefixes must have the same
/// width (so `10_` cannot sort before `2_`) and no sequence number may repeat.
/// Gaps in the sequence are allowed and only logged.
pub fn validate_sequence(names: &[String]) -> Result<()> {
    let mut seen: HashMap<u64, &str> = HashMap::new();
    let mut width = None;

    for name in names {
        let id = ChangeSetId::parse(name).ok_or_else(|| {
            KeelError::Discovery(format!(
                "'{}' has no numeric prefix (expected e.g. 001_description.sql)",
                name
            ))
        })?;

        match width {
            None => width = Some(id.width),
            Some(w) if w != id.width => {
                return Err(KeelError::Discovery(format!(
                    "'{}' has a {}-digit prefix but earlier change-sets use {} digits",
                    name, id.width, w
                )));
            }
            Some(_) => {}
        }

        if let Some(previous) = seen.insert(id.sequence, name) {
            return Err(KeelError::Discovery(format!(
                "'{}' and '{}' share sequence number {}",
                previous, name, id.sequence
            )));
        }
    }

    for (from, to) in sequence_gaps(names) {
        warn!("Change-set sequence jumps from {} to {}", from, to);
    }

    Ok(())
}

/// Pairs of consecutive sequence numbers that are more than one apart.
pub fn sequence_gaps(names: &[String]) -> Vec<(u64, u64)> {
    let mut sequences: Vec<u64> = names
        .iter()
        .filter_map(|name| ChangeSetId::parse(name))
        .map(|id| id.sequence)
        .collect();
    sequences.sort_unstable();
    sequences.dedup();

    sequences
        .windows(2)
        .filter(|pair| pair[1] > pair[0] + 1)
        .map(|pair| (pair[0], pair[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_change_set_ordering_by_name() {
        let mut sets = vec![
            ChangeSet::new("002_b.sql", ""),
            ChangeSet::new("001_a.sql", ""),
        ];
        sets.sort();
        assert_eq!(sets[0].name, "001_a.sql");
    }

    #[test]
    fn test_parse_id() {
        let id = ChangeSetId::parse("007_add_posts.sql").unwrap();
        assert_eq!(id.sequence, 7);
        assert_eq!(id.width, 3);
        assert_eq!(id.description, "add_posts.sql");

        assert!(ChangeSetId::parse("add_posts.sql").is_none());
        assert!(ChangeSetId::parse("007-add_posts.sql").is_none());
        assert!(ChangeSetId::parse("007").is_none());
    }

    #[test]
    fn test_load_change_sets_reads_text_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("002_second.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("001_first.sql"), "SELECT 1;").unwrap();

        let sets = load_change_sets(dir.path(), ".sql").unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0], ChangeSet::new("001_first.sql", "SELECT 1;"));
        assert_eq!(sets[1].sql, "SELECT 2;");
    }

    #[test]
    fn test_read_missing_change_set() {
        let dir = TempDir::new().unwrap();
        let err = ChangeSet::read(dir.path(), "001_gone.sql").unwrap_err();
        assert!(matches!(err, KeelError::Discovery(msg) if msg.contains("001_gone.sql")));
    }

    #[test]
    fn test_validate_sequence_accepts_padded_prefixes() {
        let list = names(&["001_users.sql", "002_posts.sql", "005_tags.sql"]);
        assert!(validate_sequence(&list).is_ok());
        assert_eq!(sequence_gaps(&list), vec![(2, 5)]);
    }

    #[test]
    fn test_validate_sequence_rejects_mixed_widths() {
        let list = names(&["10_tenth.sql", "2_second.sql"]);
        let err = validate_sequence(&list).unwrap_err();
        assert!(err.to_string().contains("2_second.sql"));
    }

    #[test]
    fn test_validate_sequence_rejects_duplicates() {
        let list = names(&["001_users.sql", "001_users_again.sql"]);
        let err = validate_sequence(&list).unwrap_err();
        assert!(err.to_string().contains("share sequence number 1"));
    }

    #[test]
    fn test_validate_sequence_rejects_missing_prefix() {
        let list = names(&["001_users.sql", "posts.sql"]);
        assert!(matches!(
            validate_sequence(&list),
            Err(KeelError::Discovery(_))
        ));
    }

    #[test]
    fn test_validate_empty_sequence() {
        assert!(validate_sequence(&[]).is_ok());
        assert!(sequence_gaps(&[]).is_empty());
    }
}
