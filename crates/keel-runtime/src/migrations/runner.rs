//! Applies change-sets from a directory against a [`MigrationStore`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use keel_core::config::MigrationsConfig;
use keel_core::error::{KeelError, Result};

use super::changeset::{validate_sequence, ChangeSet};
use super::phase::MigrationPhase;
use super::store::{MigrationStore, PgStore, RecordMode};
use super::tracker::AppliedRecord;
use crate::db::Database;
use crate::discovery::discover;

/// Asks the operator before a destructive operation.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// A pre-decided answer, for `--yes` and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Change-sets executed by this run, in order.
    pub applied: Vec<String>,
    /// Change-sets found in the tracker and left alone.
    pub skipped: Vec<String>,
}

impl MigrationReport {
    /// Nothing was executed.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Result of a force run, which the operator may decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Completed(MigrationReport),
    Cancelled,
}

/// Applied versus pending change-sets.
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    pub applied: Vec<AppliedRecord>,
    /// On disk but not in the tracker, in apply order.
    pub pending: Vec<String>,
    /// In the tracker but no longer on disk.
    pub missing: Vec<String>,
}

impl MigrationStatus {
    /// Nothing applied, pending or missing.
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty() && self.pending.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyMode {
    Pending,
    Force,
}

/// The migration executor.
///
/// Sequential and fail-fast: change-sets run in ascending name order and the
/// first failure stops the run with an error naming the change-set. Nothing
/// is retried; re-running after fixing the cause picks up where the tracker
/// says the last run stopped.
pub struct Migrator<S> {
    store: S,
    dir: PathBuf,
    suffix: String,
    lock: bool,
    strict_ordering: bool,
}

impl Migrator<PgStore> {
    /// Migrator over a dedicated connection from `db`.
    pub async fn connect(db: &Database, config: &MigrationsConfig) -> Result<Self> {
        let store = PgStore::new(db, &config.table).await?;
        Ok(Self::new(store, config))
    }
}

impl<S: MigrationStore> Migrator<S> {
    pub fn new(store: S, config: &MigrationsConfig) -> Self {
        Self {
            store,
            dir: PathBuf::from(&config.dir),
            suffix: config.suffix.clone(),
            lock: config.lock,
            strict_ordering: config.strict_ordering,
        }
    }

    /// Directory change-sets are read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Apply every change-set that the tracker does not list yet.
    pub async fn run(&mut self) -> Result<MigrationReport> {
        self.locked(ApplyMode::Pending).await
    }

    /// Re-apply every discovered change-set regardless of the tracker.
    ///
    /// Nothing is touched unless `confirm` approves. Names already in the
    /// tracker are not recorded twice.
    pub async fn force(&mut self, confirm: &impl Confirm) -> Result<MigrationOutcome> {
        let names = self.discover()?;
        let prompt = format!(
            "Force mode re-executes all {} change-set(s) in {} regardless of history. \
             This can duplicate schema changes or lose data. Continue?",
            names.len(),
            self.dir.display()
        );

        if !confirm.confirm(&prompt)? {
            info!("Force migration cancelled");
            return Ok(MigrationOutcome::Cancelled);
        }

        warn!("FORCE MODE: re-applying all change-sets regardless of history");
        self.locked(ApplyMode::Force)
            .await
            .map(MigrationOutcome::Completed)
    }

    /// Rolling back is not supported; this never touches the database.
    pub fn rollback(&self) -> Result<()> {
        Err(KeelError::Unsupported(
            "rollback is not implemented. To undo a change-set, run the reverse SQL \
             by hand and delete its row from the tracker table"
                .into(),
        ))
    }

    /// Applied and pending change-sets. Creates the tracker if needed.
    pub async fn status(&mut self) -> Result<MigrationStatus> {
        self.store.ensure_tracker_exists().await?;
        let on_disk = self.discover()?;
        let applied = self.store.list_applied().await?;

        let applied_names: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();
        let on_disk_names: HashSet<&str> = on_disk.iter().map(String::as_str).collect();

        let pending = on_disk
            .iter()
            .filter(|name| !applied_names.contains(name.as_str()))
            .cloned()
            .collect();
        let missing = applied
            .iter()
            .filter(|r| !on_disk_names.contains(r.name.as_str()))
            .map(|r| r.name.clone())
            .collect();

        Ok(MigrationStatus {
            applied,
            pending,
            missing,
        })
    }

    fn discover(&self) -> Result<Vec<String>> {
        let names = discover(&self.dir, &self.suffix)?;
        if self.strict_ordering {
            validate_sequence(&names)?;
        }
        Ok(names)
    }

    async fn locked(&mut self, mode: ApplyMode) -> Result<MigrationReport> {
        if !self.lock {
            return self.apply_all(mode).await;
        }

        self.store.acquire_lock().await?;

        let result = self.apply_all(mode).await;

        // Always release lock, even on error
        if let Err(e) = self.store.release_lock().await {
            warn!("Failed to release migration lock: {}", e);
        }

        result
    }

    async fn apply_all(&mut self, mode: ApplyMode) -> Result<MigrationReport> {
        self.store.ensure_tracker_exists().await?;

        let names = self.discover()?;
        if names.is_empty() {
            info!("No change-sets found in {}", self.dir.display());
            return Ok(MigrationReport::default());
        }

        let applied = match mode {
            ApplyMode::Pending => self.store.load_applied().await?,
            ApplyMode::Force => HashSet::new(),
        };
        debug!("Already applied change-sets: {:?}", applied);

        let record_mode = match mode {
            ApplyMode::Pending => RecordMode::Strict,
            ApplyMode::Force => RecordMode::IfAbsent,
        };

        let mut report = MigrationReport::default();
        for name in names {
            if applied.contains(&name) {
                info!("Change-set {} already applied, skipping", name);
                report.skipped.push(name);
                continue;
            }

            self.apply_one(&name, record_mode).await?;
            report.applied.push(name);
        }

        info!(
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "Migrations complete"
        );
        Ok(report)
    }

    async fn apply_one(&mut self, name: &str, mode: RecordMode) -> Result<()> {
        let mut phase = MigrationPhase::Pending;
        let result = self.drive(name, mode, &mut phase).await;

        if let Err(e) = &result {
            error!(change_set = name, phase = %phase, error = %e, "Change-set failed");
            phase.advance(MigrationPhase::Failed)?;
        }
        result
    }

    async fn drive(&mut self, name: &str, mode: RecordMode, phase: &mut MigrationPhase) -> Result<()> {
        phase.advance(MigrationPhase::Reading)?;
        let change_set =
            ChangeSet::read(&self.dir, name).map_err(|e| KeelError::execution(name, e))?;

        info!("Applying change-set: {}", name);
        phase.advance(MigrationPhase::Executing)?;
        self.store.apply(&change_set, mode, phase).await?;

        phase.advance(MigrationPhase::Applied)?;
        info!("Change-set applied: {}", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    fn config_for(dir: &Path) -> MigrationsConfig {
        MigrationsConfig {
            dir: dir.display().to_string(),
            ..Default::default()
        }
    }

    fn write(dir: &Path, name: &str, sql: &str) {
        fs::write(dir.join(name), sql).unwrap();
    }

    #[tokio::test]
    async fn test_applies_in_ascending_name_order() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "003_c.sql", "SELECT 3;");
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        let report = migrator.run().await.unwrap();

        assert_eq!(report.applied, vec!["001_a.sql", "002_b.sql", "003_c.sql"]);
        assert_eq!(
            store.executed().await,
            vec!["001_a.sql", "002_b.sql", "003_c.sql"]
        );
        assert_eq!(
            store.recorded().await,
            vec!["001_a.sql", "002_b.sql", "003_c.sql"]
        );
    }

    #[tokio::test]
    async fn test_second_run_applies_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));

        let first = migrator.run().await.unwrap();
        assert_eq!(first.applied.len(), 2);

        let second = migrator.run().await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.skipped, vec!["001_a.sql", "002_b.sql"]);
        assert_eq!(store.executed().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_names_change_set() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELEKT broken;");
        write(dir.path(), "003_c.sql", "SELECT 3;");

        let store = MemoryStore::new();
        store.fail_on("002_b.sql").await;
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));

        let err = migrator.run().await.unwrap_err();
        assert_eq!(err.subject(), Some("002_b.sql"));
        assert!(matches!(err, KeelError::Execution { .. }));

        assert_eq!(store.recorded().await, vec!["001_a.sql"]);
        assert_eq!(store.executed().await, vec!["001_a.sql"]);
        assert!(!store.is_locked().await, "lock must be released on failure");
    }

    #[tokio::test]
    async fn test_rerun_after_fix_applies_remaining() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");
        write(dir.path(), "003_c.sql", "SELECT 3;");

        let store = MemoryStore::new();
        store.fail_on("002_b.sql").await;
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        assert!(migrator.run().await.is_err());

        store.clear_failures().await;
        let report = migrator.run().await.unwrap();
        assert_eq!(report.skipped, vec!["001_a.sql"]);
        assert_eq!(report.applied, vec!["002_b.sql", "003_c.sql"]);
    }

    #[tokio::test]
    async fn test_force_with_confirmation_reapplies_everything() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        migrator.run().await.unwrap();

        let outcome = migrator.force(&FixedAnswer(true)).await.unwrap();
        match outcome {
            MigrationOutcome::Completed(report) => {
                assert_eq!(report.applied, vec!["001_a.sql", "002_b.sql"]);
                assert!(report.skipped.is_empty());
            }
            MigrationOutcome::Cancelled => panic!("force was confirmed"),
        }

        assert_eq!(
            store.executed().await,
            vec!["001_a.sql", "002_b.sql", "001_a.sql", "002_b.sql"]
        );
        // Re-applied names are not recorded twice.
        assert_eq!(store.recorded().await, vec!["001_a.sql", "002_b.sql"]);
    }

    #[tokio::test]
    async fn test_force_denied_touches_nothing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        migrator.run().await.unwrap();

        let outcome = migrator.force(&FixedAnswer(false)).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Cancelled);
        assert_eq!(store.executed().await.len(), 2);
        assert_eq!(store.recorded().await, vec!["001_a.sql", "002_b.sql"]);
        assert_eq!(store.lock_count().await, 1);
    }

    #[tokio::test]
    async fn test_empty_directory_creates_tracker_and_does_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));

        let report = migrator.run().await.unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(store.tracker_exists().await);
        assert!(store.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_directory_is_discovery_error() {
        let store = MemoryStore::new();
        let config = MigrationsConfig {
            dir: "/nonexistent/keel/migrations".into(),
            ..Default::default()
        };
        let mut migrator = Migrator::new(store, &config);
        assert!(matches!(
            migrator.run().await,
            Err(KeelError::Discovery(_))
        ));
    }

    #[tokio::test]
    async fn test_fresh_store_gets_tracker_before_any_change_set() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");

        let store = MemoryStore::new();
        assert!(!store.tracker_exists().await);

        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        migrator.run().await.unwrap();

        assert!(store.tracker_exists().await);
        assert_eq!(store.recorded().await, vec!["001_a.sql"]);
    }

    #[tokio::test]
    async fn test_conflict_on_record_is_surfaced() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");

        // Another writer records the name between our snapshot and our insert.
        let store = MemoryStore::new();
        store.record_behind_snapshot("001_a.sql").await;
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));

        let err = migrator.run().await.unwrap_err();
        assert!(matches!(&err, KeelError::Conflict(name) if name == "001_a.sql"));
        assert_eq!(store.recorded().await, vec!["001_a.sql"]);
    }

    #[tokio::test]
    async fn test_lock_held_for_run_unless_disabled() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        migrator.run().await.unwrap();
        assert_eq!(store.lock_count().await, 1);
        assert!(!store.is_locked().await);

        let config = MigrationsConfig {
            lock: false,
            ..config_for(dir.path())
        };
        let unlocked = MemoryStore::new();
        Migrator::new(unlocked.clone(), &config).run().await.unwrap();
        assert_eq!(unlocked.lock_count().await, 0);
    }

    #[tokio::test]
    async fn test_strict_ordering_rejects_unpadded_names() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "2_second.sql", "SELECT 2;");
        write(dir.path(), "10_tenth.sql", "SELECT 10;");

        let config = MigrationsConfig {
            strict_ordering: true,
            ..config_for(dir.path())
        };
        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config);

        assert!(matches!(
            migrator.run().await,
            Err(KeelError::Discovery(_))
        ));
        assert!(store.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_status_lists_pending_and_missing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        migrator.run().await.unwrap();

        write(dir.path(), "002_b.sql", "SELECT 2;");
        fs::remove_file(dir.path().join("001_a.sql")).unwrap();

        let status = migrator.status().await.unwrap();
        assert_eq!(status.applied.len(), 1);
        assert_eq!(status.applied[0].name, "001_a.sql");
        assert_eq!(status.pending, vec!["002_b.sql"]);
        assert_eq!(status.missing, vec!["001_a.sql"]);
    }

    #[tokio::test]
    async fn test_status_with_only_missing_is_not_empty() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");

        let store = MemoryStore::new();
        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        migrator.run().await.unwrap();
        fs::remove_file(dir.path().join("001_a.sql")).unwrap();

        let status = migrator.status().await.unwrap();
        assert!(status.pending.is_empty());
        assert_eq!(status.missing, vec!["001_a.sql"]);
        assert!(!status.is_empty());

        assert!(MigrationStatus::default().is_empty());
    }

    #[tokio::test]
    async fn test_change_set_removed_after_discovery_names_it() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "001_a.sql", "SELECT 1;");
        write(dir.path(), "002_b.sql", "SELECT 2;");

        let store = MemoryStore::new();
        let doomed = dir.path().join("002_b.sql");
        store
            .on_snapshot(move || {
                let _ = std::fs::remove_file(&doomed);
            })
            .await;

        let mut migrator = Migrator::new(store.clone(), &config_for(dir.path()));
        let err = migrator.run().await.unwrap_err();

        assert!(matches!(err, KeelError::Execution { .. }));
        assert_eq!(err.subject(), Some("002_b.sql"));
        assert_eq!(store.executed().await, vec!["001_a.sql"]);
        assert_eq!(store.recorded().await, vec!["001_a.sql"]);
        assert!(!store.is_locked().await);
    }

    #[tokio::test]
    async fn test_rollback_is_unsupported_and_inert() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let migrator = Migrator::new(store.clone(), &config_for(dir.path()));

        assert!(matches!(migrator.rollback(), Err(KeelError::Unsupported(_))));
        assert!(!store.tracker_exists().await);
        assert_eq!(store.lock_count().await, 0);
    }
}
