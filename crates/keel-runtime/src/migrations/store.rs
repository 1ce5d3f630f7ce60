use std::collections::HashSet;

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::{Connection, Executor, Postgres};
use tracing::debug;

use keel_core::error::{KeelError, Result};

use super::changeset::ChangeSet;
use super::phase::MigrationPhase;
use super::tracker::{AppliedRecord, Tracker};
use crate::db::Database;

/// How the record step treats a name that is already in the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    /// Insert; an existing name is a [`KeelError::Conflict`].
    Strict,
    /// Insert unless present. Used by force mode, which re-applies names
    /// that are already recorded.
    IfAbsent,
}

/// Storage the migrator runs against: the tracker plus somewhere to execute
/// change-sets.
pub trait MigrationStore: Send {
    /// Block until no other run holds the migration lock.
    fn acquire_lock(&mut self) -> BoxFuture<'_, Result<()>>;

    fn release_lock(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Create the tracker if absent. Succeeds if it already exists.
    fn ensure_tracker_exists(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Snapshot of applied names.
    fn load_applied(&mut self) -> BoxFuture<'_, Result<HashSet<String>>>;

    fn list_applied(&mut self) -> BoxFuture<'_, Result<Vec<AppliedRecord>>>;

    /// Execute `change_set` and record it, as one unit of work.
    ///
    /// Called with `phase` at [`MigrationPhase::Executing`]; the store moves
    /// it to [`MigrationPhase::Recording`] once the statements succeed.
    /// Statement failures are reported as [`KeelError::Execution`] naming
    /// the change-set, and nothing is recorded.
    ///
    /// The change-set runs inside a transaction the store opens. A file
    /// that issues its own top-level `COMMIT` or `ROLLBACK` ends that
    /// transaction early; such a change-set is rejected as an execution
    /// failure and not recorded, but whatever it committed stays.
    fn apply<'a>(
        &'a mut self,
        change_set: &'a ChangeSet,
        mode: RecordMode,
        phase: &'a mut MigrationPhase,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Custom setting `PgStore` pins for the length of one apply transaction.
const APPLY_MARKER: &str = "keel.applying";

/// [`MigrationStore`] over one dedicated PostgreSQL connection.
///
/// The advisory lock is session scoped, so lock, apply and unlock all go
/// through the same checked-out connection.
pub struct PgStore {
    conn: PoolConnection<Postgres>,
    tracker: Tracker,
}

impl PgStore {
    /// Check out a connection from `db` for a migration run.
    pub async fn new(db: &Database, table: &str) -> Result<Self> {
        let tracker = Tracker::new(table)?;
        let conn = db.acquire().await?;
        Ok(Self { conn, tracker })
    }

    async fn apply_in_tx(
        &mut self,
        change_set: &ChangeSet,
        mode: RecordMode,
        phase: &mut MigrationPhase,
    ) -> Result<()> {
        let name = change_set.name.as_str();
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|e| KeelError::execution(name, e))?;

        // Transaction-local marker, cleared if the script ends the transaction
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(APPLY_MARKER)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| KeelError::execution(name, e))?;

        // The whole file goes over the simple query protocol, unsplit
        (&mut *tx)
            .execute(sqlx::raw_sql(&change_set.sql))
            .await
            .map_err(|e| KeelError::execution(name, e))?;

        let marker: Option<String> = sqlx::query_scalar("SELECT current_setting($1, true)")
            .bind(APPLY_MARKER)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| KeelError::execution(name, e))?;
        if marker.as_deref() != Some(name) {
            return Err(KeelError::execution(
                name,
                "change-set ended the surrounding transaction (top-level COMMIT or ROLLBACK); \
                 it was not recorded",
            ));
        }

        phase.advance(MigrationPhase::Recording)?;
        match mode {
            RecordMode::Strict => self.tracker.record_applied(&mut tx, name).await?,
            RecordMode::IfAbsent => self.tracker.record_applied_if_absent(&mut tx, name).await?,
        }

        tx.commit()
            .await
            .map_err(|e| KeelError::execution(name, e))?;
        Ok(())
    }
}

impl MigrationStore for PgStore {
    fn acquire_lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let key = self.tracker.lock_key();
            debug!(key, "Acquiring migration lock...");
            sqlx::query("SELECT pg_advisory_lock($1)")
                .bind(key)
                .execute(&mut *self.conn)
                .await
                .map_err(|e| {
                    KeelError::Schema(format!("Failed to acquire migration lock: {}", e))
                })?;
            debug!("Migration lock acquired");
            Ok(())
        })
    }

    fn release_lock(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.tracker.lock_key())
                .execute(&mut *self.conn)
                .await
                .map_err(|e| {
                    KeelError::Schema(format!("Failed to release migration lock: {}", e))
                })?;
            debug!("Migration lock released");
            Ok(())
        })
    }

    fn ensure_tracker_exists(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.tracker.ensure_exists(&mut self.conn).await })
    }

    fn load_applied(&mut self) -> BoxFuture<'_, Result<HashSet<String>>> {
        Box::pin(async move { self.tracker.load_applied(&mut self.conn).await })
    }

    fn list_applied(&mut self) -> BoxFuture<'_, Result<Vec<AppliedRecord>>> {
        Box::pin(async move { self.tracker.list_applied(&mut self.conn).await })
    }

    fn apply<'a>(
        &'a mut self,
        change_set: &'a ChangeSet,
        mode: RecordMode,
        phase: &'a mut MigrationPhase,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.apply_in_tx(change_set, mode, phase))
    }
}
