//! The tracker table: which change-sets have been applied to this database.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use tracing::debug;

use keel_core::config::is_valid_identifier;
use keel_core::error::{KeelError, Result};

/// One row of the tracker table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub name: String,
    pub executed_at: DateTime<Utc>,
}

/// SQL access to the tracker table.
///
/// Methods take a connection rather than a pool so the record step can run
/// inside the same transaction as the change-set's statements.
#[derive(Debug, Clone)]
pub struct Tracker {
    table: String,
}

impl Tracker {
    /// Tracker for `table`, which must be a plain SQL identifier.
    pub fn new(table: &str) -> Result<Self> {
        if !is_valid_identifier(table) {
            return Err(KeelError::Config(format!(
                "Invalid tracker table name: {:?}",
                table
            )));
        }
        Ok(Self {
            table: table.to_string(),
        })
    }

    /// Advisory lock key for runs against this tracker table.
    ///
    /// FNV-1a over the table name, so every process agrees on the key
    /// regardless of build.
    pub fn lock_key(&self) -> i64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in b"keel:".iter().chain(self.table.as_bytes()) {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash as i64
    }

    /// Create the tracker table if it does not exist yet.
    pub async fn ensure_exists(&self, conn: &mut PgConnection) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id SERIAL PRIMARY KEY,
                filename VARCHAR(255) NOT NULL UNIQUE,
                executed_at TIMESTAMP WITH TIME ZONE DEFAULT NOW()
            )
            "#,
            self.table
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            KeelError::Schema(format!("Failed to create {} table: {}", self.table, e))
        })?;
        Ok(())
    }

    /// Snapshot of applied change-set names. No lock is held afterwards.
    pub async fn load_applied(&self, conn: &mut PgConnection) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as(&format!("SELECT filename FROM {}", self.table))
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    KeelError::Schema(format!("Failed to query applied change-sets: {}", e))
                })?;

        debug!("{} change-set(s) already applied", rows.len());
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Every applied record, in the order it was written.
    pub async fn list_applied(&self, conn: &mut PgConnection) -> Result<Vec<AppliedRecord>> {
        let rows: Vec<(String, Option<DateTime<Utc>>)> = sqlx::query_as(&format!(
            "SELECT filename, executed_at FROM {} ORDER BY id ASC",
            self.table
        ))
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| KeelError::Schema(format!("Failed to list applied change-sets: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(name, executed_at)| AppliedRecord {
                name,
                executed_at: executed_at.unwrap_or_default(),
            })
            .collect())
    }

    /// Insert one record. A name that is already present is a
    /// [`KeelError::Conflict`].
    pub async fn record_applied(&self, conn: &mut PgConnection, name: &str) -> Result<()> {
        sqlx::query(&format!("INSERT INTO {} (filename) VALUES ($1)", self.table))
            .bind(name)
            .execute(&mut *conn)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    KeelError::Conflict(name.to_string())
                }
                _ => KeelError::Schema(format!("Failed to record {}: {}", name, e)),
            })?;
        Ok(())
    }

    /// Insert one record unless the name is already present.
    pub async fn record_applied_if_absent(&self, conn: &mut PgConnection, name: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (filename) VALUES ($1) ON CONFLICT (filename) DO NOTHING",
            self.table
        ))
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(|e| KeelError::Schema(format!("Failed to record {}: {}", name, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_rejects_unsafe_table_name() {
        assert!(Tracker::new("migrations").is_ok());
        assert!(matches!(
            Tracker::new("migrations;--"),
            Err(KeelError::Config(_))
        ));
    }

    #[test]
    fn test_lock_key_is_stable_per_table() {
        let a = Tracker::new("migrations").unwrap();
        let b = Tracker::new("migrations").unwrap();
        let c = Tracker::new("schema_history").unwrap();
        assert_eq!(a.lock_key(), b.lock_key());
        assert_ne!(a.lock_key(), c.lock_key());
    }
}
