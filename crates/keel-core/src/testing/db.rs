//! Explicit database provisioning for tests.
//!
//! Database configuration is EXPLICIT: either pass a URL to `from_url()` or
//! opt in through `TEST_DATABASE_URL` with `from_env()`. The `DATABASE_URL`
//! used by the CLI is never read here, so a test run cannot migrate a real
//! database by accident.

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::{KeelError, Result};

/// Environment variable naming the server used for database tests.
pub const TEST_DATABASE_URL_ENV: &str = "TEST_DATABASE_URL";

/// Explicit database access for tests.
///
/// ```ignore
/// let Some(server) = TestDatabase::from_env_if_set().await? else {
///     return Ok(()); // no database configured, skip
/// };
/// let db = server.isolated("migrate_twice").await?;
/// ```
pub struct TestDatabase {
    pool: PgPool,
    url: String,
}

impl TestDatabase {
    /// Connect to the database at the given URL.
    pub async fn from_url(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(url)
            .await
            .map_err(KeelError::Sql)?;

        Ok(Self {
            pool,
            url: url.to_string(),
        })
    }

    /// Connect using `TEST_DATABASE_URL`, failing if it is unset.
    pub async fn from_env() -> Result<Self> {
        let url = std::env::var(TEST_DATABASE_URL_ENV).map_err(|_| {
            KeelError::Config(format!(
                "{} not set. Set it explicitly for database tests.",
                TEST_DATABASE_URL_ENV
            ))
        })?;
        Self::from_url(&url).await
    }

    /// Connect using `TEST_DATABASE_URL`, or `None` when it is unset.
    pub async fn from_env_if_set() -> Result<Option<Self>> {
        match std::env::var(TEST_DATABASE_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::from_url(&url).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the database URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Creates a dedicated database for a single test.
    ///
    /// Each call creates a new database with a unique name, so tests that
    /// create tracker tables never see each other's state.
    pub async fn isolated(&self, test_name: &str) -> Result<IsolatedTestDb> {
        // UUID suffix prevents collisions when tests run in parallel
        let db_name = format!(
            "keel_test_{}_{}",
            sanitize_db_name(test_name),
            uuid::Uuid::new_v4().simple()
        );

        sqlx::query(&format!("CREATE DATABASE \"{}\"", db_name))
            .execute(&self.pool)
            .await
            .map_err(KeelError::Sql)?;

        let url = replace_db_name(&self.url, &db_name);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(KeelError::Sql)?;

        Ok(IsolatedTestDb {
            pool,
            url,
            db_name,
            base_url: self.url.clone(),
        })
    }
}

/// A test database that exists for the lifetime of a single test.
pub struct IsolatedTestDb {
    pool: PgPool,
    url: String,
    db_name: String,
    base_url: String,
}

impl IsolatedTestDb {
    /// Get the connection pool for this isolated database.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connection URL of this isolated database.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get the database name.
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    /// Run raw SQL to set up test data or schema.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(KeelError::Sql)?;
        Ok(())
    }

    /// Count the rows of `table`.
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .map_err(KeelError::Sql)?;
        Ok(count)
    }

    /// Whether a table named `table` exists in the public schema.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = 'public' AND table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await
        .map_err(KeelError::Sql)?;
        Ok(exists)
    }

    /// Drop the test database.
    pub async fn cleanup(self) -> Result<()> {
        self.pool.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
            .map_err(KeelError::Sql)?;

        let _ = sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1",
        )
        .bind(&self.db_name)
        .execute(&pool)
        .await;

        sqlx::query(&format!("DROP DATABASE IF EXISTS \"{}\"", self.db_name))
            .execute(&pool)
            .await
            .map_err(KeelError::Sql)?;

        Ok(())
    }
}

/// Sanitize a test name for use in a database name.
fn sanitize_db_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .take(24)
        .collect()
}

/// Replace the database name in a connection URL.
fn replace_db_name(url: &str, new_db: &str) -> String {
    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
    let (head, rest) = url.split_at(scheme_end);
    let (path, query) = match rest.find('?') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };

    match path.find('/') {
        Some(i) => format!("{}{}/{}{}", head, &path[..i], new_db, query),
        None => format!("{}{}/{}{}", head, path, new_db, query),
    }
}
