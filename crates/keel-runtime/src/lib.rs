//! Versioned SQL change-sets and seed files applied to PostgreSQL.
//!
//! The pieces, leaf first: [`discovery`] lists candidate files in a
//! directory, [`migrations::Tracker`] records what has been applied,
//! [`migrations::Migrator`] drives the apply loop and [`seed::Seeder`]
//! loads baseline rows. [`Database`] owns the pool and is passed by
//! reference to everything that needs it.

pub mod db;
pub mod discovery;
pub mod migrations;
pub mod seed;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::Database;
pub use discovery::discover;
pub use migrations::{
    ChangeSet, Confirm, FixedAnswer, MigrationOutcome, MigrationReport, MigrationStatus,
    MigrationStore, Migrator, PgStore,
};
pub use seed::{SeedReport, SeedTarget, Seeder};
