//! Testing utilities for code built on keel.
//!
//! Migration behavior is only meaningful against a real PostgreSQL server,
//! so database-backed tests opt in explicitly through `TEST_DATABASE_URL`
//! and get a throwaway database per test.

pub mod db;

pub use db::{IsolatedTestDb, TestDatabase, TEST_DATABASE_URL_ENV};
