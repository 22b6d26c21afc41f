//! Shared test helpers for storage module tests.

use sqlx::SqlitePool;

use crate::storage::run_migrations;

/// Creates an in-memory test database pool with migrations applied.
pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create test database pool");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Counts the rows of a table inside a test.
pub async fn table_size(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT count(*) FROM {table}"))
        .fetch_one(&mut **tx)
        .await
        .unwrap_or_else(|e| panic!("unable to count {table}: {e}"))
}
