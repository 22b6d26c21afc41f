//! Database migration management.
//!
//! The star-schema DDL lives in `migrations/` and is embedded into the
//! binary at compile time, so distributed binaries migrate without the
//! directory being present next to the executable.

use sqlx::{Pool, Sqlite};

use crate::error_handling::DatabaseError;

/// Runs the embedded migrations. Safe to call on every startup; applied
/// migrations are skipped.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), DatabaseError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DatabaseError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    #[tokio::test]
    async fn migrations_apply_to_fresh_database() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");
        run_migrations(&pool)
            .await
            .expect("Migrations should succeed on fresh database");

        // The star schema is in place.
        let count: i64 =
            sqlx::query_scalar("SELECT count(*) FROM sqlite_master WHERE name = 'fact_sessions'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool");

        run_migrations(&pool).await.expect("first run");
        run_migrations(&pool).await.expect("second run");
    }
}
