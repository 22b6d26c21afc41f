//! Session fact rows.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

use crate::models::Page;

use super::id_store::IdStore;
use super::inserter::{RowInserter, SqlValue};

/// Nanoseconds since epoch, the unit session timestamps are stored in.
pub(crate) fn timestamp_nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or_default()
}

/// Writes `fact_sessions` rows and owns the resolution dimension.
pub(crate) struct SessionStore {
    resolutions: IdStore,
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        Self {
            resolutions: IdStore::new("dim_resolutions", &["resolution"]),
        }
    }

    pub(crate) async fn save(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        page: &Page,
    ) -> Result<i64, sqlx::Error> {
        let resolution_id = self
            .resolutions
            .get(tx, &[SqlValue::from(page.resolution.clone())])
            .await?;

        RowInserter::new("fact_sessions")
            .column("resolution_id", resolution_id)
            .column("navigated_time", timestamp_nanos(page.navigated_at))
            .column("loaded_time", timestamp_nanos(page.loaded_at))
            .column("terminated_time", timestamp_nanos(page.terminated_at))
            .column("amount_of_actions", page.actions.len() as i64)
            .column("error", page.error.as_ref().map(|e| e.to_string()))
            .insert(tx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;
    use url::Url;

    use crate::models::Resolution;
    use crate::storage::test_helpers::{create_test_pool, table_size};

    #[tokio::test]
    async fn saves_session_with_nanosecond_times() {
        let pool = create_test_pool().await;
        let store = SessionStore::new();

        let page = Page::new(
            Url::parse("http://example.com").unwrap(),
            Resolution::new(800, 600),
        );

        let mut tx = pool.begin().await.unwrap();
        let id = store.save(&mut tx, &page).await.unwrap();
        assert!(id > 0);

        assert_eq!(table_size(&mut tx, "fact_sessions").await, 1);
        assert_eq!(table_size(&mut tx, "dim_resolutions").await, 1);

        let row = sqlx::query("SELECT navigated_time, error FROM fact_sessions WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(
            row.get::<i64, _>("navigated_time"),
            timestamp_nanos(page.navigated_at)
        );
        assert_eq!(row.get::<Option<String>, _>("error"), None);

        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn session_error_is_persisted_as_text() {
        let pool = create_test_pool().await;
        let store = SessionStore::new();

        let mut page = Page::new(
            Url::parse("http://example.com").unwrap(),
            Resolution::default(),
        );
        page.error = Some(crate::error_handling::CrawlError::DomTimeout);

        let mut tx = pool.begin().await.unwrap();
        let id = store.save(&mut tx, &page).await.unwrap();

        let error: Option<String> =
            sqlx::query_scalar("SELECT error FROM fact_sessions WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .unwrap();
        assert_eq!(
            error.as_deref(),
            Some("timeout loading document object model")
        );
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn resolution_dimension_is_reused_across_sessions() {
        let pool = create_test_pool().await;
        let store = SessionStore::new();
        let page = Page::new(
            Url::parse("http://example.com").unwrap(),
            Resolution::default(),
        );

        let mut tx = pool.begin().await.unwrap();
        store.save(&mut tx, &page).await.unwrap();
        store.save(&mut tx, &page).await.unwrap();

        assert_eq!(table_size(&mut tx, "fact_sessions").await, 2);
        assert_eq!(table_size(&mut tx, "dim_resolutions").await, 1);
        tx.commit().await.unwrap();
    }
}
