//! Screenshot fact rows.

use anyhow::{Context, Result};
use log::warn;
use sqlx::{Sqlite, Transaction};

use crate::models::BrowserScreenshot;

use super::files::ScreenshotStore;
use super::inserter::RowInserter;
use super::session::timestamp_nanos;

/// Writes screenshot files through the [`ScreenshotStore`] and records one
/// `fact_screenshots` row per image.
pub(crate) struct ScreenStore {
    files: ScreenshotStore,
}

impl ScreenStore {
    pub(crate) fn new(files: ScreenshotStore) -> Self {
        Self { files }
    }

    pub(crate) async fn save(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        session_id: i64,
        domain: Option<&str>,
        screenshots: &[BrowserScreenshot],
    ) -> Result<()> {
        if screenshots.is_empty() {
            return Ok(());
        }

        let Some(domain) = domain.filter(|d| !d.trim().is_empty()) else {
            warn!("session {session_id} has screenshots but no domain, skipping");
            return Ok(());
        };

        for shot in screenshots {
            let path = self
                .files
                .store(shot, domain)
                .context("unable to write screenshot")?;

            RowInserter::new("fact_screenshots")
                .column("session_id", session_id)
                .column("time_taken", timestamp_nanos(shot.taken))
                .column("path", path.to_string_lossy().to_string())
                .insert(tx)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::Row;

    use crate::models::Resolution;
    use crate::storage::test_helpers::{create_test_pool, table_size};

    fn shot() -> BrowserScreenshot {
        BrowserScreenshot {
            data: vec![0x89, b'P', b'N', b'G'],
            taken: Utc::now(),
            resolution: Resolution::new(800, 600),
            kind: "png".into(),
        }
    }

    #[tokio::test]
    async fn writes_file_and_fact_row() {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenStore::new(ScreenshotStore::new(dir.path()));

        let mut tx = pool.begin().await.unwrap();
        store
            .save(&mut tx, 1, Some("example.com"), &[shot()])
            .await
            .unwrap();

        assert_eq!(table_size(&mut tx, "fact_screenshots").await, 1);

        let row = sqlx::query("SELECT session_id, time_taken, path FROM fact_screenshots")
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("session_id"), 1);
        assert!(row.get::<i64, _>("time_taken") > 0);
        assert!(row.get::<String, _>("path").contains("example.com"));

        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn missing_domain_skips_without_error() {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let store = ScreenStore::new(ScreenshotStore::new(dir.path()));

        let mut tx = pool.begin().await.unwrap();
        store.save(&mut tx, 1, None, &[shot()]).await.unwrap();
        assert_eq!(table_size(&mut tx, "fact_screenshots").await, 0);
        tx.commit().await.unwrap();
    }
}
