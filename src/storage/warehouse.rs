//! One-transaction-per-page persistence.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{Pool, Sqlite};

use crate::models::Page;

use super::actions::ActionStore;
use super::console::ConsoleStore;
use super::files::{FileStore, ScreenshotStore};
use super::screenshots::ScreenStore;
use super::session::SessionStore;

/// The dimensional store for crawl results.
///
/// `save_session` writes a whole [`Page`] inside a single transaction:
/// observers see either the complete session or nothing. On any error the
/// transaction rolls back and the page counts as unsaved.
pub struct Warehouse {
    pool: Arc<Pool<Sqlite>>,
    sessions: SessionStore,
    actions: ActionStore,
    console: ConsoleStore,
    screens: ScreenStore,
}

impl Warehouse {
    pub fn new(pool: Arc<Pool<Sqlite>>, bodies: FileStore, screenshots: ScreenshotStore) -> Self {
        Self {
            pool,
            sessions: SessionStore::new(),
            actions: ActionStore::new(bodies),
            console: ConsoleStore::new(),
            screens: ScreenStore::new(screenshots),
        }
    }

    /// Persists one page, returning the session row id.
    pub async fn save_session(&self, page: &Page) -> Result<i64> {
        let mut tx = self.pool.begin().await.context("unable to begin transaction")?;

        let session_id = self
            .sessions
            .save(&mut tx, page)
            .await
            .context("unable to save session")?;

        self.actions
            .save(&mut tx, session_id, &page.actions)
            .await
            .context("unable to save actions")?;

        self.console
            .save(&mut tx, session_id, &page.console)
            .await
            .context("unable to save console output")?;

        let domain = page.root_domain();
        self.screens
            .save(&mut tx, session_id, domain.as_deref(), &page.screenshots)
            .await
            .context("unable to save screenshots")?;

        // Dropping the transaction without committing rolls everything back.
        tx.commit().await.context("unable to commit session")?;

        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use sha2::Digest;
    use url::Url;

    use crate::models::{
        CrawlAction, Initiator, InitiatorKind, Resolution, ResponseBody, WireRequest,
        WireResponse,
    };
    use crate::storage::test_helpers::{create_test_pool, table_size};

    fn warehouse_with(pool: sqlx::SqlitePool, dir: &std::path::Path) -> Warehouse {
        Warehouse::new(
            Arc::new(pool),
            FileStore::new(dir.join("bodies")),
            ScreenshotStore::new(dir.join("screenshots")),
        )
    }

    fn action(url: &str, parent: Option<usize>, kind: InitiatorKind) -> CrawlAction {
        let body = b"hello world".to_vec();
        CrawlAction {
            parent,
            initiator: Initiator { kind, stack: None },
            host: None,
            request: WireRequest {
                url: url.into(),
                method: "GET".into(),
                headers: BTreeMap::new(),
                post_data: None,
            },
            response: Some(WireResponse {
                status: 200,
                protocol: Some("http/1.1".into()),
                mime_type: "text/plain".into(),
                headers: BTreeMap::new(),
                security_details: None,
            }),
            error: None,
            body: Some(ResponseBody {
                sha256: format!("{:x}", sha2::Sha256::digest(&body)),
                bytes: body,
            }),
            started_at: 1.0,
        }
    }

    #[tokio::test]
    async fn row_count_matches_action_count() {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bodies")).unwrap();
        let warehouse = warehouse_with(pool.clone(), dir.path());

        let mut page = Page::new(
            Url::parse("http://example.com").unwrap(),
            Resolution::default(),
        );
        page.actions = vec![
            action("http://example.com/", None, InitiatorKind::User),
            action("http://example.com/img", Some(0), InitiatorKind::Parser),
        ];

        let session_id = warehouse.save_session(&page).await.unwrap();
        assert!(session_id > 0);

        let mut tx = pool.begin().await.unwrap();
        assert_eq!(
            table_size(&mut tx, "fact_actions").await,
            page.actions.len() as i64
        );
        assert_eq!(table_size(&mut tx, "fact_sessions").await, 1);
        // identical bodies dedup to one stored file but two fact rows
        assert_eq!(table_size(&mut tx, "fact_bodies").await, 2);
    }

    #[tokio::test]
    async fn sessions_accumulate_across_saves() {
        let pool = create_test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bodies")).unwrap();
        let warehouse = warehouse_with(pool.clone(), dir.path());

        let page = Page::new(
            Url::parse("http://example.com").unwrap(),
            Resolution::default(),
        );
        warehouse.save_session(&page).await.unwrap();
        warehouse.save_session(&page).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        assert_eq!(table_size(&mut tx, "fact_sessions").await, 2);
    }
}
