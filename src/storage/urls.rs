//! Persistent set of known URLs with sampling and visit tracking.
//!
//! Every URL ever offered to the crawler lands in `url_visits` exactly once;
//! the in-memory maps mirror the table and carry the sampleable pool the
//! dispatcher draws from. With resampling disabled (crawl-once), URLs leave
//! the pool when sampled and visited ones are not reloaded on startup.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use rand::Rng;
use sqlx::{Pool, Sqlite};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

use crate::providers::UrlProvider;

#[derive(Error, Debug)]
pub enum UrlStoreError {
    /// Nothing sampleable right now. The dispatcher retries later.
    #[error("store is empty")]
    Empty,

    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Predicate deciding whether a URL is accepted into the store.
pub type UrlFilter = Box<dyn Fn(&Url) -> bool + Send + Sync>;

/// Accepts only URLs whose host sits under the given public suffix.
pub fn only_tld(suffix: &str) -> UrlFilter {
    let suffix = suffix.to_lowercase();
    Box::new(move |u| {
        u.host_str()
            .and_then(crate::domain::public_suffix)
            .map(|s| s == suffix)
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone)]
struct PoolEntry {
    url: Url,
    last_visit: Option<DateTime<Utc>>,
}

/// Strategy for drawing the next URL out of the sampleable pool.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    /// Uniformly at random over the pool.
    Uniform,
    /// Prefer a second visit to hosts that have exactly one visited URL, to
    /// form observation pairs, while penalizing oversampled hosts. Only
    /// unvisited URLs are candidates.
    PairWeighted { weight: u32 },
}

impl Sampler {
    fn sample(&self, pool: &HashMap<String, PoolEntry>) -> Option<String> {
        let mut rng = rand::thread_rng();
        match self {
            Sampler::Uniform => {
                let i = rng.gen_range(0..pool.len());
                pool.keys().nth(i).cloned()
            }
            Sampler::PairWeighted { weight } => {
                let mut domain_count: HashMap<&str, usize> = HashMap::new();
                for entry in pool.values() {
                    let Some(host) = entry.url.host_str() else {
                        continue;
                    };
                    if entry.last_visit.is_some() {
                        *domain_count.entry(host).or_insert(0) += 1;
                    } else {
                        domain_count.entry(host).or_insert(0);
                    }
                }

                let weight = f64::from(*weight);
                let weights: Vec<(&String, f64)> = pool
                    .iter()
                    .filter(|(_, entry)| entry.last_visit.is_none())
                    .map(|(key, entry)| {
                        let count = entry
                            .url
                            .host_str()
                            .and_then(|h| domain_count.get(h).copied())
                            .unwrap_or(0);
                        let base = if count == 1 { weight } else { 1.0 };
                        (key, base / (count + 1) as f64)
                    })
                    .collect();

                let total: f64 = weights.iter().map(|(_, w)| w).sum();
                if total == 0.0 {
                    return None;
                }

                let mut r = rng.gen::<f64>() * total;
                for (key, w) in &weights {
                    r -= w;
                    if r <= 0.0 {
                        return Some((*key).clone());
                    }
                }
                weights.last().map(|(key, _)| (*key).clone())
            }
        }
    }
}

struct Inner {
    /// Every known URL string and its persistent row id.
    known: HashMap<String, i64>,
    /// The sampleable subset.
    pool: HashMap<String, PoolEntry>,
}

pub struct UrlStore {
    db: Arc<Pool<Sqlite>>,
    sampler: Sampler,
    resampling: bool,
    filters: Vec<UrlFilter>,
    inner: RwLock<Inner>,
}

impl UrlStore {
    /// Loads the store from `url_visits`. With resampling disabled, visited
    /// URLs stay known but are not placed in the sampleable pool.
    pub async fn open(
        db: Arc<Pool<Sqlite>>,
        sampler: Sampler,
        resampling: bool,
        filters: Vec<UrlFilter>,
    ) -> Result<Self, UrlStoreError> {
        let rows: Vec<(i64, String, Option<i64>)> =
            sqlx::query_as("SELECT id, url, last_visit FROM url_visits")
                .fetch_all(db.as_ref())
                .await?;

        let mut known = HashMap::with_capacity(rows.len());
        let mut pool = HashMap::new();
        for (id, url_str, last_visit) in rows {
            let url = match Url::parse(&url_str) {
                Ok(url) => url,
                Err(e) => {
                    warn!("skipping unparsable stored url {url_str}: {e}");
                    continue;
                }
            };

            known.insert(url_str.clone(), id);

            let visited = last_visit.map(|secs| Utc.timestamp_opt(secs, 0).single());
            match visited {
                None => {
                    pool.insert(
                        url_str,
                        PoolEntry {
                            url,
                            last_visit: None,
                        },
                    );
                }
                Some(t) if resampling => {
                    pool.insert(url_str, PoolEntry { url, last_visit: t });
                }
                Some(_) => {} // crawl-once: visited URLs never re-enter the pool
            }
        }

        Ok(Self {
            db,
            sampler,
            resampling,
            filters,
            inner: RwLock::new(Inner { known, pool }),
        })
    }

    /// Number of sampleable URLs.
    pub async fn size(&self) -> usize {
        self.inner.read().await.pool.len()
    }

    /// Draws one URL via the configured sampler. With resampling disabled
    /// the sample leaves the pool before it is returned.
    pub async fn sample(&self) -> Result<Url, UrlStoreError> {
        let sampled = {
            let inner = self.inner.read().await;
            if inner.pool.is_empty() {
                return Err(UrlStoreError::Empty);
            }
            self.sampler.sample(&inner.pool)
        };

        let Some(key) = sampled else {
            return Err(UrlStoreError::Empty);
        };

        if self.resampling {
            let inner = self.inner.read().await;
            inner
                .pool
                .get(&key)
                .map(|entry| entry.url.clone())
                .ok_or(UrlStoreError::Empty)
        } else {
            let mut inner = self.inner.write().await;
            inner
                .pool
                .remove(&key)
                .map(|entry| entry.url)
                .ok_or(UrlStoreError::Empty)
        }
    }

    /// Filters, deduplicates, and inserts URLs in one transaction. Returns
    /// how many were newly inserted.
    pub async fn add(
        &self,
        urls: impl IntoIterator<Item = Url>,
    ) -> Result<usize, UrlStoreError> {
        let mut inner = self.inner.write().await;

        let mut to_add: Vec<Url> = Vec::new();
        'urls: for url in urls {
            for filter in &self.filters {
                if !filter(&url) {
                    continue 'urls;
                }
            }

            if inner.known.contains_key(url.as_str()) {
                continue;
            }
            if to_add.iter().any(|u| u.as_str() == url.as_str()) {
                continue;
            }

            to_add.push(url);
        }

        if to_add.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.begin().await?;
        let mut count = 0usize;
        for url in to_add {
            let inserted = sqlx::query("INSERT INTO url_visits (url) VALUES (?)")
                .bind(url.as_str())
                .execute(&mut *tx)
                .await;

            match inserted {
                Ok(result) => {
                    let id = result.last_insert_rowid();
                    inner.known.insert(url.as_str().to_string(), id);
                    inner.pool.insert(
                        url.as_str().to_string(),
                        PoolEntry {
                            url,
                            last_visit: None,
                        },
                    );
                    count += 1;
                }
                Err(e) => {
                    debug!("unable to insert url {url}: {e}");
                }
            }
        }
        tx.commit().await?;

        Ok(count)
    }

    /// Marks a known URL visited at `t` (persisted at second precision).
    pub async fn visit(&self, url: &Url, t: DateTime<Utc>) -> Result<(), UrlStoreError> {
        let mut inner = self.inner.write().await;

        let Some(id) = inner.known.get(url.as_str()).copied() else {
            return Ok(());
        };

        sqlx::query("UPDATE url_visits SET last_visit = ? WHERE id = ?")
            .bind(t.timestamp())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        if self.resampling {
            if let Some(entry) = inner.pool.get_mut(url.as_str()) {
                entry.last_visit = Some(t);
            }
        } else {
            inner.pool.remove(url.as_str());
        }

        Ok(())
    }

    /// Spawns a background task forwarding the provider's URLs into the
    /// store. Provider failures just stop the stream.
    pub fn consume(self: Arc<Self>, provider: impl UrlProvider) {
        let mut urls = provider.into_urls();
        tokio::spawn(async move {
            while let Some(url) = urls.recv().await {
                if let Err(e) = self.add([url]).await {
                    warn!("unable to add provided url: {e}");
                }
            }
        });
    }

    /// Passes through the domains whose HTTP or HTTPS form is not yet known.
    pub async fn filter_known(&self, domains: Vec<String>) -> Vec<String> {
        let inner = self.inner.read().await;
        domains
            .into_iter()
            .filter(|d| {
                !(inner.known.contains_key(&format!("http://{d}/"))
                    && inner.known.contains_key(&format!("https://{d}/")))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::create_test_pool;
    use crate::storage::{init_db_pool_with_path, run_migrations};

    async fn open_store(pool: sqlx::SqlitePool) -> UrlStore {
        UrlStore::open(Arc::new(pool), Sampler::Uniform, true, Vec::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn adding_twice_inserts_once() {
        let pool = create_test_pool().await;
        let store = open_store(pool.clone()).await;

        let url = Url::parse("https://google.com").unwrap();
        assert_eq!(store.add([url.clone()]).await.unwrap(), 1);
        assert_eq!(store.add([url]).await.unwrap(), 0);

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM url_visits")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(store.size().await, 1);
    }

    #[tokio::test]
    async fn filters_reject_before_insert() {
        let pool = create_test_pool().await;
        let store = UrlStore::open(
            Arc::new(pool),
            Sampler::Uniform,
            true,
            vec![only_tld("com")],
        )
        .await
        .unwrap();

        let accepted = store
            .add([
                Url::parse("https://example.com").unwrap(),
                Url::parse("https://example.org").unwrap(),
            ])
            .await
            .unwrap();
        assert_eq!(accepted, 1);
        assert_eq!(store.size().await, 1);
    }

    #[tokio::test]
    async fn restart_preserves_ids_and_visit_times() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");

        let url = Url::parse("https://google.com").unwrap();
        let visited_at = Utc::now();

        let first_id = {
            let pool = init_db_pool_with_path(&db_path).await.unwrap();
            run_migrations(&pool).await.unwrap();
            let store = UrlStore::open(pool.clone(), Sampler::Uniform, true, Vec::new())
                .await
                .unwrap();

            store.add([url.clone()]).await.unwrap();
            store.visit(&url, visited_at).await.unwrap();

            let (id,): (i64,) = sqlx::query_as("SELECT id FROM url_visits WHERE url = ?")
                .bind(url.as_str())
                .fetch_one(pool.as_ref())
                .await
                .unwrap();
            pool.close().await;
            id
        };

        let pool = init_db_pool_with_path(&db_path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = UrlStore::open(pool.clone(), Sampler::Uniform, true, Vec::new())
            .await
            .unwrap();

        let sampled = store.sample().await.unwrap();
        assert_eq!(sampled, url);

        let (id, last_visit): (i64, Option<i64>) =
            sqlx::query_as("SELECT id, last_visit FROM url_visits WHERE url = ?")
                .bind(url.as_str())
                .fetch_one(pool.as_ref())
                .await
                .unwrap();
        assert_eq!(id, first_id);
        assert_eq!(last_visit, Some(visited_at.timestamp()));
    }

    #[tokio::test]
    async fn crawl_once_removes_sampled_urls() {
        let pool = create_test_pool().await;
        let store = UrlStore::open(Arc::new(pool), Sampler::Uniform, false, Vec::new())
            .await
            .unwrap();

        store
            .add([Url::parse("https://example.com").unwrap()])
            .await
            .unwrap();

        store.sample().await.unwrap();
        assert_eq!(store.size().await, 0);
        assert!(matches!(store.sample().await, Err(UrlStoreError::Empty)));
    }

    #[tokio::test]
    async fn crawl_once_startup_skips_visited() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");

        {
            let pool = init_db_pool_with_path(&db_path).await.unwrap();
            run_migrations(&pool).await.unwrap();
            let store = UrlStore::open(pool.clone(), Sampler::Uniform, false, Vec::new())
                .await
                .unwrap();
            store
                .add([
                    Url::parse("https://visited.example").unwrap(),
                    Url::parse("https://fresh.example").unwrap(),
                ])
                .await
                .unwrap();
            store
                .visit(&Url::parse("https://visited.example").unwrap(), Utc::now())
                .await
                .unwrap();
            pool.close().await;
        }

        let pool = init_db_pool_with_path(&db_path).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = UrlStore::open(pool, Sampler::Uniform, false, Vec::new())
            .await
            .unwrap();

        assert_eq!(store.size().await, 1);
        assert_eq!(
            store.sample().await.unwrap(),
            Url::parse("https://fresh.example").unwrap()
        );
    }

    #[tokio::test]
    async fn empty_store_reports_empty() {
        let pool = create_test_pool().await;
        let store = open_store(pool).await;
        assert!(matches!(store.sample().await, Err(UrlStoreError::Empty)));
    }

    #[tokio::test]
    async fn filter_known_passes_partially_known_domains() {
        let pool = create_test_pool().await;
        let store = open_store(pool).await;

        store
            .add([
                Url::parse("http://both.example/").unwrap(),
                Url::parse("https://both.example/").unwrap(),
                Url::parse("http://half.example/").unwrap(),
            ])
            .await
            .unwrap();

        let out = store
            .filter_known(vec![
                "both.example".into(),
                "half.example".into(),
                "new.example".into(),
            ])
            .await;
        assert_eq!(out, vec!["half.example".to_string(), "new.example".to_string()]);
    }

    #[test]
    fn pair_sampler_prefers_hosts_with_one_visit() {
        let mut pool = HashMap::new();
        // one.example has exactly one visited URL, so its unvisited URL is
        // boosted; crowd.example has three visited URLs.
        pool.insert(
            "https://one.example/visited".to_string(),
            PoolEntry {
                url: Url::parse("https://one.example/visited").unwrap(),
                last_visit: Some(Utc::now()),
            },
        );
        pool.insert(
            "https://one.example/fresh".to_string(),
            PoolEntry {
                url: Url::parse("https://one.example/fresh").unwrap(),
                last_visit: None,
            },
        );
        for i in 0..3 {
            pool.insert(
                format!("https://crowd.example/v{i}"),
                PoolEntry {
                    url: Url::parse(&format!("https://crowd.example/v{i}")).unwrap(),
                    last_visit: Some(Utc::now()),
                },
            );
        }
        pool.insert(
            "https://crowd.example/fresh".to_string(),
            PoolEntry {
                url: Url::parse("https://crowd.example/fresh").unwrap(),
                last_visit: None,
            },
        );

        let sampler = Sampler::PairWeighted { weight: 2000 };
        let mut boosted = 0;
        for _ in 0..50 {
            match sampler.sample(&pool).as_deref() {
                Some("https://one.example/fresh") => boosted += 1,
                Some("https://crowd.example/fresh") => {}
                other => panic!("sampled a visited url: {other:?}"),
            }
        }
        // weight 2000/2 vs 1/4 makes the boosted pick all but certain
        assert!(boosted >= 45, "boosted picked only {boosted}/50");
    }

    #[test]
    fn pair_sampler_returns_none_when_all_visited() {
        let mut pool = HashMap::new();
        pool.insert(
            "https://done.example/".to_string(),
            PoolEntry {
                url: Url::parse("https://done.example/").unwrap(),
                last_visit: Some(Utc::now()),
            },
        );
        assert!(Sampler::PairWeighted { weight: 2 }.sample(&pool).is_none());
    }
}
