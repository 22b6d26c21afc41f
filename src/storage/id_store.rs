//! Insert-or-lookup for dimension tables.
//!
//! Every dimension table pairs an auto-assigned `id` with a unique attribute
//! tuple. [`IdStore::get`] resolves a tuple to its id, inserting the row on
//! first sight. An optional TTL cache short-circuits the SELECT for hot
//! tuples (methods, header keys, mime types repeat constantly); an expired
//! entry merely costs one query and never invalidates the underlying row.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::{Sqlite, Transaction};

use crate::config::ID_CACHE_TTL;

use super::inserter::{RowInserter, SqlValue};

pub struct IdStore {
    table: &'static str,
    columns: &'static [&'static str],
    cache: Option<Mutex<HashMap<String, (i64, Instant)>>>,
    cache_ttl: Duration,
}

impl IdStore {
    /// An id store with the default TTL cache.
    pub fn new(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            cache: Some(Mutex::new(HashMap::new())),
            cache_ttl: ID_CACHE_TTL,
        }
    }

    /// An id store that always queries the database.
    pub fn uncached(table: &'static str, columns: &'static [&'static str]) -> Self {
        Self {
            table,
            columns,
            cache: None,
            cache_ttl: Duration::ZERO,
        }
    }

    /// Returns the id for the attribute tuple, inserting a row when none
    /// exists yet. The number of values must match the key columns.
    pub async fn get(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        values: &[SqlValue],
    ) -> Result<i64, sqlx::Error> {
        debug_assert_eq!(values.len(), self.columns.len());

        let cache_key = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\u{1f}");

        if let Some(cache) = &self.cache {
            let cache = cache.lock().expect("id cache poisoned");
            if let Some((id, cached_at)) = cache.get(&cache_key) {
                if cached_at.elapsed() < self.cache_ttl {
                    return Ok(*id);
                }
            }
        }

        let id = match self.select(tx, values).await? {
            Some(id) => id,
            None => self.insert(tx, values).await?,
        };

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().expect("id cache poisoned");
            cache.retain(|_, (_, cached_at)| cached_at.elapsed() < self.cache_ttl);
            cache.insert(cache_key, (id, Instant::now()));
        }

        Ok(id)
    }

    async fn select(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        values: &[SqlValue],
    ) -> Result<Option<i64>, sqlx::Error> {
        let conditions = self
            .columns
            .iter()
            .map(|c| format!("{c} = ?"))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT id FROM {} WHERE {} LIMIT 1", self.table, conditions);

        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in values {
            query = match value {
                SqlValue::Null => query.bind(Option::<i64>::None),
                SqlValue::Int(i) => query.bind(*i),
                SqlValue::Text(s) => query.bind(s.clone()),
            };
        }

        query.fetch_optional(&mut **tx).await
    }

    async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        values: &[SqlValue],
    ) -> Result<i64, sqlx::Error> {
        let mut inserter = RowInserter::new(self.table);
        for (column, value) in self.columns.iter().zip(values) {
            inserter = inserter.column(column, value.clone());
        }
        inserter.insert(tx).await
    }
}
