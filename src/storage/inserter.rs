//! Declarative single-row inserts.
//!
//! Sub-stores describe a fact row as a list of column/value pairs and let
//! [`RowInserter`] build and execute the parameterized INSERT. Column order
//! is irrelevant to the resulting row; the builder simply binds values in
//! declaration order.

use std::fmt;

use sqlx::{Sqlite, Transaction};

/// A value bound into an INSERT. Covers the attribute types the star schema
/// uses: integers (ids, sizes, timestamps), text, and NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str(""),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// Builder for one parameterized `INSERT INTO <table> (…) VALUES (…)`.
pub struct RowInserter {
    table: &'static str,
    columns: Vec<(&'static str, SqlValue)>,
}

impl RowInserter {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: &'static str, value: impl Into<SqlValue>) -> Self {
        self.columns.push((name, value.into()));
        self
    }

    /// Executes the insert and returns the new row id.
    pub async fn insert(self, tx: &mut Transaction<'_, Sqlite>) -> Result<i64, sqlx::Error> {
        let names: Vec<&str> = self.columns.iter().map(|(name, _)| *name).collect();
        let placeholders = vec!["?"; names.len()].join(",");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table,
            names.join(","),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in self.columns {
            query = match value {
                SqlValue::Null => query.bind(Option::<i64>::None),
                SqlValue::Int(i) => query.bind(i),
                SqlValue::Text(s) => query.bind(s),
            };
        }

        let result = query.execute(&mut **tx).await?;
        Ok(result.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::create_test_pool;
    use sqlx::Row;

    #[tokio::test]
    async fn insert_returns_rowid_and_binds_nulls() {
        let pool = create_test_pool().await;
        let mut tx = pool.begin().await.unwrap();

        let id = RowInserter::new("url_visits")
            .column("url", "https://example.com")
            .column("last_visit", Option::<i64>::None)
            .insert(&mut tx)
            .await
            .unwrap();
        assert!(id > 0);

        let second = RowInserter::new("url_visits")
            .column("url", "https://example.org")
            .column("last_visit", 1700000000i64)
            .insert(&mut tx)
            .await
            .unwrap();
        assert_eq!(second, id + 1);

        let row = sqlx::query("SELECT url, last_visit FROM url_visits WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("url"), "https://example.com");
        assert_eq!(row.get::<Option<i64>, _>("last_visit"), None);

        tx.commit().await.unwrap();
    }
}
