//! SQLite persistence for one provider's usage log and response cache
//!
//! Each provider owns a pair of tables named after it, so several providers can
//! share one database file without sharing quota.

use crate::error::{Result, StoreError};
use chrono::{Local, NaiveDate};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

static NAMESPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("namespace pattern is valid")
});

/// Check that a provider name can be used as a table prefix
pub fn validate_namespace(name: &str) -> std::result::Result<(), StoreError> {
    if NAMESPACE.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidNamespace(name.to_string()))
    }
}

/// Durable store backing both the usage log and the URL cache of one provider
#[derive(Debug)]
pub struct UsageStore {
    provider: String,
    conn: Mutex<Option<Connection>>,
    usage_table: String,
    cache_table: String,
}

impl UsageStore {
    /// Open (creating if needed) the store for `provider` in a database file
    pub fn open(path: impl AsRef<Path>, provider: &str) -> Result<Self> {
        validate_namespace(provider)?;
        let conn = Connection::open(path.as_ref()).map_err(StoreError::from)?;
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(StoreError::from)?;
        conn.execute_batch(
            r"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
            ",
        )
        .map_err(StoreError::from)?;
        Self::init(conn, provider)
    }

    /// Open a private in-memory store
    pub fn open_in_memory(provider: &str) -> Result<Self> {
        validate_namespace(provider)?;
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::init(conn, provider)
    }

    fn init(conn: Connection, provider: &str) -> Result<Self> {
        let usage_table = format!("{provider}_usage");
        let cache_table = format!("{provider}_cache");

        conn.execute_batch(&format!(
            r"
            CREATE TABLE IF NOT EXISTS {usage_table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                api_key TEXT NOT NULL,
                usage_date TEXT NOT NULL,
                url TEXT NOT NULL,
                response TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{usage_table}_key_date
                ON {usage_table}(api_key, usage_date);

            CREATE TABLE IF NOT EXISTS {cache_table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{cache_table}_url
                ON {cache_table}(url);
            "
        ))
        .map_err(StoreError::from)?;

        tracing::debug!(provider, "usage store ready");

        Ok(Self {
            provider: provider.to_string(),
            conn: Mutex::new(Some(conn)),
            usage_table,
            cache_table,
        })
    }

    /// Provider namespace of this store
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Close the underlying connection
    ///
    /// Every later operation fails with [`StoreError::Closed`]. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let Some(conn) = self.lock().take() else {
            return Ok(());
        };
        conn.close()
            .map_err(|(_, e)| StoreError::Sqlite(e))?;
        tracing::debug!(provider = %self.provider, "usage store closed");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let guard = self.lock();
        let conn = guard.as_ref().ok_or_else(|| StoreError::Closed {
            provider: self.provider.clone(),
        })?;
        f(conn).map_err(|e| StoreError::from(e).into())
    }

    /// Number of usage rows for a key on a date
    pub fn count_usage(&self, api_key: &str, date: NaiveDate) -> Result<u32> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE api_key = ?1 AND usage_date = ?2",
            self.usage_table
        );
        self.with_conn(|conn| conn.query_row(&sql, params![api_key, date], |row| row.get(0)))
    }

    /// Append one usage row
    pub fn insert_usage(
        &self,
        api_key: &str,
        date: NaiveDate,
        url: &str,
        response: &str,
    ) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (api_key, usage_date, url, response) VALUES (?1, ?2, ?3, ?4)",
            self.usage_table
        );
        self.with_conn(|conn| conn.execute(&sql, params![api_key, date, url, response]))?;
        Ok(())
    }

    /// Usage counts per key on a date, in key order
    pub fn usage_by_key(&self, date: NaiveDate) -> Result<Vec<(String, u32)>> {
        let sql = format!(
            "SELECT api_key, COUNT(*) FROM {} WHERE usage_date = ?1 GROUP BY api_key ORDER BY api_key",
            self.usage_table
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![date], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>();
            rows
        })
    }

    /// Earliest cached response for an exact URL
    pub fn first_cached(&self, url: &str) -> Result<Option<String>> {
        let sql = format!(
            "SELECT response FROM {} WHERE url = ?1 ORDER BY id ASC LIMIT 1",
            self.cache_table
        );
        self.with_conn(|conn| conn.query_row(&sql, params![url], |row| row.get(0)).optional())
    }

    /// Append one cache row; existing rows for the URL are left alone
    pub fn insert_cache(&self, url: &str, response: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (url, response, created_at) VALUES (?1, ?2, ?3)",
            self.cache_table
        );
        let created_at = Local::now().to_rfc3339();
        self.with_conn(|conn| conn.execute(&sql, params![url, response, created_at]))?;
        Ok(())
    }

    /// Number of cache rows
    pub fn cache_len(&self) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.cache_table);
        let count: i64 = self.with_conn(|conn| conn.query_row(&sql, [], |row| row.get(0)))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MeteredError;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    #[test]
    fn test_namespace_validation() {
        assert!(validate_namespace("alpha_vantage").is_ok());
        assert!(validate_namespace("AlphaVantage2").is_ok());
        assert!(validate_namespace("").is_err());
        assert!(validate_namespace("2fast").is_err());
        assert!(validate_namespace("x; DROP TABLE y").is_err());
        assert!(UsageStore::open_in_memory("bad-name").is_err());
    }

    #[test]
    fn test_usage_counts_by_key_and_date() {
        let store = UsageStore::open_in_memory("alpha_vantage").unwrap();
        store.insert_usage("K1", day(1), "u1", "{}").unwrap();
        store.insert_usage("K1", day(1), "u2", "{}").unwrap();
        store.insert_usage("K1", day(2), "u3", "{}").unwrap();
        store.insert_usage("K2", day(1), "u4", "{}").unwrap();

        assert_eq!(store.count_usage("K1", day(1)).unwrap(), 2);
        assert_eq!(store.count_usage("K1", day(2)).unwrap(), 1);
        assert_eq!(store.count_usage("K3", day(1)).unwrap(), 0);
        assert_eq!(
            store.usage_by_key(day(1)).unwrap(),
            vec![("K1".to_string(), 2), ("K2".to_string(), 1)]
        );
    }

    #[test]
    fn test_first_cached_returns_earliest() {
        let store = UsageStore::open_in_memory("finnhub").unwrap();
        assert_eq!(store.first_cached("u").unwrap(), None);

        store.insert_cache("u", "first").unwrap();
        store.insert_cache("u", "second").unwrap();

        assert_eq!(store.first_cached("u").unwrap().as_deref(), Some("first"));
        assert_eq!(store.cache_len().unwrap(), 2);
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = UsageStore::open_in_memory("fiscal_ai").unwrap();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());

        let err = store.first_cached("u").unwrap_err();
        assert!(matches!(err, MeteredError::Store(StoreError::Closed { .. })));
        assert!(store.insert_usage("K1", day(1), "u", "{}").is_err());
    }

    #[test]
    fn test_providers_share_file_without_sharing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_usage.db");

        let alpha = UsageStore::open(&path, "alpha_vantage").unwrap();
        let finnhub = UsageStore::open(&path, "finnhub").unwrap();
        alpha.insert_usage("shared", day(1), "u", "{}").unwrap();

        assert_eq!(alpha.count_usage("shared", day(1)).unwrap(), 1);
        assert_eq!(finnhub.count_usage("shared", day(1)).unwrap(), 0);
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_usage.db");

        let store = UsageStore::open(&path, "alpha_vantage").unwrap();
        store.insert_cache("u", "body").unwrap();
        store.close().unwrap();

        let store = UsageStore::open(&path, "alpha_vantage").unwrap();
        assert_eq!(store.first_cached("u").unwrap().as_deref(), Some("body"));
    }
}
