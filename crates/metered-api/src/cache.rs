//! Permanent response cache keyed by exact request URL
//!
//! Entries never expire and are never invalidated: a URL fetched once is
//! served from the store forever, trading freshness for quota. URLs are not
//! normalized, so `?a=1&b=2` and `?b=2&a=1` are distinct entries.

use crate::error::Result;
use crate::store::UsageStore;
use std::sync::Arc;

/// Persistent cache of raw provider responses
#[derive(Debug, Clone)]
pub struct RequestCache {
    store: Arc<UsageStore>,
}

impl RequestCache {
    /// Create a cache over a provider store
    pub fn new(store: Arc<UsageStore>) -> Self {
        Self { store }
    }

    /// Get the raw response stored for `url`
    ///
    /// When the URL was stored more than once, the earliest entry wins.
    pub fn get(&self, url: &str) -> Result<Option<String>> {
        let hit = self.store.first_cached(url)?;
        if hit.is_some() {
            tracing::debug!(provider = %self.store.provider(), url, "cache hit");
        } else {
            tracing::debug!(provider = %self.store.provider(), url, "cache miss");
        }
        Ok(hit)
    }

    /// Append a response for `url` without touching existing entries
    pub fn put(&self, url: &str, raw: &str) -> Result<()> {
        self.store.insert_cache(url, raw)
    }

    /// Get the number of cached entries
    pub fn len(&self) -> Result<usize> {
        self.store.cache_len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> RequestCache {
        RequestCache::new(Arc::new(UsageStore::open_in_memory("alpha_vantage").unwrap()))
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = cache();
        let url = "https://www.alphavantage.co/query?function=EARNINGS&symbol=IBM";

        assert!(cache.is_empty().unwrap());
        assert_eq!(cache.get(url).unwrap(), None);

        cache.put(url, r#"{"symbol":"IBM"}"#).unwrap();

        assert_eq!(cache.get(url).unwrap().as_deref(), Some(r#"{"symbol":"IBM"}"#));
        // Repeated reads are stable
        assert_eq!(cache.get(url).unwrap(), cache.get(url).unwrap());
        assert_eq!(cache.len().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_put_keeps_earliest() {
        let cache = cache();
        cache.put("u", "old").unwrap();
        cache.put("u", "new").unwrap();

        assert_eq!(cache.get("u").unwrap().as_deref(), Some("old"));
        assert_eq!(cache.len().unwrap(), 2);
    }

    #[test]
    fn test_no_url_normalization() {
        let cache = cache();
        cache.put("https://x.test/q?a=1&b=2", "ab").unwrap();

        assert_eq!(cache.get("https://x.test/q?b=2&a=1").unwrap(), None);
        assert_eq!(cache.get("https://x.test/q?a=1&b=2 ").unwrap(), None);
    }

    #[test]
    fn test_clones_share_store() {
        let cache = cache();
        let other = cache.clone();
        cache.put("u", "body").unwrap();
        assert_eq!(other.get("u").unwrap().as_deref(), Some("body"));
    }
}
