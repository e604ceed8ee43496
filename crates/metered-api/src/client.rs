//! Metered client: cache, key rotation, dispatch, decode, accounting
//!
//! A fetch runs these steps in order:
//!
//! 1. Cache check. A hit is decoded and returned with no network call, no
//!    quota check and no usage record.
//! 2. Key selection. Keys are tried in configured order and the first one
//!    whose usage today is below the daily limit is used. There is no load
//!    balancing: the next key is only touched once the previous one is spent.
//!    If none qualifies the fetch fails with `QuotaExhausted` before any
//!    network or store write.
//! 3. Dispatch. The key is appended as a query parameter and one GET is sent.
//! 4. Decode in the format the caller declared. A failure aborts the fetch
//!    with nothing written.
//! 5. Record usage for the selected key, then cache the raw body.
//!
//! Errors are returned as they occur; retry and backoff belong to the caller.

use crate::cache::RequestCache;
use crate::config::{ProviderConfig, mask_key};
use crate::error::{MeteredError, Result};
use crate::payload::{Payload, PayloadFormat, Table};
use crate::quota::{Clock, KeyQuotaTracker, LocalClock};
use crate::store::UsageStore;
use crate::transport::Transport;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Today's usage of one configured key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUsage {
    /// Masked key
    pub key: String,
    /// Position in the rotation order
    pub position: usize,
    /// Calls recorded today
    pub used_today: u32,
    /// Provider-wide daily limit
    pub daily_limit: u32,
}

impl KeyUsage {
    /// Calls left today
    pub fn remaining(&self) -> u32 {
        self.daily_limit.saturating_sub(self.used_today)
    }
}

/// Quota-aware client for one provider
pub struct MeteredClient {
    provider: ProviderConfig,
    store: Arc<UsageStore>,
    cache: RequestCache,
    quota: KeyQuotaTracker,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for MeteredClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeteredClient")
            .field("provider", &self.provider)
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

impl MeteredClient {
    /// Create a client over an opened store, using the local clock
    pub fn new(
        provider: ProviderConfig,
        store: Arc<UsageStore>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        Self::with_clock(provider, store, transport, Arc::new(LocalClock))
    }

    /// Create a client with a custom clock
    pub fn with_clock(
        provider: ProviderConfig,
        store: Arc<UsageStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        provider.validate()?;

        if store.provider() != provider.name {
            return Err(MeteredError::Config(format!(
                "store namespace {} does not match provider {}",
                store.provider(),
                provider.name
            )));
        }

        let cache = RequestCache::new(Arc::clone(&store));
        let quota = KeyQuotaTracker::with_clock(Arc::clone(&store), provider.daily_limit, clock);

        Ok(Self {
            provider,
            store,
            cache,
            quota,
            transport,
        })
    }

    /// Provider configuration
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    /// Response cache
    pub fn cache(&self) -> &RequestCache {
        &self.cache
    }

    /// Quota tracker
    pub fn quota(&self) -> &KeyQuotaTracker {
        &self.quota
    }

    /// Fetch `url` (without the key parameter) and decode it as `format`
    pub async fn fetch(&self, url: &str, format: PayloadFormat) -> Result<Payload> {
        let provider = self.provider.name.as_str();

        if let Some(raw) = self.cache.get(url)? {
            return Payload::decode(&raw, format);
        }

        let mut target = Url::parse(url)?;

        let mut selected = None;
        for (position, key) in self.provider.api_keys.iter().enumerate() {
            if let Some(reservation) = self.quota.try_reserve(key)? {
                selected = Some((position, reservation));
                break;
            }
            tracing::debug!(provider, position, "key at daily limit");
        }

        let Some((position, reservation)) = selected else {
            tracing::warn!(
                provider,
                keys = self.provider.api_keys.len(),
                daily_limit = self.provider.daily_limit,
                "all keys exhausted for today"
            );
            return Err(MeteredError::QuotaExhausted {
                provider: provider.to_string(),
                keys: self.provider.api_keys.len(),
                daily_limit: self.provider.daily_limit,
            });
        };

        if position > 0 {
            tracing::info!(provider, position, "rotated to next API key");
        }

        target
            .query_pairs_mut()
            .append_pair(&self.provider.key_param, reservation.api_key());

        tracing::info!(provider, url, %format, "dispatching request");
        let raw = self.transport.get(target.as_str()).await?;

        let payload = Payload::decode(&raw, format)?;

        reservation.commit(url, &raw)?;
        self.cache.put(url, &raw)?;

        Ok(payload)
    }

    /// Fetch a JSON document
    pub async fn fetch_json(&self, url: &str) -> Result<serde_json::Value> {
        self.fetch(url, PayloadFormat::Json).await?.into_json()
    }

    /// Fetch a CSV document
    pub async fn fetch_table(&self, url: &str) -> Result<Table> {
        self.fetch(url, PayloadFormat::Tabular).await?.into_table()
    }

    /// Today's usage for every configured key, in rotation order
    pub fn usage_summary(&self) -> Result<Vec<KeyUsage>> {
        self.provider
            .api_keys
            .iter()
            .enumerate()
            .map(|(position, key)| {
                Ok(KeyUsage {
                    key: mask_key(key),
                    position,
                    used_today: self.quota.usage_today(key)?,
                    daily_limit: self.provider.daily_limit,
                })
            })
            .collect()
    }

    /// Close the underlying store
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::quota::FixedClock;
    use crate::transport::MockTransport;
    use chrono::NaiveDate;

    const EARNINGS_URL: &str = "https://www.alphavantage.co/query?function=EARNINGS&symbol=IBM";
    const EARNINGS_BODY: &str = r#"{"symbol":"IBM","quarterlyEarnings":[{"reportedEPS":"2.43"}]}"#;

    fn provider(limit: u32) -> ProviderConfig {
        ProviderConfig::new(
            "alpha_vantage",
            "apikey",
            vec!["K1".to_string(), "K2".to_string()],
            limit,
        )
    }

    fn client(limit: u32, transport: MockTransport) -> MeteredClient {
        let store = Arc::new(UsageStore::open_in_memory("alpha_vantage").unwrap());
        let clock = FixedClock::new(NaiveDate::from_ymd_opt(2025, 7, 28).unwrap());
        MeteredClient::with_clock(provider(limit), store, Arc::new(transport), Arc::new(clock))
            .unwrap()
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_cache() {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok(EARNINGS_BODY.to_string()));
        let client = client(25, transport);

        let first = client.fetch(EARNINGS_URL, PayloadFormat::Json).await.unwrap();
        let second = client.fetch(EARNINGS_URL, PayloadFormat::Json).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(client.quota().usage_today("K1").unwrap(), 1);
        assert_eq!(client.cache().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_key_is_appended_as_query_param() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(1).returning(|url| {
            assert_eq!(
                url,
                "https://www.alphavantage.co/query?function=EARNINGS&symbol=IBM&apikey=K1"
            );
            Ok(EARNINGS_BODY.to_string())
        });
        let client = client(25, transport);

        client.fetch_json(EARNINGS_URL).await.unwrap();
    }

    #[tokio::test]
    async fn test_rotation_skips_exhausted_key() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(1).returning(|url| {
            assert!(url.ends_with("apikey=K2"));
            Ok(EARNINGS_BODY.to_string())
        });
        let client = client(2, transport);
        client.quota().record_usage("K1", "seed-1", "{}").unwrap();
        client.quota().record_usage("K1", "seed-2", "{}").unwrap();

        client.fetch_json(EARNINGS_URL).await.unwrap();

        assert_eq!(client.quota().usage_today("K1").unwrap(), 2);
        assert_eq!(client.quota().usage_today("K2").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_quota_makes_no_calls() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(0);
        let client = client(1, transport);
        client.quota().record_usage("K1", "seed", "{}").unwrap();
        client.quota().record_usage("K2", "seed", "{}").unwrap();

        let err = client.fetch_json(EARNINGS_URL).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QuotaExhausted);
        assert!(client.cache().is_empty().unwrap());
        assert_eq!(client.quota().usage_today("K1").unwrap(), 1);
        assert_eq!(client.quota().usage_today("K2").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_ignores_quota() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(0);
        let client = client(1, transport);
        client.cache().put(EARNINGS_URL, EARNINGS_BODY).unwrap();
        client.quota().record_usage("K1", "seed", "{}").unwrap();
        client.quota().record_usage("K2", "seed", "{}").unwrap();

        let value = client.fetch_json(EARNINGS_URL).await.unwrap();
        assert_eq!(value["symbol"], "IBM");
    }

    #[tokio::test]
    async fn test_decode_failure_writes_nothing() {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok(r#"{"symbol":"IB"#.to_string()));
        let client = client(25, transport);

        let err = client.fetch_json(EARNINGS_URL).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Decode);
        assert!(client.cache().is_empty().unwrap());
        assert_eq!(client.quota().usage_today("K1").unwrap(), 0);
        assert_eq!(client.quota().in_flight("K1"), 0);
    }

    #[tokio::test]
    async fn test_transport_error_propagates_unchanged() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(1).returning(|_| {
            Err(MeteredError::HttpStatus {
                status: 503,
                body: "unavailable".to_string(),
            })
        });
        let client = client(25, transport);

        let err = client.fetch_json(EARNINGS_URL).await.unwrap_err();

        assert!(matches!(err, MeteredError::HttpStatus { status: 503, .. }));
        assert!(client.cache().is_empty().unwrap());
        assert_eq!(client.quota().usage_today("K1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tabular_fetch() {
        let mut transport = MockTransport::new();
        transport
            .expect_get()
            .times(1)
            .returning(|_| Ok("symbol,reportDate\nIBM,2025-10-22\n".to_string()));
        let client = client(25, transport);

        let table = client
            .fetch_table("https://www.alphavantage.co/query?function=EARNINGS_CALENDAR&horizon=3month")
            .await
            .unwrap();

        assert_eq!(table.get(0, "symbol"), Some("IBM"));
    }

    #[tokio::test]
    async fn test_invalid_url_consumes_nothing() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(0);
        let client = client(25, transport);

        let err = client.fetch_json("not a url").await.unwrap_err();

        assert!(matches!(err, MeteredError::InvalidUrl(_)));
        assert_eq!(client.quota().in_flight("K1"), 0);
    }

    #[tokio::test]
    async fn test_closed_store_is_fatal() {
        let mut transport = MockTransport::new();
        transport.expect_get().times(0);
        let client = client(25, transport);
        client.close().unwrap();

        let err = client.fetch_json(EARNINGS_URL).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn test_usage_summary() {
        let client = client(3, MockTransport::new());
        client.quota().record_usage("K2", "u", "{}").unwrap();

        let summary = client.usage_summary().unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].used_today, 0);
        assert_eq!(summary[1].used_today, 1);
        assert_eq!(summary[1].remaining(), 2);
        assert_eq!(summary[1].key, "****");
    }

    #[test]
    fn test_store_namespace_must_match() {
        let store = Arc::new(UsageStore::open_in_memory("finnhub").unwrap());
        let result = MeteredClient::new(provider(25), store, Arc::new(MockTransport::new()));
        assert!(result.is_err());
    }
}
