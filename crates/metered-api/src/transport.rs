//! HTTP transport used to dispatch metered requests

use crate::error::{MeteredError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Outbound GET returning the raw response body
///
/// Implementations perform exactly one round trip per call and never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET for a fully authorized URL
    async fn get(&self, url: &str) -> Result<String>;
}

/// `reqwest`-backed transport with a bounded request timeout
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("metered-api/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(MeteredError::HttpStatus { status, body });
        }

        Ok(response.text().await?)
    }
}
