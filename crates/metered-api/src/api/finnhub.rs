//! Finnhub endpoints over the metered client
//!
//! <https://finnhub.io/docs/api/>

use crate::client::MeteredClient;
use crate::error::{MeteredError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER: &str = "Finnhub";

/// Finnhub adapter
#[derive(Debug, Clone)]
pub struct Finnhub {
    client: Arc<MeteredClient>,
}

/// One entry of the earnings calendar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsRelease {
    pub symbol: String,
    pub date: String,
    /// `bmo`, `amc` or `dmh`
    #[serde(default)]
    pub hour: String,
    pub quarter: Option<u8>,
    pub year: Option<i32>,
    pub eps_actual: Option<f64>,
    pub eps_estimate: Option<f64>,
    pub revenue_actual: Option<f64>,
    pub revenue_estimate: Option<f64>,
}

impl EarningsRelease {
    /// `(actual - estimate) / actual` for EPS
    pub fn eps_surprise(&self) -> Option<f64> {
        surprise(self.eps_actual?, self.eps_estimate?)
    }

    /// `(actual - estimate) / actual` for revenue
    pub fn revenue_surprise(&self) -> Option<f64> {
        surprise(self.revenue_actual?, self.revenue_estimate?)
    }
}

fn surprise(actual: f64, estimate: f64) -> Option<f64> {
    (actual != 0.0).then(|| (actual - estimate) / actual)
}

/// Finnhub news article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsArticle {
    /// Article category
    pub category: String,
    /// Publish time (UNIX timestamp)
    pub datetime: i64,
    /// News headline
    pub headline: String,
    /// Unique article ID
    pub id: i64,
    /// Related symbols
    pub related: String,
    /// News source
    pub source: String,
    /// Article summary
    pub summary: String,
    /// Article URL
    pub url: String,
}

/// SEC filing listed by Finnhub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filing {
    pub access_number: String,
    pub symbol: String,
    #[serde(default)]
    pub cik: String,
    /// Form type such as `10-K` or `8-K`
    pub form: String,
    pub filed_date: String,
    #[serde(default)]
    pub accepted_date: String,
    #[serde(default)]
    pub report_url: String,
    #[serde(default)]
    pub filing_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EarningsCalendar {
    #[serde(default)]
    earnings_calendar: Vec<EarningsRelease>,
}

fn check_body(value: serde_json::Value) -> Result<serde_json::Value> {
    if let Some(message) = value.get("error") {
        return Err(MeteredError::Provider {
            provider: PROVIDER.to_string(),
            message: message.as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(value)
}

fn shape_error(e: &serde_json::Error) -> MeteredError {
    MeteredError::Provider {
        provider: PROVIDER.to_string(),
        message: format!("unexpected response shape: {e}"),
    }
}

impl Finnhub {
    pub fn new(client: Arc<MeteredClient>) -> Self {
        Self { client }
    }

    fn url(path: &str, params: &[(&str, &str)]) -> Result<String> {
        Ok(Url::parse_with_params(&format!("{BASE_URL}{path}"), params)?.into())
    }

    async fn query(&self, path: &str, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let url = Self::url(path, params)?;
        check_body(self.client.fetch_json(&url).await?)
    }

    /// Earnings releases between two `YYYY-MM-DD` dates
    pub async fn earnings_calendar(&self, from: &str, to: &str) -> Result<Vec<EarningsRelease>> {
        let data = self
            .query("/calendar/earnings", &[("from", from), ("to", to)])
            .await?;
        let calendar: EarningsCalendar =
            serde_json::from_value(data).map_err(|e| shape_error(&e))?;
        Ok(calendar.earnings_calendar)
    }

    /// Company profile
    pub async fn company_profile(&self, symbol: &str) -> Result<serde_json::Value> {
        self.query("/stock/profile2", &[("symbol", symbol)]).await
    }

    /// Company news between two `YYYY-MM-DD` dates
    pub async fn company_news(&self, symbol: &str, from: &str, to: &str) -> Result<Vec<NewsArticle>> {
        let data = self
            .query(
                "/company-news",
                &[("symbol", symbol), ("from", from), ("to", to)],
            )
            .await?;
        serde_json::from_value(data).map_err(|e| shape_error(&e))
    }

    /// SEC filings filed between two `YYYY-MM-DD` dates
    pub async fn filings(&self, symbol: &str, from: &str, to: &str) -> Result<Vec<Filing>> {
        let data = self
            .query(
                "/stock/filings",
                &[("symbol", symbol), ("from", from), ("to", to)],
            )
            .await?;
        serde_json::from_value(data).map_err(|e| shape_error(&e))
    }
}
