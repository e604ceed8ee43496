//! Alpha Vantage endpoints over the metered client
//!
//! <https://www.alphavantage.co/documentation/>

use crate::client::MeteredClient;
use crate::error::{MeteredError, Result};
use crate::payload::Table;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER: &str = "Alpha Vantage";

/// Alpha Vantage adapter
#[derive(Debug, Clone)]
pub struct AlphaVantage {
    client: Arc<MeteredClient>,
}

/// Company overview data
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompanyOverview {
    pub symbol: String,
    pub name: String,
    pub exchange: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    pub market_cap: Option<String>,
    #[serde(rename = "PERatio")]
    pub pe_ratio: Option<String>,
    #[serde(rename = "EPS")]
    pub eps: Option<String>,
    #[serde(rename = "SharesOutstanding")]
    pub shares_outstanding: Option<String>,
}

/// One row of `quarterlyEarnings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarterlyEarning {
    pub fiscal_date_ending: String,
    pub reported_date: String,
    #[serde(rename = "reportedEPS")]
    pub reported_eps: String,
    #[serde(rename = "estimatedEPS", default)]
    pub estimated_eps: Option<String>,
}

/// Sum of the last four reported EPS values as of a report date
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailingEps {
    pub reported_date: String,
    pub eps: f64,
}

/// Trailing twelve-month EPS for each report date
///
/// `quarters` is in provider order, newest first. Each output row sums the
/// quarter reported on that date and the three before it; dates without
/// four parseable quarters are skipped.
pub fn trailing_eps(quarters: &[QuarterlyEarning]) -> Vec<TrailingEps> {
    quarters
        .windows(4)
        .filter_map(|window| {
            let eps = window
                .iter()
                .map(|q| q.reported_eps.trim().parse::<f64>().ok())
                .sum::<Option<f64>>()?;
            Some(TrailingEps {
                reported_date: window[0].reported_date.clone(),
                eps,
            })
        })
        .collect()
}

/// Map error notes that Alpha Vantage returns with a 200 status
fn check_body(value: serde_json::Value) -> Result<serde_json::Value> {
    for field in ["Error Message", "Note", "Information"] {
        if let Some(message) = value.get(field) {
            return Err(MeteredError::Provider {
                provider: PROVIDER.to_string(),
                message: message.as_str().unwrap_or_default().to_string(),
            });
        }
    }
    Ok(value)
}

impl AlphaVantage {
    pub fn new(client: Arc<MeteredClient>) -> Self {
        Self { client }
    }

    fn url(params: &[(&str, &str)]) -> Result<String> {
        Ok(Url::parse_with_params(BASE_URL, params)?.into())
    }

    async fn query(&self, params: &[(&str, &str)]) -> Result<serde_json::Value> {
        let url = Self::url(params)?;
        check_body(self.client.fetch_json(&url).await?)
    }

    /// Annual and quarterly earnings
    pub async fn earnings(&self, symbol: &str) -> Result<serde_json::Value> {
        self.query(&[("function", "EARNINGS"), ("symbol", symbol)])
            .await
    }

    /// Quarterly earnings rows, newest first
    pub async fn quarterly_earnings(&self, symbol: &str) -> Result<Vec<QuarterlyEarning>> {
        let mut data = self.earnings(symbol).await?;
        let rows = data
            .get_mut("quarterlyEarnings")
            .map(serde_json::Value::take)
            .ok_or_else(|| MeteredError::Provider {
                provider: PROVIDER.to_string(),
                message: format!("no quarterly earnings for {symbol}"),
            })?;
        serde_json::from_value(rows).map_err(|e| MeteredError::Provider {
            provider: PROVIDER.to_string(),
            message: format!("unexpected earnings shape: {e}"),
        })
    }

    /// Earnings call transcript for a quarter such as `2025Q2`
    pub async fn earnings_call_transcript(
        &self,
        symbol: &str,
        quarter: &str,
    ) -> Result<serde_json::Value> {
        self.query(&[
            ("function", "EARNINGS_CALL_TRANSCRIPT"),
            ("symbol", symbol),
            ("quarter", quarter),
        ])
        .await
    }

    /// Company overview and fundamental data
    pub async fn company_overview(&self, symbol: &str) -> Result<CompanyOverview> {
        let data = self
            .query(&[("function", "OVERVIEW"), ("symbol", symbol)])
            .await?;

        // Unknown symbols come back as an empty object
        if data.as_object().is_none_or(serde_json::Map::is_empty) {
            return Err(MeteredError::Provider {
                provider: PROVIDER.to_string(),
                message: format!("no overview for {symbol}"),
            });
        }

        serde_json::from_value(data).map_err(|e| MeteredError::Provider {
            provider: PROVIDER.to_string(),
            message: format!("unexpected overview shape: {e}"),
        })
    }

    /// Upcoming earnings releases (CSV); `horizon` is `3month`, `6month` or `12month`
    pub async fn earnings_calendar(&self, horizon: &str) -> Result<Table> {
        let url = Self::url(&[("function", "EARNINGS_CALENDAR"), ("horizon", horizon)])?;
        self.client.fetch_table(&url).await
    }
}
