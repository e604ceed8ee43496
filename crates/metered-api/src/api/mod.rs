//! Provider adapters: URL builders for specific endpoints
//!
//! Adapters own endpoint semantics and any retry policy; every request goes
//! through a [`MeteredClient`](crate::MeteredClient).

pub mod alpha_vantage;
pub mod finnhub;
pub mod fiscal_ai;

pub use alpha_vantage::{AlphaVantage, CompanyOverview, QuarterlyEarning, TrailingEps, trailing_eps};
pub use finnhub::{EarningsRelease, Filing, Finnhub, NewsArticle};
pub use fiscal_ai::FiscalAi;
