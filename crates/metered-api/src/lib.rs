//! Metered access to rate-limited market data providers
//!
//! Every outbound call to a metered provider goes through a [`MeteredClient`],
//! which:
//!
//! - serves any URL fetched before from a permanent cache
//! - rotates through the provider's API keys in configured order
//! - tracks per-key daily call counts and refuses to dispatch once every key
//!   is at its limit
//! - decodes JSON or CSV bodies as declared by the caller
//!
//! Usage log and cache live in SQLite, one pair of tables per provider.
//!
//! # Example
//!
//! ```rust,no_run
//! use metered_api::{MeteredConfig, PayloadFormat, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() -> metered_api::Result<()> {
//!     let config = MeteredConfig::from_env()?;
//!     let registry = ProviderRegistry::open(&config)?;
//!
//!     let alpha = registry.require("alpha_vantage")?;
//!     let payload = alpha
//!         .fetch(
//!             "https://www.alphavantage.co/query?function=EARNINGS&symbol=IBM",
//!             PayloadFormat::Json,
//!         )
//!         .await?;
//!     println!("{payload:?}");
//!
//!     registry.close()
//! }
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod payload;
pub mod quota;
pub mod registry;
pub mod store;
pub mod transport;

// Re-export main types for convenience
pub use cache::RequestCache;
pub use client::{KeyUsage, MeteredClient};
pub use config::{MeteredConfig, ProviderConfig};
pub use error::{ErrorKind, MeteredError, Result, StoreError};
pub use payload::{Payload, PayloadFormat, Table};
pub use quota::{Clock, FixedClock, KeyQuotaTracker, LocalClock, QuotaReservation};
pub use registry::ProviderRegistry;
pub use store::UsageStore;
pub use transport::{HttpTransport, Transport};
