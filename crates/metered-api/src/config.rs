//! Configuration for metered provider access

use crate::error::{MeteredError, Result};
use crate::store::validate_namespace;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Alpha Vantage provider name
pub const ALPHA_VANTAGE: &str = "alpha_vantage";
/// Finnhub provider name
pub const FINNHUB: &str = "finnhub";
/// Fiscal.ai provider name
pub const FISCAL_AI: &str = "fiscal_ai";

/// Shorten a key for display, keeping only its first four characters
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{prefix}****")
    }
}

/// Per-provider keys and quota
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Provider name, also used as the store namespace
    pub name: String,

    /// Query parameter the key is sent in (e.g. `apikey`, `token`)
    pub key_param: String,

    /// Keys in rotation order
    pub api_keys: Vec<String>,

    /// Calls allowed per key per calendar day
    pub daily_limit: u32,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.api_keys.iter().map(|k| mask_key(k)).collect();
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("key_param", &self.key_param)
            .field("api_keys", &keys)
            .field("daily_limit", &self.daily_limit)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new(
        name: impl Into<String>,
        key_param: impl Into<String>,
        api_keys: Vec<String>,
        daily_limit: u32,
    ) -> Self {
        Self {
            name: name.into(),
            key_param: key_param.into(),
            api_keys,
            daily_limit,
        }
    }

    /// Alpha Vantage keys from `ALPHA_VANTAGE_API_KEY` and `ALPHA_VANTAGE_API_KEY2`
    ///
    /// The free tier allows 25 calls per key per day.
    pub fn alpha_vantage_from_env() -> Self {
        Self::alpha_vantage_from_env_with(|name| std::env::var(name).ok())
    }

    pub fn alpha_vantage_from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::preset(
            ALPHA_VANTAGE,
            "apikey",
            &["ALPHA_VANTAGE_API_KEY", "ALPHA_VANTAGE_API_KEY2"],
            25,
            lookup,
        )
    }

    /// Finnhub keys from `FINNHUB_API_KEY` and `FINNHUB_API_KEY2`
    pub fn finnhub_from_env() -> Self {
        Self::finnhub_from_env_with(|name| std::env::var(name).ok())
    }

    pub fn finnhub_from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::preset(
            FINNHUB,
            "token",
            &["FINNHUB_API_KEY", "FINNHUB_API_KEY2"],
            1000,
            lookup,
        )
    }

    /// Fiscal.ai keys from `FISCAL_AI_API_KEY` and `FISCAL_AI_API_KEY2`
    pub fn fiscal_ai_from_env() -> Self {
        Self::fiscal_ai_from_env_with(|name| std::env::var(name).ok())
    }

    pub fn fiscal_ai_from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::preset(
            FISCAL_AI,
            "apiKey",
            &["FISCAL_AI_API_KEY", "FISCAL_AI_API_KEY2"],
            250,
            lookup,
        )
    }

    fn preset<F>(name: &str, key_param: &str, vars: &[&str], daily_limit: u32, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_keys = vars
            .iter()
            .filter_map(|&var| lookup(var))
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        Self::new(name, key_param, api_keys, daily_limit)
    }

    /// Validate the provider configuration
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.name)
            .map_err(|e| MeteredError::Config(e.to_string()))?;

        if self.key_param.trim().is_empty() {
            return Err(MeteredError::Config(format!(
                "{}: key_param must not be empty",
                self.name
            )));
        }

        if self.api_keys.is_empty() {
            return Err(MeteredError::Config(format!(
                "{}: at least one API key is required",
                self.name
            )));
        }

        if self.api_keys.iter().any(|k| k.trim().is_empty()) {
            return Err(MeteredError::Config(format!(
                "{}: API keys must not be blank",
                self.name
            )));
        }

        let distinct: HashSet<&str> = self.api_keys.iter().map(String::as_str).collect();
        if distinct.len() != self.api_keys.len() {
            return Err(MeteredError::Config(format!(
                "{}: API keys must be distinct",
                self.name
            )));
        }

        if self.daily_limit == 0 {
            return Err(MeteredError::Config(format!(
                "{}: daily_limit must be greater than 0",
                self.name
            )));
        }

        Ok(())
    }
}

/// Configuration for the metered access layer
///
/// # Example
///
/// ```json
/// {
///   "databasePath": "api_usage.db",
///   "requestTimeoutSecs": 30,
///   "providers": [
///     {
///       "name": "alpha_vantage",
///       "keyParam": "apikey",
///       "apiKeys": ["${ALPHA_VANTAGE_API_KEY}", "${ALPHA_VANTAGE_API_KEY2}"],
///       "dailyLimit": 25
///     }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeteredConfig {
    /// SQLite file holding every provider's usage and cache tables
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Request timeout duration
    #[serde(
        rename = "requestTimeoutSecs",
        default = "default_request_timeout",
        with = "duration_secs"
    )]
    pub request_timeout: Duration,

    /// Providers in use
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("api_usage.db")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl Default for MeteredConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            request_timeout: default_request_timeout(),
            providers: Vec::new(),
        }
    }
}

impl MeteredConfig {
    /// Create a new configuration builder
    pub fn builder() -> MeteredConfigBuilder {
        MeteredConfigBuilder::default()
    }

    /// Build from the provider presets, keeping those with at least one key set
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let providers: Vec<ProviderConfig> = [
            ProviderConfig::alpha_vantage_from_env_with(&lookup),
            ProviderConfig::finnhub_from_env_with(&lookup),
            ProviderConfig::fiscal_ai_from_env_with(&lookup),
        ]
        .into_iter()
        .filter(|p| !p.api_keys.is_empty())
        .collect();

        if providers.is_empty() {
            return Err(MeteredError::Config(
                "no provider API keys found in the environment".to_string(),
            ));
        }

        let mut config = Self::default();
        if let Some(path) = lookup("METERED_DB_PATH") {
            config.database_path = PathBuf::from(path);
        }
        config.providers = providers;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    ///
    /// `${VAR}` and `$VAR` references inside API keys are expanded from the
    /// process environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MeteredError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_json_with(&content, |name| std::env::var(name).ok())
    }

    /// Parse configuration JSON with a custom environment lookup
    pub fn from_json_with<F>(content: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: MeteredConfig = serde_json::from_str(content)
            .map_err(|e| MeteredError::Config(format!("Failed to parse config file: {e}")))?;

        for provider in &mut config.providers {
            for key in &mut provider.api_keys {
                *key = metered_utils::resolve_env_with(key.as_str(), &lookup)?;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Look up a provider by name
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            return Err(MeteredError::Config(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !names.insert(provider.name.as_str()) {
                return Err(MeteredError::Config(format!(
                    "duplicate provider: {}",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

/// Builder for MeteredConfig
#[derive(Debug, Default)]
pub struct MeteredConfigBuilder {
    database_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    providers: Vec<ProviderConfig>,
}

impl MeteredConfigBuilder {
    /// Set the database file
    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.request_timeout = Some(duration);
        self
    }

    /// Add a provider
    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<MeteredConfig> {
        let defaults = MeteredConfig::default();

        let config = MeteredConfig {
            database_path: self.database_path.unwrap_or(defaults.database_path),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            providers: self.providers,
        };

        config.validate()?;
        Ok(config)
    }
}
