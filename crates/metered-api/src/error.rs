//! Error types for metered provider access

use crate::payload::PayloadFormat;
use thiserror::Error;

/// Coarse failure category, used by adapters to pick a retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Every key of the provider is at its daily limit
    QuotaExhausted,
    /// Network or HTTP failure during dispatch
    Transport,
    /// Body did not match the declared format
    Decode,
    /// Persistence layer failure
    Store,
    /// Invalid configuration
    Config,
    /// Provider reported an error inside a well-formed body
    Provider,
}

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Operation attempted after `close()`
    #[error("Usage store for {provider} is closed")]
    Closed {
        provider: String,
    },

    /// Provider name cannot be used as a table namespace
    #[error("Invalid store namespace: {0}")]
    InvalidNamespace(String),
}

/// Metered access errors
#[derive(Debug, Error)]
pub enum MeteredError {
    /// All configured keys are at or above the daily limit
    #[error("Daily quota exhausted for {provider}: {keys} key(s) at limit {daily_limit}")]
    QuotaExhausted {
        provider: String,
        keys: usize,
        daily_limit: u32,
    },

    /// Network or HTTP error
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Provider replied with a non-success status
    #[error("HTTP error {status}: {body}")]
    HttpStatus {
        status: u16,
        body: String,
    },

    /// Request URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Response body does not match the declared format
    #[error("Failed to decode {format} response: {reason}")]
    Decode {
        format: PayloadFormat,
        reason: String,
    },

    /// Cache or usage log unavailable
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-reported error carried in a decodable body
    #[error("{provider} error: {message}")]
    Provider {
        provider: String,
        message: String,
    },
}

impl MeteredError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::QuotaExhausted { .. } => ErrorKind::QuotaExhausted,
            Self::Transport(_) | Self::HttpStatus { .. } | Self::InvalidUrl(_) => {
                ErrorKind::Transport
            }
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Store(_) => ErrorKind::Store,
            Self::Config(_) => ErrorKind::Config,
            Self::Provider { .. } => ErrorKind::Provider,
        }
    }

    pub(crate) fn decode(format: PayloadFormat, reason: impl ToString) -> Self {
        Self::Decode {
            format,
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for MeteredError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(err))
    }
}

impl From<metered_utils::EnvError> for MeteredError {
    fn from(err: metered_utils::EnvError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for metered operations
pub type Result<T> = std::result::Result<T, MeteredError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeteredError::QuotaExhausted {
            provider: "alpha_vantage".to_string(),
            keys: 2,
            daily_limit: 25,
        };
        assert_eq!(
            err.to_string(),
            "Daily quota exhausted for alpha_vantage: 2 key(s) at limit 25"
        );

        let err = MeteredError::decode(PayloadFormat::Tabular, "ragged row");
        assert_eq!(err.to_string(), "Failed to decode tabular response: ragged row");
    }

    #[test]
    fn test_error_kind() {
        let err = MeteredError::HttpStatus {
            status: 503,
            body: String::new(),
        };
        assert_eq!(err.kind(), ErrorKind::Transport);

        let err: MeteredError = StoreError::Closed {
            provider: "finnhub".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Store);

        let err: MeteredError = url::Url::parse("not a url").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
