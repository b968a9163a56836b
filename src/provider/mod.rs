//! Data provider and persistence sink interfaces
//!
//! The coordinator never performs network or storage I/O itself: it is handed
//! a [`DataProvider`] that fetches one symbol's data for a date range, and a
//! [`PersistenceSink`] that durably stores it.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub mod sink;

pub use sink::{PersistenceSink, SinkError};

/// Records fetched for one symbol over one date range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataBatch {
    /// Symbol the records belong to
    pub symbol: String,
    /// Data type tag the records were fetched for
    pub data_type: String,
    /// Provider-specific rows
    pub records: Vec<serde_json::Value>,
}

impl DataBatch {
    /// Create a batch
    pub fn new(
        symbol: impl Into<String>,
        data_type: impl Into<String>,
        records: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            data_type: data_type.into(),
            records,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the provider returned no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Provider errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network failure (timeout, connection reset, DNS)
    #[error("network error: {0}")]
    NetworkError(String),

    /// Rate limit exceeded
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Upstream server error
    #[error("server error ({status}): {message}")]
    ServerError {
        /// HTTP-like status code
        status: u16,
        /// Upstream message
        message: String,
    },

    /// Symbol unknown to the provider
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// Request rejected as malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication or permission failure
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Response could not be parsed
    #[error("parse error: {0}")]
    ParseError(String),
}

impl ProviderError {
    /// Whether the error is transient and worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NetworkError(_) | Self::RateLimitExceeded | Self::ServerError { .. } => true,
            Self::SymbolNotFound(_)
            | Self::InvalidRequest(_)
            | Self::AuthFailed(_)
            | Self::ParseError(_) => false,
        }
    }
}

/// Source of market data for one symbol at a time
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Fetch `symbol`'s data for `[start_date, end_date]`.
    ///
    /// An empty batch is a valid answer distinct from an error; the
    /// coordinator treats it as a non-retryable failure for that symbol.
    async fn fetch(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
    ) -> Result<DataBatch, ProviderError>;
}
