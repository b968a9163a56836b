//! Persistence sink for fetched data

use super::DataBatch;
use async_trait::async_trait;

/// Sink errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Storage backend failed to write
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Storage backend unreachable
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage for fetched batches.
///
/// Implementations must be idempotent: storing the same batch twice after a
/// retry must not corrupt or duplicate data.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Store `batch` for `symbol`, returning the number of records written
    async fn store(&self, symbol: &str, batch: &DataBatch) -> Result<usize, SinkError>;
}
