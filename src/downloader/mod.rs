//! Batch download orchestration
//!
//! This module provides the resumable batch engine: a bounded worker pool
//! that pulls each symbol from a [`crate::provider::DataProvider`], hands the
//! records to a [`crate::provider::PersistenceSink`] and records progress
//! through [`crate::resume::DownloadStateManager`] after every symbol.
//!
//! # Overview
//!
//! 1. **Identity**: a job (data type, symbols, date range) hashes to a stable
//!    task id via [`BatchDownloadCoordinator::generate_task_id`]
//! 2. **Resume**: an existing checkpoint for that id is picked up and only
//!    the symbols missing from `completed_symbols` are downloaded again
//! 3. **Execution**: at most `max_workers` symbols run concurrently, each
//!    with exponential-backoff retries ([`config::RetryPolicy`])
//! 4. **Finalization**: the checkpoint ends `completed`, `failed` or, after
//!    a graceful shutdown, `paused`
//!
//! # Quick Start
//!
//! ```no_run
//! use market_data_ingest::downloader::{BatchDownloadCoordinator, BatchOptions};
//! use market_data_ingest::provider::{DataProvider, PersistenceSink};
//! use market_data_ingest::resume::{DownloadStateManager, FileCheckpointStore};
//! use chrono::NaiveDate;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     provider: Arc<dyn DataProvider>,
//! #     sink: Arc<dyn PersistenceSink>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileCheckpointStore::open("./state")?);
//! let state = Arc::new(DownloadStateManager::new(store));
//! let coordinator = BatchDownloadCoordinator::new(provider, sink, state).with_max_workers(4);
//!
//! let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
//! let result = coordinator
//!     .download_batch(
//!         &symbols,
//!         NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!         NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
//!         "daily",
//!         BatchOptions::default(),
//!     )
//!     .await?;
//! println!("{}/{} stored", result.success, result.total);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Only malformed requests surface as [`DownloadError`]. Everything that goes
//! wrong with an individual symbol lands in [`BatchResult::errors`], and
//! persistence problems are logged and absorbed by the state manager.

pub mod config;
pub mod coordinator;
pub mod job;
pub mod progress;

pub use config::{CoordinatorConfig, RetryPolicy};
pub use coordinator::BatchDownloadCoordinator;
pub use job::{
    BatchOptions, BatchResult, ItemError, ProgressCallback, ProgressInfo, TaskOutcome,
    TaskOutcomeStatus,
};
pub use progress::{ProgressState, ProgressTracker};

/// Download errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// Request rejected before any work was done
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Stored task id does not match the id recomputed from its own fields
    #[error("task id mismatch: stored {stored}, computed {computed}")]
    TaskIdMismatch {
        /// Id found in the checkpoint
        stored: String,
        /// Id derived from the checkpoint's job fields
        computed: String,
    },
}
