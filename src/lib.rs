//! # Market Data Ingest Library
//!
//! Resumable batch ingestion of per-symbol market data. A batch job pulls
//! data for many symbols over a date range from a pluggable provider, hands
//! each result to a persistence sink, and checkpoints progress after every
//! symbol so an interrupted or partially failed job can be picked up later
//! without repeating finished work.
//!
//! ## Features
//!
//! - **Deterministic task identity**: the same job always maps to the same task id
//! - **Bounded concurrency**: a fixed-size worker pool per batch
//! - **Retries**: exponential backoff on transient provider and sink errors
//! - **Durable checkpoints**: atomic JSON files with an append-only event log
//! - **Operator control**: cancel, inspect, clear and age out tasks
//! - **Graceful shutdown**: in-flight symbols finish, the task is paused
//!
//! ## Quick Start
//!
//! ```no_run
//! use market_data_ingest::downloader::{BatchDownloadCoordinator, BatchOptions};
//! use market_data_ingest::provider::{DataProvider, PersistenceSink};
//! use market_data_ingest::resume::{DownloadStateManager, MemoryCheckpointStore};
//! use chrono::NaiveDate;
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     provider: Arc<dyn DataProvider>,
//! #     sink: Arc<dyn PersistenceSink>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let state = Arc::new(DownloadStateManager::new(Arc::new(MemoryCheckpointStore::new())));
//! let coordinator = BatchDownloadCoordinator::new(provider, sink, state);
//!
//! let symbols = vec!["AAPL".to_string()];
//! let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
//! let result = coordinator
//!     .download_batch(&symbols, day, day, "daily", BatchOptions::default())
//!     .await?;
//! assert_eq!(result.total, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`downloader`] - Batch coordinator, retry policy and progress reporting
//! - [`provider`] - Provider and sink traits the coordinator is generic over
//! - [`resume`] - Checkpoint model, storage backends and the state manager
//! - [`cli`] - Operator commands over the checkpoint store
//! - [`shutdown`] - Graceful shutdown signalling
//! - [`metrics`] - Counters and histograms emitted through the `metrics` facade

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Operator CLI commands
pub mod cli;

/// Batch download orchestration
pub mod downloader;

/// Ingestion metrics
pub mod metrics;

/// Data provider and persistence sink abstractions
pub mod provider;

/// Checkpointing and task state
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

pub use downloader::{BatchDownloadCoordinator, BatchOptions, BatchResult, DownloadError};
pub use provider::{DataBatch, DataProvider, PersistenceSink, ProviderError, SinkError};
pub use resume::{
    CheckpointStatus, DownloadCheckpoint, DownloadStateManager, FileCheckpointStore,
    MemoryCheckpointStore,
};
