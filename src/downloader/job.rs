//! Batch options, per-item outcomes and result structures

use crate::provider::ProviderError;
use crate::resume::{CheckpointStatus, DownloadCheckpoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback invoked after every finished item as `(completed, total, symbol)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Options for [`super::BatchDownloadCoordinator::download_batch`]
#[derive(Clone)]
pub struct BatchOptions {
    /// Optional per-item progress callback
    pub progress_callback: Option<ProgressCallback>,
    /// Resume an existing checkpoint for the same task id instead of restarting
    pub resume_if_exists: bool,
}

impl BatchOptions {
    /// Attach a progress callback
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64, u64, &str) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Toggle resumption of an existing checkpoint
    pub fn with_resume(mut self, resume_if_exists: bool) -> Self {
        self.resume_if_exists = resume_if_exists;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            progress_callback: None,
            resume_if_exists: true,
        }
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("progress_callback", &self.progress_callback.is_some())
            .field("resume_if_exists", &self.resume_if_exists)
            .finish()
    }
}

/// Why a single symbol did not make it into storage
#[derive(Debug, Clone, thiserror::Error)]
pub enum ItemError {
    /// Provider answered without error but with no records
    #[error("provider returned no data")]
    EmptyResult,

    /// Provider error classified as permanent
    #[error("permanent provider error: {0}")]
    Permanent(ProviderError),

    /// Retries used up on transient errors
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Message of the last error seen
        last_error: String,
    },

    /// Worker panicked
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// Worker task ended without reporting a result
    #[error("worker task aborted: {0}")]
    Aborted(String),

    /// Shutdown requested while the item was waiting to retry
    #[error("interrupted by shutdown")]
    Interrupted,
}

/// Outcome of one `download_batch` call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Task identifier the batch ran under
    pub task_id: String,
    /// Number of symbols in the job
    pub total: u64,
    /// Symbols attempted so far, including ones finished by earlier runs
    pub completed: u64,
    /// Symbols stored successfully, including ones finished by earlier runs
    pub success: u64,
    /// Symbols that failed in this run
    pub failed: u64,
    /// Failure message per failed symbol
    pub errors: BTreeMap<String, String>,
}

impl BatchResult {
    /// Whether every symbol of the job is stored
    pub fn is_complete(&self) -> bool {
        self.failed == 0 && self.success == self.total
    }
}

/// Status of one task processed by `resume_failed_downloads`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcomeStatus {
    /// Every symbol is now stored
    Success,
    /// The batch ran but some symbols failed, or it could not run
    Failed,
    /// Not attempted (cancelled task)
    Skipped,
}

/// Per-task summary produced by `resume_failed_downloads`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Task identifier
    pub task_id: String,
    /// Data type of the task
    pub data_type: String,
    /// Outcome classification
    pub status: TaskOutcomeStatus,
    /// Batch result when the batch ran
    pub result: Option<BatchResult>,
    /// Error when the batch could not run
    pub error: Option<String>,
}

/// Read-only projection of a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressInfo {
    /// Task identifier
    pub task_id: String,
    /// Data type tag
    pub data_type: String,
    /// Number of items in the job
    pub total_items: u64,
    /// Items attempted so far
    pub completed_items: u64,
    /// Completion percentage
    pub progress_percent: f64,
    /// Lifecycle status
    pub status: CheckpointStatus,
    /// Failure description
    pub error_message: Option<String>,
    /// Batch-level failure count
    pub retry_count: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<&DownloadCheckpoint> for ProgressInfo {
    fn from(cp: &DownloadCheckpoint) -> Self {
        Self {
            task_id: cp.task_id.clone(),
            data_type: cp.data_type.clone(),
            total_items: cp.total_items,
            completed_items: cp.completed_items,
            progress_percent: cp.progress_percent,
            status: cp.status,
            error_message: cp.error_message.clone(),
            retry_count: cp.retry_count,
            created_at: cp.created_at,
            updated_at: cp.updated_at,
        }
    }
}
