//! Checkpoint and task event records
//!
//! A [`DownloadCheckpoint`] is the unit of recoverable state for one batch
//! job. [`TaskEvent`]s form the append-only audit trail next to it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Error message stored on checkpoints cancelled through the coordinator.
pub const CANCELLED_MESSAGE: &str = "cancelled by user";

/// Lifecycle status of a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// Work is in progress (or was interrupted by a crash)
    Running,
    /// Stopped gracefully before all symbols were dispatched
    Paused,
    /// At least one symbol failed, or the task was cancelled
    Failed,
    /// Every symbol completed successfully
    Completed,
}

impl CheckpointStatus {
    /// Statuses a later invocation may pick up again.
    pub const RESUMABLE: [CheckpointStatus; 3] = [Self::Running, Self::Failed, Self::Paused];

    /// Whether a checkpoint in this status can be resumed
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::Running | Self::Failed | Self::Paused => true,
            Self::Completed => false,
        }
    }

    /// Lowercase label used in logs and persisted form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown checkpoint status: {other}")),
        }
    }
}

/// Durable progress record for one batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadCheckpoint {
    /// Deterministic task identifier
    pub task_id: String,
    /// Data type tag (e.g. "daily")
    pub data_type: String,
    /// First date of the requested range
    pub start_date: NaiveDate,
    /// Last date of the requested range
    pub end_date: NaiveDate,
    /// Populated for single-symbol jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Populated for multi-symbol jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    /// Symbols that finished successfully
    #[serde(default)]
    pub completed_symbols: BTreeSet<String>,
    /// Last fully ingested date, for time-sliced resumption
    #[serde(default)]
    pub last_completed_date: Option<NaiveDate>,
    /// Number of items in the job
    pub total_items: u64,
    /// Number of items attempted so far
    pub completed_items: u64,
    /// Derived completion percentage in [0, 100]
    pub progress_percent: f64,
    /// Lifecycle status
    pub status: CheckpointStatus,
    /// Failure description, only set when failed
    #[serde(default)]
    pub error_message: Option<String>,
    /// Number of batch-level failures
    #[serde(default)]
    pub retry_count: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl DownloadCheckpoint {
    /// Create a fresh running checkpoint for a batch of symbols.
    ///
    /// A single-symbol batch populates `symbol`, anything larger `symbols`.
    pub fn new(
        task_id: impl Into<String>,
        data_type: impl Into<String>,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        let total_items = symbols.len() as u64;
        let (symbol, symbols) = match symbols {
            [single] => (Some(single.clone()), None),
            many => (None, Some(many.to_vec())),
        };

        Self {
            task_id: task_id.into(),
            data_type: data_type.into(),
            start_date,
            end_date,
            symbol,
            symbols,
            completed_symbols: BTreeSet::new(),
            last_completed_date: None,
            total_items,
            completed_items: 0,
            progress_percent: 0.0,
            status: CheckpointStatus::Running,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Symbols of the job, whichever field holds them
    pub fn job_symbols(&self) -> &[String] {
        match (&self.symbol, &self.symbols) {
            (Some(symbol), _) => std::slice::from_ref(symbol),
            (None, Some(symbols)) => symbols,
            (None, None) => &[],
        }
    }

    /// Ordered symbol list of the job, owned
    pub fn symbol_list(&self) -> Vec<String> {
        self.job_symbols().to_vec()
    }

    /// Symbols not yet in `completed_symbols`, in job order
    pub fn remaining_symbols(&self) -> Vec<String> {
        self.job_symbols()
            .iter()
            .filter(|s| !self.completed_symbols.contains(*s))
            .cloned()
            .collect()
    }

    /// Replace `completed_symbols` with the members of `completed` that belong
    /// to this job. Linear in the job size.
    pub fn set_completed_symbols(&mut self, completed: &BTreeSet<String>) {
        let job: HashSet<&str> = self.job_symbols().iter().map(String::as_str).collect();
        let kept: BTreeSet<String> = completed
            .iter()
            .filter(|s| job.contains(s.as_str()))
            .cloned()
            .collect();
        self.completed_symbols = kept;
    }

    /// Whether this checkpoint was terminated by `cancel_task`
    pub fn is_cancelled(&self) -> bool {
        self.status == CheckpointStatus::Failed
            && self.error_message.as_deref() == Some(CANCELLED_MESSAGE)
    }

    /// Set counters and recompute the derived percentage
    pub fn set_progress(&mut self, completed_items: u64, total_items: u64) {
        self.total_items = total_items;
        self.completed_items = completed_items.min(total_items);
        self.progress_percent = compute_progress_percent(self.completed_items, total_items);
    }

    /// Copy the mutable fields of `update` onto this record.
    ///
    /// Identity fields (`task_id`, `data_type`, symbols, date range and
    /// `created_at`) are left untouched.
    pub fn apply_update(&mut self, update: &DownloadCheckpoint) {
        self.set_completed_symbols(&update.completed_symbols);
        self.last_completed_date = update.last_completed_date;
        self.set_progress(update.completed_items, update.total_items);
        self.status = update.status;
        self.error_message = update.error_message.clone();
        self.retry_count = update.retry_count;
        self.updated_at = update.updated_at;
    }
}

/// `100 * completed / max(1, total)`, clamped to [0, 100]
pub fn compute_progress_percent(completed_items: u64, total_items: u64) -> f64 {
    let pct = 100.0 * completed_items as f64 / total_items.max(1) as f64;
    pct.clamp(0.0, 100.0)
}

/// Append-only audit record for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task the event belongs to
    pub task_id: String,
    /// Free-form tag: started, resumed, completed, failed, cancelled, paused
    pub event_type: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// When the event was appended
    pub created_at: DateTime<Utc>,
}

impl TaskEvent {
    /// Create an event stamped with the current time
    pub fn new(
        task_id: impl Into<String>,
        event_type: impl Into<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            event_type: event_type.into(),
            message: message.into(),
            details,
            created_at: Utc::now(),
        }
    }
}
