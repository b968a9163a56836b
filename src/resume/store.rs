//! Checkpoint store abstraction
//!
//! The store is the leaf persistence layer: one checkpoint record and one
//! append-only event log per task id. It knows nothing about transitions;
//! those live in [`super::state::DownloadStateManager`].

use super::checkpoint::{CheckpointStatus, DownloadCheckpoint, TaskEvent};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable key-value persistence for checkpoints and task events
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace the checkpoint stored under `checkpoint.task_id`
    fn put(&self, checkpoint: &DownloadCheckpoint) -> StoreResult<()>;

    /// Point lookup by task id
    fn get(&self, task_id: &str) -> StoreResult<Option<DownloadCheckpoint>>;

    /// Remove a checkpoint and its event log. Returns whether a checkpoint existed.
    fn delete(&self, task_id: &str) -> StoreResult<bool>;

    /// All checkpoints whose status is one of `statuses`, in no particular order
    fn scan(&self, statuses: &[CheckpointStatus]) -> StoreResult<Vec<DownloadCheckpoint>>;

    /// Append an event to the task's log
    fn append_event(&self, event: &TaskEvent) -> StoreResult<()>;

    /// Events of a task in append order (oldest first)
    fn read_events(&self, task_id: &str) -> StoreResult<Vec<TaskEvent>>;
}

/// Errors raised by checkpoint stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    FileTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// Backend refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct MemoryInner {
    checkpoints: HashMap<String, DownloadCheckpoint>,
    events: HashMap<String, Vec<TaskEvent>>,
}

/// In-process store, useful for tests and ephemeral jobs
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::LockError(format!("memory store poisoned: {e}")))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn put(&self, checkpoint: &DownloadCheckpoint) -> StoreResult<()> {
        self.lock()?
            .checkpoints
            .insert(checkpoint.task_id.clone(), checkpoint.clone());
        Ok(())
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<DownloadCheckpoint>> {
        Ok(self.lock()?.checkpoints.get(task_id).cloned())
    }

    fn delete(&self, task_id: &str) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        inner.events.remove(task_id);
        Ok(inner.checkpoints.remove(task_id).is_some())
    }

    fn scan(&self, statuses: &[CheckpointStatus]) -> StoreResult<Vec<DownloadCheckpoint>> {
        Ok(self
            .lock()?
            .checkpoints
            .values()
            .filter(|cp| statuses.contains(&cp.status))
            .cloned()
            .collect())
    }

    fn append_event(&self, event: &TaskEvent) -> StoreResult<()> {
        self.lock()?
            .events
            .entry(event.task_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn read_events(&self, task_id: &str) -> StoreResult<Vec<TaskEvent>> {
        Ok(self
            .lock()?
            .events
            .get(task_id)
            .cloned()
            .unwrap_or_default())
    }
}
