//! Download state manager
//!
//! Sole reader/writer of checkpoint and event-log persistence. Every method
//! absorbs store errors: they are logged and turned into a sentinel (`false`,
//! `None`, empty, `0`) so that a storage hiccup never takes down the
//! coordinator's control loop. A lost progress write is superseded by the
//! next successful one.

use super::checkpoint::{
    compute_progress_percent, CheckpointStatus, DownloadCheckpoint, TaskEvent, CANCELLED_MESSAGE,
};
use super::store::{CheckpointStore, StoreResult};
use chrono::{Duration, NaiveDate, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Domain operations over a [`CheckpointStore`]
pub struct DownloadStateManager {
    store: Arc<dyn CheckpointStore>,
    // Serializes read-modify-write cycles so concurrent updates are not lost
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for DownloadStateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStateManager").finish_non_exhaustive()
    }
}

impl DownloadStateManager {
    /// Wrap a store
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or update a checkpoint.
    ///
    /// An existing record keeps its identity fields; only progress, status,
    /// error, retry count and completion data are replaced.
    pub fn save_checkpoint(&self, checkpoint: &DownloadCheckpoint) -> bool {
        let _guard = self.guard();
        let result = self.store.get(&checkpoint.task_id).and_then(|existing| {
            let mut update = checkpoint.clone();
            update.updated_at = Utc::now();
            let record = match existing {
                Some(mut stored) => {
                    stored.apply_update(&update);
                    stored
                }
                None => {
                    update.set_progress(update.completed_items, update.total_items);
                    update
                }
            };
            self.store.put(&record)
        });
        self.absorb("save_checkpoint", &checkpoint.task_id, result)
            .is_some()
    }

    /// Load a checkpoint by task id
    pub fn load_checkpoint(&self, task_id: &str) -> Option<DownloadCheckpoint> {
        self.absorb("load_checkpoint", task_id, self.store.get(task_id))
            .flatten()
    }

    /// Record progress for a task.
    ///
    /// Counters and the completed set are written in one store operation.
    /// Returns `false` when no checkpoint exists for `task_id`.
    pub fn update_progress(
        &self,
        task_id: &str,
        completed_items: u64,
        total_items: Option<u64>,
        last_completed_date: Option<NaiveDate>,
        completed_symbols: Option<&BTreeSet<String>>,
    ) -> bool {
        self.modify("update_progress", task_id, |cp| {
            let total = total_items.unwrap_or(cp.total_items);
            cp.set_progress(completed_items, total);
            if let Some(date) = last_completed_date {
                cp.last_completed_date = Some(date);
            }
            if let Some(completed) = completed_symbols {
                cp.set_completed_symbols(completed);
            }
            debug!(
                task_id,
                completed_items = cp.completed_items,
                total_items = cp.total_items,
                progress_percent = cp.progress_percent,
                "Progress updated"
            );
            Some(())
        })
        .is_some()
    }

    /// Transition a task to `completed` with full progress
    pub fn mark_completed(&self, task_id: &str) -> bool {
        let updated = self
            .modify("mark_completed", task_id, |cp| {
                cp.status = CheckpointStatus::Completed;
                cp.completed_items = cp.total_items;
                cp.progress_percent = 100.0;
                cp.error_message = None;
                Some(())
            })
            .is_some();

        if updated {
            info!(task_id, "Task marked completed");
            self.log_event(task_id, "completed", "Task completed", None);
        }
        updated
    }

    /// Transition a task to `failed`, storing the message and bumping `retry_count`
    pub fn mark_failed(&self, task_id: &str, error_message: &str) -> bool {
        let retry_count = self.modify("mark_failed", task_id, |cp| {
            cp.status = CheckpointStatus::Failed;
            cp.error_message = Some(error_message.to_string());
            cp.retry_count += 1;
            Some(cp.retry_count)
        });

        match retry_count {
            Some(retry_count) => {
                warn!(task_id, retry_count, error = error_message, "Task marked failed");
                self.log_event(
                    task_id,
                    "failed",
                    error_message,
                    Some(serde_json::json!({ "retry_count": retry_count })),
                );
                true
            }
            None => false,
        }
    }

    /// Transition a `running` or `paused` task to `paused` after a graceful stop.
    ///
    /// Terminal records (`failed`, `completed`) are left as they are, so a
    /// cancellation is never turned back into a resumable task.
    pub fn mark_paused(&self, task_id: &str, reason: &str) -> bool {
        let updated = self
            .modify("mark_paused", task_id, |cp| match cp.status {
                CheckpointStatus::Running | CheckpointStatus::Paused => {
                    cp.status = CheckpointStatus::Paused;
                    cp.error_message = None;
                    Some(())
                }
                CheckpointStatus::Failed | CheckpointStatus::Completed => {
                    debug!(task_id, status = %cp.status, "Task not pausable");
                    None
                }
            })
            .is_some();

        if updated {
            info!(task_id, reason, "Task paused");
            self.log_event(task_id, "paused", reason, None);
        }
        updated
    }

    /// Cancel a task that is `running` or `paused`.
    ///
    /// The status check and the write happen under the same lock. Returns
    /// `false` for unknown ids and any other status, leaving the record as is.
    pub fn mark_cancelled(&self, task_id: &str) -> bool {
        let updated = self
            .modify("mark_cancelled", task_id, |cp| match cp.status {
                CheckpointStatus::Running | CheckpointStatus::Paused => {
                    cp.status = CheckpointStatus::Failed;
                    cp.error_message = Some(CANCELLED_MESSAGE.to_string());
                    Some(())
                }
                CheckpointStatus::Failed | CheckpointStatus::Completed => {
                    debug!(task_id, status = %cp.status, "Task not cancellable");
                    None
                }
            })
            .is_some();

        if updated {
            info!(task_id, "Task cancelled");
            self.log_event(task_id, "cancelled", CANCELLED_MESSAGE, None);
        }
        updated
    }

    /// Hard-delete a checkpoint and its event log
    pub fn clear_checkpoint(&self, task_id: &str) -> bool {
        let _guard = self.guard();
        let deleted = self
            .absorb("clear_checkpoint", task_id, self.store.delete(task_id))
            .unwrap_or(false);
        if deleted {
            info!(task_id, "Checkpoint cleared");
        }
        deleted
    }

    /// Checkpoints in `running`, `failed` or `paused`, newest-updated first
    pub fn get_pending_tasks(&self, data_type: Option<&str>) -> Vec<DownloadCheckpoint> {
        let mut pending = self
            .absorb(
                "get_pending_tasks",
                "*",
                self.store.scan(&CheckpointStatus::RESUMABLE),
            )
            .unwrap_or_default();

        if let Some(data_type) = data_type {
            pending.retain(|cp| cp.data_type == data_type);
        }
        pending.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        pending
    }

    /// Delete `completed` checkpoints not updated within the last `days` days.
    ///
    /// Non-terminal checkpoints are never touched, whatever their age. Each
    /// candidate is re-read under the write lock, so a task restarted after
    /// the scan survives the sweep.
    pub fn cleanup_old_checkpoints(&self, days: u32) -> usize {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let _guard = self.guard();
        let completed = self
            .absorb(
                "cleanup_old_checkpoints",
                "*",
                self.store.scan(&[CheckpointStatus::Completed]),
            )
            .unwrap_or_default();

        let mut removed = 0;
        for candidate in completed.iter().filter(|cp| cp.updated_at < cutoff) {
            let task_id = candidate.task_id.as_str();
            let still_expired = self
                .absorb("cleanup_old_checkpoints", task_id, self.store.get(task_id))
                .flatten()
                .is_some_and(|cp| cp.status == CheckpointStatus::Completed && cp.updated_at < cutoff);
            if !still_expired {
                debug!(task_id, "Checkpoint changed since scan; keeping it");
                continue;
            }

            let deleted = self.absorb("cleanup_old_checkpoints", task_id, self.store.delete(task_id));
            if deleted == Some(true) {
                removed += 1;
            }
        }

        info!(days, removed, "Old completed checkpoints cleaned up");
        removed
    }

    /// Append an event to the task log
    pub fn log_event(
        &self,
        task_id: &str,
        event_type: &str,
        message: &str,
        details: Option<serde_json::Value>,
    ) -> bool {
        let event = TaskEvent::new(task_id, event_type, message, details);
        self.absorb("log_event", task_id, self.store.append_event(&event))
            .is_some()
    }

    /// Most recent `limit` events of a task, newest first
    pub fn get_task_logs(&self, task_id: &str, limit: usize) -> Vec<TaskEvent> {
        let mut events = self
            .absorb("get_task_logs", task_id, self.store.read_events(task_id))
            .unwrap_or_default();
        events.reverse();
        events.truncate(limit);
        events
    }

    /// Load, mutate and write back a checkpoint under the write lock.
    ///
    /// `apply` returning `None` aborts without writing.
    fn modify<T>(
        &self,
        operation: &str,
        task_id: &str,
        apply: impl FnOnce(&mut DownloadCheckpoint) -> Option<T>,
    ) -> Option<T> {
        let _guard = self.guard();
        let mut checkpoint = match self.absorb(operation, task_id, self.store.get(task_id))? {
            Some(cp) => cp,
            None => {
                error!(task_id, operation, "No checkpoint found for task");
                return None;
            }
        };

        let value = apply(&mut checkpoint)?;
        checkpoint.progress_percent =
            compute_progress_percent(checkpoint.completed_items, checkpoint.total_items);
        checkpoint.updated_at = Utc::now();
        self.absorb(operation, task_id, self.store.put(&checkpoint))?;
        Some(value)
    }

    fn absorb<T>(&self, operation: &str, task_id: &str, result: StoreResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(task_id, operation, error = %e, "Checkpoint store operation failed");
                None
            }
        }
    }
}
