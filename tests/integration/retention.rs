//! Integration tests for checkpoint retention, pending-task listing and clearing

use crate::support::{date, symbols, Harness, ScriptedProvider};
use chrono::{Duration, Utc};
use market_data_ingest::resume::{
    CheckpointStatus, CheckpointStore, DownloadCheckpoint, DownloadStateManager,
    FileCheckpointStore, MemoryCheckpointStore, StoreResult, TaskEvent,
};
use std::sync::Arc;
use tempfile::TempDir;

fn aged(task_id: &str, status: CheckpointStatus, days_old: i64) -> DownloadCheckpoint {
    let mut cp = DownloadCheckpoint::new(
        task_id,
        "daily",
        &symbols(&["AAPL"]),
        date(2024, 1, 1),
        date(2024, 1, 31),
    );
    cp.status = status;
    cp.updated_at = Utc::now() - Duration::days(days_old);
    cp.created_at = cp.updated_at;
    cp
}

#[test]
fn test_cleanup_only_removes_old_completed() {
    let harness = Harness::new(ScriptedProvider::new());
    // Written straight to the store so `updated_at` keeps its age
    for cp in [
        aged("old-completed", CheckpointStatus::Completed, 45),
        aged("new-completed", CheckpointStatus::Completed, 5),
        aged("old-failed", CheckpointStatus::Failed, 90),
        aged("old-paused", CheckpointStatus::Paused, 90),
        aged("old-running", CheckpointStatus::Running, 90),
    ] {
        harness.store.put(&cp).unwrap();
    }
    harness.state.log_event("old-completed", "completed", "done", None);

    let removed = harness.state.cleanup_old_checkpoints(30);

    assert_eq!(removed, 1);
    assert!(harness.state.load_checkpoint("old-completed").is_none());
    assert!(harness.state.get_task_logs("old-completed", 10).is_empty());
    for kept in ["new-completed", "old-failed", "old-paused", "old-running"] {
        assert!(harness.state.load_checkpoint(kept).is_some(), "{kept} should survive");
    }

    assert_eq!(harness.state.cleanup_old_checkpoints(30), 0);
}

#[test]
fn test_cleanup_on_file_store_removes_files() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::open(temp_dir.path()).unwrap());
    store.put(&aged("expired", CheckpointStatus::Completed, 31)).unwrap();
    store.put(&aged("fresh", CheckpointStatus::Completed, 1)).unwrap();
    let state = DownloadStateManager::new(store);
    state.log_event("expired", "completed", "done", None);

    assert_eq!(state.cleanup_old_checkpoints(30), 1);

    assert!(!temp_dir.path().join("checkpoints/expired.json").exists());
    assert!(!temp_dir.path().join("events/expired.jsonl").exists());
    assert!(temp_dir.path().join("checkpoints/fresh.json").exists());
}

#[test]
fn test_pending_tasks_sorted_and_filtered() {
    let harness = Harness::new(ScriptedProvider::new());
    let mut minute = aged("minute-task", CheckpointStatus::Failed, 1);
    minute.data_type = "minute".into();
    for cp in [
        aged("older", CheckpointStatus::Paused, 3),
        aged("newer", CheckpointStatus::Running, 0),
        aged("done", CheckpointStatus::Completed, 0),
        minute,
    ] {
        harness.store.put(&cp).unwrap();
    }

    let ids: Vec<String> = harness
        .state
        .get_pending_tasks(None)
        .into_iter()
        .map(|cp| cp.task_id)
        .collect();
    assert_eq!(ids, vec!["newer", "minute-task", "older"]);

    let daily = harness.state.get_pending_tasks(Some("daily"));
    assert_eq!(daily.len(), 2);
    assert!(daily.iter().all(|cp| cp.data_type == "daily"));
}

#[test]
fn test_clear_checkpoint_removes_record_and_events() {
    let harness = Harness::new(ScriptedProvider::new());
    harness.store.put(&aged("t1", CheckpointStatus::Failed, 0)).unwrap();
    harness.state.log_event("t1", "failed", "boom", None);

    assert!(harness.state.clear_checkpoint("t1"));
    assert!(harness.state.load_checkpoint("t1").is_none());
    assert!(harness.state.get_task_logs("t1", 10).is_empty());
    assert!(!harness.state.clear_checkpoint("t1"));
}

/// Store that restarts one task right after every scan, as a concurrent
/// `download_batch(.., resume_if_exists = false)` would
struct RestartAfterScan {
    inner: MemoryCheckpointStore,
    restarted: String,
}

impl CheckpointStore for RestartAfterScan {
    fn put(&self, checkpoint: &DownloadCheckpoint) -> StoreResult<()> {
        self.inner.put(checkpoint)
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<DownloadCheckpoint>> {
        self.inner.get(task_id)
    }

    fn delete(&self, task_id: &str) -> StoreResult<bool> {
        self.inner.delete(task_id)
    }

    fn scan(&self, statuses: &[CheckpointStatus]) -> StoreResult<Vec<DownloadCheckpoint>> {
        let snapshot = self.inner.scan(statuses)?;
        if let Some(mut cp) = self.inner.get(&self.restarted)? {
            cp.status = CheckpointStatus::Running;
            cp.updated_at = Utc::now();
            self.inner.put(&cp)?;
        }
        Ok(snapshot)
    }

    fn append_event(&self, event: &TaskEvent) -> StoreResult<()> {
        self.inner.append_event(event)
    }

    fn read_events(&self, task_id: &str) -> StoreResult<Vec<TaskEvent>> {
        self.inner.read_events(task_id)
    }
}

#[test]
fn test_cleanup_spares_task_restarted_after_scan() {
    let store = Arc::new(RestartAfterScan {
        inner: MemoryCheckpointStore::new(),
        restarted: "restarted".to_string(),
    });
    store.put(&aged("restarted", CheckpointStatus::Completed, 60)).unwrap();
    store.put(&aged("stale", CheckpointStatus::Completed, 60)).unwrap();
    let state = DownloadStateManager::new(store.clone());

    assert_eq!(state.cleanup_old_checkpoints(30), 1);

    let survivor = state.load_checkpoint("restarted").unwrap();
    assert_eq!(survivor.status, CheckpointStatus::Running);
    assert!(state.load_checkpoint("stale").is_none());
}
