//! File-backed checkpoint store
//!
//! Layout under the store root:
//!
//! ```text
//! checkpoints/<task_id>.json   schema-versioned checkpoint envelope
//! events/<task_id>.jsonl       append-only event log, one JSON object per line
//! locks/<task_id>.lock         advisory lock coordinating readers and writers
//! ```
//!
//! File names are the percent-encoded task id, so every id maps to its own
//! file and `scan` recovers the exact id from the name.
//!
//! Checkpoint writes go through a temp file in the same directory followed by
//! an atomic rename, so a crash never leaves a half-written checkpoint behind.

use super::checkpoint::{CheckpointStatus, DownloadCheckpoint, TaskEvent};
use super::store::{CheckpointStore, StoreError, StoreResult};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::io::ErrorKind;
use tracing::{debug, warn};

/// Current checkpoint file schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum allowed checkpoint file size (10 MB) to prevent memory exhaustion
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    schema_version: String,
    checkpoint: DownloadCheckpoint,
}

/// Checkpoint store persisting one JSON file per task
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn open<P: Into<PathBuf>>(root: P) -> StoreResult<Self> {
        let root = root.into();
        for dir in ["checkpoints", "events", "locks"] {
            std::fs::create_dir_all(root.join(dir))
                .map_err(|e| StoreError::IoError(format!("Failed to create {dir} dir: {e}")))?;
        }
        debug!(root = %root.display(), "Opened file checkpoint store");
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_path(&self, task_id: &str) -> PathBuf {
        self.root
            .join("checkpoints")
            .join(format!("{}.json", file_stem(task_id)))
    }

    fn events_path(&self, task_id: &str) -> PathBuf {
        self.root
            .join("events")
            .join(format!("{}.jsonl", file_stem(task_id)))
    }

    fn lock_path(&self, task_id: &str) -> PathBuf {
        self.root
            .join("locks")
            .join(format!("{}.lock", file_stem(task_id)))
    }

    fn lock_file(&self, task_id: &str) -> StoreResult<RwLock<File>> {
        let lock_path = self.lock_path(task_id);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::LockError(format!("Failed to open lock file: {e}")))?;
        Ok(RwLock::new(file))
    }

    fn read_checkpoint_file(path: &Path) -> StoreResult<DownloadCheckpoint> {
        let metadata = std::fs::metadata(path).map_err(|e| StoreError::IoError(e.to_string()))?;
        if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
            return Err(StoreError::FileTooLarge {
                size: metadata.len(),
                max: MAX_CHECKPOINT_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| StoreError::IoError(e.to_string()))?;
        let stored: StoredCheckpoint = serde_json::from_str(&contents)
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;

        if stored.schema_version != SCHEMA_VERSION {
            return Err(StoreError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: stored.schema_version,
            });
        }
        Ok(stored.checkpoint)
    }

    fn load_locked(&self, task_id: &str) -> StoreResult<Option<DownloadCheckpoint>> {
        let path = self.checkpoint_path(task_id);
        let lock = self.lock_file(task_id)?;
        let _guard = lock
            .read()
            .map_err(|e| StoreError::LockError(format!("Failed to acquire read lock: {e}")))?;

        if !path.exists() {
            return Ok(None);
        }
        Self::read_checkpoint_file(&path).map(Some)
    }
}

/// Reversible file name for a task id
fn file_stem(task_id: &str) -> String {
    urlencoding::encode(task_id).into_owned()
}

fn task_id_from_stem(stem: &str) -> Option<String> {
    urlencoding::decode(stem).ok().map(|id| id.into_owned())
}

impl CheckpointStore for FileCheckpointStore {
    fn put(&self, checkpoint: &DownloadCheckpoint) -> StoreResult<()> {
        let path = self.checkpoint_path(&checkpoint.task_id);
        let stored = StoredCheckpoint {
            schema_version: SCHEMA_VERSION.to_string(),
            checkpoint: checkpoint.clone(),
        };
        let json = serde_json::to_string_pretty(&stored)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let mut lock = self.lock_file(&checkpoint.task_id)?;
        let _guard = lock
            .write()
            .map_err(|e| StoreError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = self.root.join("checkpoints");
        let mut temp_file = tempfile::NamedTempFile::new_in(&parent_dir)
            .map_err(|e| StoreError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| StoreError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| StoreError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| StoreError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| StoreError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Make the rename itself durable
        match File::open(&parent_dir) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    warn!(task_id = %checkpoint.task_id, error = %e, "Failed to sync checkpoint directory");
                }
            }
            // Directories cannot be opened as files on every platform
            Err(e) => debug!(error = %e, "Checkpoint directory not opened for sync"),
        }

        debug!(
            task_id = %checkpoint.task_id,
            status = %checkpoint.status,
            completed_items = checkpoint.completed_items,
            "Checkpoint written"
        );
        Ok(())
    }

    fn get(&self, task_id: &str) -> StoreResult<Option<DownloadCheckpoint>> {
        self.load_locked(task_id)
    }

    fn delete(&self, task_id: &str) -> StoreResult<bool> {
        let path = self.checkpoint_path(task_id);
        let events_path = self.events_path(task_id);

        let existed = {
            let mut lock = self.lock_file(task_id)?;
            let _guard = lock
                .write()
                .map_err(|e| StoreError::LockError(format!("Failed to acquire write lock: {e}")))?;

            let existed = path.exists();
            if existed {
                std::fs::remove_file(&path).map_err(|e| StoreError::IoError(e.to_string()))?;
            }
            if events_path.exists() {
                std::fs::remove_file(&events_path)
                    .map_err(|e| StoreError::IoError(e.to_string()))?;
            }
            existed
        };

        // Released above; a leftover lock file is harmless and recreated on demand
        match std::fs::remove_file(self.lock_path(task_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(task_id, error = %e, "Failed to remove lock file"),
        }
        Ok(existed)
    }

    fn scan(&self, statuses: &[CheckpointStatus]) -> StoreResult<Vec<DownloadCheckpoint>> {
        let dir = self.root.join("checkpoints");
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::IoError(e.to_string()))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::IoError(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(task_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(task_id_from_stem)
            else {
                continue;
            };

            // One unreadable file must not hide every other task
            match self.load_locked(&task_id) {
                Ok(Some(cp)) if statuses.contains(&cp.status) => found.push(cp),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(found)
    }

    fn append_event(&self, event: &TaskEvent) -> StoreResult<()> {
        let mut line = serde_json::to_string(event)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        line.push('\n');

        let mut lock = self.lock_file(&event.task_id)?;
        let _guard = lock
            .write()
            .map_err(|e| StoreError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(&event.task_id))
            .map_err(|e| StoreError::IoError(format!("Failed to open event log: {e}")))?;
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::IoError(format!("Failed to append event: {e}")))?;
        file.sync_data()
            .map_err(|e| StoreError::IoError(format!("Failed to sync event log: {e}")))?;
        Ok(())
    }

    fn read_events(&self, task_id: &str) -> StoreResult<Vec<TaskEvent>> {
        let path = self.events_path(task_id);
        let lock = self.lock_file(task_id)?;
        let _guard = lock
            .read()
            .map_err(|e| StoreError::LockError(format!("Failed to acquire read lock: {e}")))?;

        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&path).map_err(|e| StoreError::IoError(e.to_string()))?;

        let mut events = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| StoreError::IoError(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TaskEvent>(&line) {
                Ok(event) => events.push(event),
                // A torn final line after a crash is expected; keep the rest
                Err(e) => warn!(task_id, line = line_no + 1, error = %e, "Skipping malformed event"),
            }
        }
        Ok(events)
    }
}
