//! Resume capability for batch download jobs
//!
//! Checkpoint records, the stores that persist them, and the state manager
//! that owns every transition.

pub mod checkpoint;
pub mod file_store;
pub mod state;
pub mod store;

pub use checkpoint::{CheckpointStatus, DownloadCheckpoint, TaskEvent, CANCELLED_MESSAGE};
pub use file_store::FileCheckpointStore;
pub use state::DownloadStateManager;
pub use store::{CheckpointStore, MemoryCheckpointStore, StoreError, StoreResult};
