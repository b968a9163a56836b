//! CLI error types and conversions

use crate::resume::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Checkpoint store could not be opened
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// No checkpoint with this id
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Output could not be rendered
    #[error("output error: {0}")]
    OutputError(String),
}
