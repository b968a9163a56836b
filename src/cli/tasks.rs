//! Operator commands over the checkpoint store
//!
//! Everything here works on persisted state only. Downloading needs a
//! concrete provider and sink, so it is a library call rather than a command.

use crate::downloader::config::{DEFAULT_LOG_LIMIT, DEFAULT_RETENTION_DAYS};
use crate::downloader::{BatchDownloadCoordinator, ProgressInfo};
use crate::resume::{DownloadCheckpoint, DownloadStateManager, FileCheckpointStore, TaskEvent};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::CliError;

/// Default checkpoint directory when neither flag nor env var is given
const DEFAULT_STATE_DIR: &str = ".ingest-state";

/// Parse a `YYYY-MM-DD` date argument
fn parse_date(input: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| format!("'{input}' is not a valid YYYY-MM-DD date: {e}"))
}

/// Market data ingest operator CLI
#[derive(Parser, Debug)]
#[command(name = "market-data-ingest")]
#[command(about = "Inspect and manage resumable market data ingestion tasks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Checkpoint state directory
    #[arg(long, global = true, env = "INGEST_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output_format: OutputFormat,
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tasks that can be resumed (running, paused or failed)
    Pending {
        /// Only list tasks of this data type
        #[arg(long)]
        data_type: Option<String>,
    },

    /// Show progress of a task
    Progress {
        /// Task identifier
        task_id: String,
    },

    /// Show the most recent events of a task
    Logs {
        /// Task identifier
        task_id: String,

        /// Maximum number of events to show
        #[arg(long, default_value_t = DEFAULT_LOG_LIMIT)]
        limit: usize,
    },

    /// Cancel a running or paused task
    Cancel {
        /// Task identifier
        task_id: String,
    },

    /// Delete a task's checkpoint and event log
    Clear {
        /// Task identifier
        task_id: String,
    },

    /// Delete completed tasks older than the retention window
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
        days: u32,
    },

    /// Print the task id a batch job would run under
    TaskId(TaskIdArgs),
}

/// Arguments identifying a batch job
#[derive(Args, Debug)]
pub struct TaskIdArgs {
    /// Data type tag (e.g. daily)
    #[arg(long)]
    pub data_type: String,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub start: NaiveDate,

    /// Last day of the range, inclusive (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub end: NaiveDate,

    /// Symbols in the job
    #[arg(required = true, num_args = 1..)]
    pub symbols: Vec<String>,
}

impl Cli {
    /// Open the state manager over `--state-dir`
    pub fn open_state(&self) -> Result<DownloadStateManager, CliError> {
        let store = FileCheckpointStore::open(self.state_dir.clone())?;
        Ok(DownloadStateManager::new(Arc::new(store)))
    }

    /// Execute the selected command
    pub fn execute(&self) -> Result<(), CliError> {
        let format = self.output_format;
        match &self.command {
            Commands::TaskId(args) => args.execute(format),
            Commands::Pending { data_type } => {
                execute_pending(&self.open_state()?, data_type.as_deref(), format)
            }
            Commands::Progress { task_id } => execute_progress(&self.open_state()?, task_id, format),
            Commands::Logs { task_id, limit } => {
                execute_logs(&self.open_state()?, task_id, *limit, format)
            }
            Commands::Cancel { task_id } => execute_cancel(&self.open_state()?, task_id, format),
            Commands::Clear { task_id } => execute_clear(&self.open_state()?, task_id, format),
            Commands::Cleanup { days } => execute_cleanup(&self.open_state()?, *days, format),
        }
    }
}

impl TaskIdArgs {
    fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        if self.data_type.trim().is_empty() {
            return Err(CliError::InvalidArgument(
                "data type must not be empty".to_string(),
            ));
        }
        if self.start > self.end {
            return Err(CliError::InvalidArgument(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }

        let task_id = BatchDownloadCoordinator::generate_task_id(
            &self.data_type,
            &self.symbols,
            self.start,
            self.end,
        );
        match format {
            OutputFormat::Json => print_json(&serde_json::json!({ "task_id": task_id })),
            OutputFormat::Human => {
                println!("{task_id}");
                Ok(())
            }
        }
    }
}

fn execute_pending(
    state: &DownloadStateManager,
    data_type: Option<&str>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let pending = state.get_pending_tasks(data_type);
    match format {
        OutputFormat::Json => {
            let infos: Vec<ProgressInfo> = pending.iter().map(ProgressInfo::from).collect();
            print_json(&infos)
        }
        OutputFormat::Human => {
            if pending.is_empty() {
                println!("No pending tasks");
                return Ok(());
            }
            println!("Found {} pending tasks:\n", pending.len());
            for cp in &pending {
                println!("{}", summary_line(cp));
            }
            Ok(())
        }
    }
}

fn execute_progress(
    state: &DownloadStateManager,
    task_id: &str,
    format: OutputFormat,
) -> Result<(), CliError> {
    let cp = state
        .load_checkpoint(task_id)
        .ok_or_else(|| CliError::TaskNotFound(task_id.to_string()))?;

    match format {
        OutputFormat::Json => print_json(&ProgressInfo::from(&cp)),
        OutputFormat::Human => {
            println!("Task: {}", cp.task_id);
            println!("Data type: {}", cp.data_type);
            println!("Range: {} to {}", cp.start_date, cp.end_date);
            println!("Status: {}", cp.status);
            println!(
                "Progress: {}/{} ({:.1}%)",
                cp.completed_items, cp.total_items, cp.progress_percent
            );
            let remaining = cp.remaining_symbols();
            if !remaining.is_empty() {
                println!("Remaining: {}", remaining.join(", "));
            }
            if let Some(error) = &cp.error_message {
                println!("Error: {error}");
            }
            if cp.retry_count > 0 {
                println!("Retries: {}", cp.retry_count);
            }
            println!("Updated: {}", cp.updated_at.to_rfc3339());
            Ok(())
        }
    }
}

fn execute_logs(
    state: &DownloadStateManager,
    task_id: &str,
    limit: usize,
    format: OutputFormat,
) -> Result<(), CliError> {
    let events = state.get_task_logs(task_id, limit);
    match format {
        OutputFormat::Json => print_json(&events),
        OutputFormat::Human => {
            if events.is_empty() {
                println!("No events for task {task_id}");
            }
            for event in &events {
                println!("{}", event_line(event));
            }
            Ok(())
        }
    }
}

fn execute_cancel(
    state: &DownloadStateManager,
    task_id: &str,
    format: OutputFormat,
) -> Result<(), CliError> {
    let cp = state
        .load_checkpoint(task_id)
        .ok_or_else(|| CliError::TaskNotFound(task_id.to_string()))?;
    if !state.mark_cancelled(task_id) {
        return Err(CliError::InvalidArgument(format!(
            "task {task_id} is {}; only running or paused tasks can be cancelled",
            cp.status
        )));
    }

    info!(task_id, "Task cancelled from CLI");
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "task_id": task_id,
            "cancelled": true,
        })),
        OutputFormat::Human => {
            println!("Cancelled task {task_id}");
            Ok(())
        }
    }
}

fn execute_clear(
    state: &DownloadStateManager,
    task_id: &str,
    format: OutputFormat,
) -> Result<(), CliError> {
    if !state.clear_checkpoint(task_id) {
        return Err(CliError::TaskNotFound(task_id.to_string()));
    }
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "task_id": task_id,
            "cleared": true,
        })),
        OutputFormat::Human => {
            println!("Cleared task {task_id}");
            Ok(())
        }
    }
}

fn execute_cleanup(
    state: &DownloadStateManager,
    days: u32,
    format: OutputFormat,
) -> Result<(), CliError> {
    let removed = state.cleanup_old_checkpoints(days);
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "days": days,
            "removed": removed,
        })),
        OutputFormat::Human => {
            println!("Removed {removed} completed tasks older than {days} days");
            Ok(())
        }
    }
}

fn summary_line(cp: &DownloadCheckpoint) -> String {
    let mut line = format!(
        "{} | {} | {} | {}/{} ({:.1}%) | updated {}",
        cp.task_id,
        cp.data_type,
        cp.status,
        cp.completed_items,
        cp.total_items,
        cp.progress_percent,
        cp.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(error) = &cp.error_message {
        line.push_str(&format!(" | {error}"));
    }
    line
}

fn event_line(event: &TaskEvent) -> String {
    format!(
        "{} [{}] {}",
        event.created_at.format("%Y-%m-%d %H:%M:%S%.3f"),
        event.event_type,
        event.message
    )
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::OutputError(format!("Failed to serialize output: {e}")))?;
    println!("{rendered}");
    Ok(())
}
