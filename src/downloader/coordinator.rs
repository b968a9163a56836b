//! Batch download coordinator
//!
//! Drives one batch job to completion: resolves the deterministic task id,
//! resumes or creates the checkpoint, fans symbols out to a bounded pool of
//! workers and folds their results back into the checkpoint one by one.
//! Workers never touch state; the control loop is the only writer.

use crate::downloader::config::{CoordinatorConfig, RetryPolicy};
use crate::downloader::job::{
    BatchOptions, BatchResult, ItemError, ProgressCallback, ProgressInfo, TaskOutcome,
    TaskOutcomeStatus,
};
use crate::downloader::progress::ProgressTracker;
use crate::downloader::DownloadError;
use crate::metrics::{record_batch_finished, record_retry_backoff, ItemMetrics};
use crate::provider::{DataProvider, PersistenceSink};
use crate::resume::{CheckpointStatus, DownloadCheckpoint, DownloadStateManager};
use crate::shutdown::SharedShutdown;
use chrono::NaiveDate;
use futures_util::FutureExt;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

/// Executes one symbol: provider fetch, then sink store, under the retry policy
struct ItemWorker {
    provider: Arc<dyn DataProvider>,
    sink: Arc<dyn PersistenceSink>,
    retry: RetryPolicy,
    shutdown: Option<SharedShutdown>,
}

impl ItemWorker {
    async fn run(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
    ) -> Result<usize, ItemError> {
        let metrics = ItemMetrics::start(data_type, symbol);
        let result = self
            .fetch_and_store(symbol, start_date, end_date, data_type)
            .await;
        match &result {
            Ok(records) => metrics.record_success(*records),
            Err(ItemError::Interrupted) => debug!(symbol, "Symbol interrupted by shutdown"),
            Err(e) => metrics.record_failure(&e.to_string()),
        }
        result
    }

    async fn fetch_and_store(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
    ) -> Result<usize, ItemError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last_error = match self
                .provider
                .fetch(symbol, start_date, end_date, data_type)
                .await
            {
                Ok(batch) if batch.is_empty() => {
                    warn!(symbol, attempt, "Provider returned no data");
                    return Err(ItemError::EmptyResult);
                }
                // The sink is idempotent, so a failed store is retried like a fetch
                Ok(batch) => match self.sink.store(symbol, &batch).await {
                    Ok(written) => {
                        debug!(symbol, attempt, records = written, "Batch stored");
                        return Ok(written);
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) if e.is_retryable() => e.to_string(),
                Err(e) => {
                    warn!(symbol, error = %e, "Permanent provider error, not retrying");
                    return Err(ItemError::Permanent(e));
                }
            };

            if attempt >= self.retry.max_attempts {
                error!(
                    symbol,
                    attempts = attempt,
                    error = %last_error,
                    "Max attempts exceeded"
                );
                return Err(ItemError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }

            let backoff = self.retry.backoff(attempt - 1);
            warn!(
                symbol,
                attempt,
                max_attempts = self.retry.max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %last_error,
                "Retrying after backoff delay"
            );
            record_retry_backoff(data_type, backoff, attempt);

            if !self.sleep_unless_shutdown(backoff).await {
                return Err(ItemError::Interrupted);
            }
        }
    }

    /// Returns `false` when shutdown cut the sleep short
    async fn sleep_unless_shutdown(&self, backoff: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(backoff).await;
                true
            }
        }
    }
}

/// Running totals of one `download_batch` invocation
struct BatchTally {
    total: u64,
    processed: u64,
    success: u64,
    completed_symbols: BTreeSet<String>,
    errors: BTreeMap<String, String>,
    interrupted: bool,
}

impl BatchTally {
    fn into_result(self, task_id: String) -> BatchResult {
        BatchResult {
            task_id,
            total: self.total,
            completed: self.processed,
            success: self.success,
            failed: self.errors.len() as u64,
            errors: self.errors,
        }
    }
}

/// Orchestrates resumable batch downloads under bounded concurrency
pub struct BatchDownloadCoordinator {
    provider: Arc<dyn DataProvider>,
    sink: Arc<dyn PersistenceSink>,
    state: Arc<DownloadStateManager>,
    config: CoordinatorConfig,
    progress_tracker: ProgressTracker,
    shutdown: Option<SharedShutdown>,
}

impl BatchDownloadCoordinator {
    /// Create a coordinator with default configuration
    pub fn new(
        provider: Arc<dyn DataProvider>,
        sink: Arc<dyn PersistenceSink>,
        state: Arc<DownloadStateManager>,
    ) -> Self {
        Self {
            provider,
            sink,
            state,
            config: CoordinatorConfig::default(),
            progress_tracker: ProgressTracker::default(),
            shutdown: None,
        }
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the worker pool size
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.config = self.config.with_max_workers(max_workers);
        self
    }

    /// Set the per-symbol retry policy
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config = self.config.with_retry(retry);
        self
    }

    /// Attach a shared shutdown handle for graceful pausing.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Override progress logging cadence.
    pub fn with_progress_tracker(mut self, tracker: ProgressTracker) -> Self {
        self.progress_tracker = tracker;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// State manager the coordinator writes through
    pub fn state(&self) -> &Arc<DownloadStateManager> {
        &self.state
    }

    /// Deterministic task id for a job.
    ///
    /// SHA-256 over the data type, the sorted and de-duplicated symbols, and
    /// both ISO dates. Symbol order does not matter.
    pub fn generate_task_id(
        data_type: &str,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> String {
        let mut sorted: Vec<&str> = symbols.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        // Unit/record separators keep field boundaries unambiguous
        let mut hasher = Sha256::new();
        hasher.update(data_type.as_bytes());
        hasher.update(b"\x1f");
        for symbol in sorted {
            hasher.update(symbol.as_bytes());
            hasher.update(b"\x1e");
        }
        hasher.update(b"\x1f");
        hasher.update(start_date.format("%Y-%m-%d").to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(end_date.format("%Y-%m-%d").to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Download `symbols` for `[start_date, end_date]`, resuming an earlier
    /// run of the same job when `options.resume_if_exists` is set.
    ///
    /// Per-symbol failures are reported in the returned [`BatchResult`]; an
    /// error is returned only for malformed requests.
    pub async fn download_batch(
        &self,
        symbols: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
        options: BatchOptions,
    ) -> Result<BatchResult, DownloadError> {
        let symbols = validate_request(symbols, start_date, end_date, data_type)?;
        let task_id = Self::generate_task_id(data_type, &symbols, start_date, end_date);

        let span = tracing::info_span!(
            "download_batch",
            task_id = %task_id,
            data_type = %data_type,
            symbols = symbols.len(),
            start_date = %start_date,
            end_date = %end_date
        );

        Ok(self
            .run_batch(task_id, symbols, start_date, end_date, data_type, options)
            .instrument(span)
            .await)
    }

    async fn run_batch(
        &self,
        task_id: String,
        symbols: Vec<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
        options: BatchOptions,
    ) -> BatchResult {
        let total = symbols.len() as u64;
        let existing = if options.resume_if_exists {
            self.state.load_checkpoint(&task_id)
        } else {
            None
        };

        // `floor` keeps the persisted counter monotonic across runs
        let (remaining, completed_symbols, floor) = match existing {
            Some(cp) if cp.status == CheckpointStatus::Completed => {
                info!("Task already completed; nothing to download");
                return BatchResult {
                    task_id,
                    total,
                    completed: total,
                    success: total,
                    failed: 0,
                    errors: BTreeMap::new(),
                };
            }
            Some(cp) if cp.is_cancelled() => {
                warn!("Task was cancelled; not resuming");
                return BatchResult {
                    task_id,
                    total,
                    completed: cp.completed_items,
                    success: cp.completed_symbols.len() as u64,
                    failed: 0,
                    errors: BTreeMap::new(),
                };
            }
            Some(mut cp) => {
                let remaining: Vec<String> = symbols
                    .iter()
                    .filter(|s| !cp.completed_symbols.contains(*s))
                    .cloned()
                    .collect();
                info!(
                    previous_status = %cp.status,
                    remaining = remaining.len(),
                    total,
                    "Resuming from checkpoint"
                );
                let previous_status = cp.status;
                cp.status = CheckpointStatus::Running;
                cp.error_message = None;
                if !self.state.save_checkpoint(&cp) {
                    warn!("Failed to persist resumed checkpoint; continuing");
                }
                self.state.log_event(
                    &task_id,
                    "resumed",
                    &format!(
                        "Resuming with {} of {} symbols remaining",
                        remaining.len(),
                        total
                    ),
                    Some(serde_json::json!({
                        "previous_status": previous_status.as_str(),
                        "completed_symbols": cp.completed_symbols.len(),
                    })),
                );
                (remaining, cp.completed_symbols, cp.completed_items)
            }
            None => {
                let checkpoint =
                    DownloadCheckpoint::new(&task_id, data_type, &symbols, start_date, end_date);
                if !self.state.save_checkpoint(&checkpoint) {
                    warn!("Failed to persist initial checkpoint; continuing");
                }
                info!(total, "Starting new batch");
                self.state.log_event(
                    &task_id,
                    "started",
                    &format!("Started download of {total} symbols"),
                    Some(serde_json::json!({
                        "data_type": data_type,
                        "start_date": start_date.to_string(),
                        "end_date": end_date.to_string(),
                    })),
                );
                (symbols, BTreeSet::new(), 0)
            }
        };

        let already_done = total - remaining.len() as u64;
        if remaining.is_empty() {
            info!("No symbols remaining; marking task completed");
            self.state.mark_completed(&task_id);
            record_batch_finished(data_type, CheckpointStatus::Completed.as_str());
            return BatchResult {
                task_id,
                total,
                completed: total,
                success: total,
                failed: 0,
                errors: BTreeMap::new(),
            };
        }

        let mut tally = BatchTally {
            total,
            processed: already_done,
            success: already_done,
            completed_symbols,
            errors: BTreeMap::new(),
            interrupted: false,
        };
        self.run_workers(
            &task_id, remaining, start_date, end_date, data_type, floor, &options, &mut tally,
        )
        .await;

        self.finalize(task_id, data_type, tally)
    }

    /// Fan symbols out to the worker pool and fold results into the checkpoint
    #[allow(clippy::too_many_arguments)]
    async fn run_workers(
        &self,
        task_id: &str,
        remaining: Vec<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
        floor: u64,
        options: &BatchOptions,
        tally: &mut BatchTally,
    ) {
        let mut progress = self
            .progress_tracker
            .create_state(tally.total, tally.processed);
        let mut queue = remaining.into_iter();
        let mut workers: JoinSet<(String, Result<usize, ItemError>)> = JoinSet::new();
        // Symbol per worker task, so a task that dies still reports its symbol
        let mut in_flight: HashMap<task::Id, String> = HashMap::new();

        loop {
            while workers.len() < self.config.max_workers && !self.shutdown_requested() {
                let Some(symbol) = queue.next() else { break };
                let worker = self.worker();
                let data_type = data_type.to_string();
                let owned = symbol.clone();
                let handle = workers.spawn(async move {
                    let outcome = AssertUnwindSafe(worker.run(&owned, start_date, end_date, &data_type))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(ItemError::Panicked(panic_message(&*panic))));
                    (owned, outcome)
                });
                in_flight.insert(handle.id(), symbol);
            }

            let Some(joined) = workers.join_next_with_id().await else {
                break;
            };
            let (symbol, outcome) = match joined {
                Ok((id, pair)) => {
                    in_flight.remove(&id);
                    pair
                }
                Err(e) => {
                    let Some(symbol) = in_flight.remove(&e.id()) else {
                        error!(error = %e, "Worker task for unknown symbol aborted");
                        continue;
                    };
                    error!(symbol = %symbol, error = %e, "Worker task aborted");
                    let failure = if e.is_panic() {
                        ItemError::Panicked(e.to_string())
                    } else {
                        ItemError::Aborted(e.to_string())
                    };
                    (symbol, Err(failure))
                }
            };

            match outcome {
                Ok(_) => {
                    tally.completed_symbols.insert(symbol.clone());
                    tally.success += 1;
                }
                Err(ItemError::Interrupted) => {
                    tally.interrupted = true;
                    continue;
                }
                Err(e) => {
                    tally.errors.insert(symbol.clone(), e.to_string());
                }
            }

            tally.processed += 1;
            progress.update();
            if progress.should_emit_update() {
                info!("{}", progress.format_progress());
                progress.mark_emitted();
            }

            if let Some(callback) = &options.progress_callback {
                invoke_callback(callback, tally.processed, tally.total, &symbol);
            }

            // Counters and completed set go out in one write
            let persisted = tally.processed.max(floor).min(tally.total);
            if !self.state.update_progress(
                task_id,
                persisted,
                Some(tally.total),
                None,
                Some(&tally.completed_symbols),
            ) {
                warn!(symbol = %symbol, "Progress update not persisted");
            }
        }

        if queue.len() > 0 {
            tally.interrupted = true;
        }
    }

    fn finalize(&self, task_id: String, data_type: &str, tally: BatchTally) -> BatchResult {
        // A cancel issued mid-run stays terminal, even if shutdown also hit
        if self
            .state
            .load_checkpoint(&task_id)
            .is_some_and(|cp| cp.is_cancelled())
        {
            warn!("Task cancelled while running; keeping cancelled status");
            return tally.into_result(task_id);
        }

        if tally.interrupted {
            let undone = tally.total - tally.processed;
            info!(undone, "Shutdown requested - pausing task");
            self.state
                .mark_paused(&task_id, &format!("Shutdown requested with {undone} symbols not attempted"));
            record_batch_finished(data_type, CheckpointStatus::Paused.as_str());
            return tally.into_result(task_id);
        }

        let failed = tally.errors.len();
        if failed == 0 {
            info!(success = tally.success, "Batch completed");
            self.state.mark_completed(&task_id);
            record_batch_finished(data_type, CheckpointStatus::Completed.as_str());
        } else {
            let summary = format!("{} succeeded, {} failed", tally.success, failed);
            warn!(summary = %summary, "Batch finished with failures");
            self.state.mark_failed(&task_id, &summary);
            record_batch_finished(data_type, CheckpointStatus::Failed.as_str());
        }
        tally.into_result(task_id)
    }

    /// Download one symbol with retries.
    ///
    /// Returns the number of records stored.
    pub async fn download_single_with_retry(
        &self,
        symbol: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
        data_type: &str,
    ) -> Result<usize, ItemError> {
        self.worker()
            .run(symbol, start_date, end_date, data_type)
            .await
    }

    /// Re-run every pending task, optionally restricted to one data type.
    ///
    /// Each task runs with its own persisted symbols and dates; one task's
    /// failure does not stop the others. Cancelled tasks are skipped.
    pub async fn resume_failed_downloads(
        &self,
        data_type: Option<&str>,
        progress_callback: Option<ProgressCallback>,
    ) -> Vec<TaskOutcome> {
        let pending = self.state.get_pending_tasks(data_type);
        info!(count = pending.len(), "Resuming pending tasks");

        let mut outcomes = Vec::with_capacity(pending.len());
        for cp in pending {
            if self.shutdown_requested() {
                info!("Shutdown requested - leaving remaining tasks pending");
                break;
            }

            let outcome = |status, result, error| TaskOutcome {
                task_id: cp.task_id.clone(),
                data_type: cp.data_type.clone(),
                status,
                result,
                error,
            };

            if cp.is_cancelled() {
                info!(task_id = %cp.task_id, "Skipping cancelled task");
                outcomes.push(outcome(TaskOutcomeStatus::Skipped, None, None));
                continue;
            }

            let symbols = cp.symbol_list();
            let expected = Self::generate_task_id(&cp.data_type, &symbols, cp.start_date, cp.end_date);
            if expected != cp.task_id {
                let err = DownloadError::TaskIdMismatch {
                    stored: cp.task_id.clone(),
                    computed: expected,
                };
                error!(error = %err, "Checkpoint bookkeeping is inconsistent");
                outcomes.push(outcome(TaskOutcomeStatus::Failed, None, Some(err.to_string())));
                continue;
            }

            let options = BatchOptions {
                progress_callback: progress_callback.clone(),
                resume_if_exists: true,
            };
            match self
                .download_batch(&symbols, cp.start_date, cp.end_date, &cp.data_type, options)
                .await
            {
                Ok(result) => {
                    let status = if result.is_complete() {
                        TaskOutcomeStatus::Success
                    } else {
                        TaskOutcomeStatus::Failed
                    };
                    outcomes.push(outcome(status, Some(result), None));
                }
                Err(e) => {
                    error!(task_id = %cp.task_id, error = %e, "Failed to resume task");
                    outcomes.push(outcome(TaskOutcomeStatus::Failed, None, Some(e.to_string())));
                }
            }
        }
        outcomes
    }

    /// Read-only progress view of a task
    pub fn get_download_progress(&self, task_id: &str) -> Option<ProgressInfo> {
        self.state
            .load_checkpoint(task_id)
            .map(|cp| ProgressInfo::from(&cp))
    }

    /// Cancel a `running` or `paused` task.
    ///
    /// In-flight symbols are not interrupted; the task is marked failed with
    /// `cancelled by user` so later invocations do no further work.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        match self.state.load_checkpoint(task_id) {
            None => {
                warn!(task_id, "Cannot cancel unknown task");
                false
            }
            Some(cp) if !matches!(cp.status, CheckpointStatus::Running | CheckpointStatus::Paused) => {
                warn!(task_id, status = %cp.status, "Task cannot be cancelled in its current status");
                false
            }
            Some(_) => self.state.mark_cancelled(task_id),
        }
    }

    fn worker(&self) -> ItemWorker {
        ItemWorker {
            provider: Arc::clone(&self.provider),
            sink: Arc::clone(&self.sink),
            retry: self.config.retry,
            shutdown: self.shutdown.clone(),
        }
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|s| s.is_shutdown_requested())
            .unwrap_or(false)
    }
}

/// Check request prerequisites and collapse duplicate symbols (first occurrence wins)
fn validate_request(
    symbols: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
    data_type: &str,
) -> Result<Vec<String>, DownloadError> {
    if data_type.trim().is_empty() {
        return Err(DownloadError::ValidationError(
            "data type must not be empty".to_string(),
        ));
    }
    if start_date > end_date {
        return Err(DownloadError::ValidationError(format!(
            "start date {start_date} is after end date {end_date}"
        )));
    }
    if let Some(blank) = symbols.iter().position(|s| s.trim().is_empty()) {
        return Err(DownloadError::ValidationError(format!(
            "symbol at position {blank} is empty"
        )));
    }

    let mut seen = HashSet::new();
    let unique: Vec<String> = symbols
        .iter()
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect();
    if unique.is_empty() {
        return Err(DownloadError::ValidationError(
            "at least one symbol is required".to_string(),
        ));
    }
    Ok(unique)
}

/// Run the user callback; a panic inside it never aborts the batch
fn invoke_callback(callback: &ProgressCallback, completed: u64, total: u64, symbol: &str) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(completed, total, symbol)));
    if let Err(panic) = result {
        warn!(
            symbol,
            error = %panic_message(&*panic),
            "Progress callback panicked; ignoring"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
