//! Scripted provider and recording sink shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use market_data_ingest::downloader::{BatchDownloadCoordinator, RetryPolicy};
use market_data_ingest::provider::{
    DataBatch, DataProvider, PersistenceSink, ProviderError, SinkError,
};
use market_data_ingest::resume::{
    CheckpointStatus, CheckpointStore, DownloadCheckpoint, DownloadStateManager,
    MemoryCheckpointStore, StoreError, StoreResult, TaskEvent,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the provider does on one call
#[derive(Debug, Clone)]
pub enum Reply {
    Records(usize),
    Empty,
    Fail(ProviderError),
    Panic,
    /// Panic whose payload panics again when dropped, killing the worker task
    PanicOnDrop,
}

/// Panic payload that panics once more when it is dropped
struct ExplodingPayload;

impl Drop for ExplodingPayload {
    fn drop(&mut self) {
        panic!("payload exploded on drop");
    }
}

/// Provider answering from per-symbol scripts.
///
/// Scripted replies are consumed in order; once a symbol's script runs out
/// its fallback reply is used, `Records(2)` unless overridden.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallbacks: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue replies for the next calls for `symbol`
    pub fn script(self, symbol: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(symbol.to_string(), replies.into());
        self
    }

    /// Reply used for `symbol` once its script is exhausted
    pub fn fallback(self, symbol: &str, reply: Reply) -> Self {
        self.set_fallback(symbol, reply);
        self
    }

    pub fn set_fallback(&self, symbol: &str, reply: Reply) {
        self.fallbacks
            .lock()
            .unwrap()
            .insert(symbol.to_string(), reply);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, symbol: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() == symbol)
            .count()
    }

    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, symbol: &str) -> Reply {
        if let Some(reply) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(symbol)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }
        self.fallbacks
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or(Reply::Records(2))
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    async fn fetch(
        &self,
        symbol: &str,
        _start_date: NaiveDate,
        _end_date: NaiveDate,
        data_type: &str,
    ) -> Result<DataBatch, ProviderError> {
        self.calls.lock().unwrap().push(symbol.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_reply(symbol) {
            Reply::Records(n) => Ok(DataBatch::new(
                symbol,
                data_type,
                (0..n).map(|i| serde_json::json!({ "row": i })).collect(),
            )),
            Reply::Empty => Ok(DataBatch::new(symbol, data_type, Vec::new())),
            Reply::Fail(e) => Err(e),
            Reply::Panic => panic!("provider exploded for {symbol}"),
            Reply::PanicOnDrop => std::panic::panic_any(ExplodingPayload),
        }
    }
}

/// Sink keeping the latest batch per symbol, with optional injected failures
#[derive(Default)]
pub struct RecordingSink {
    stored: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    store_calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` stores for `symbol`
    pub fn fail_next(self, symbol: &str, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(symbol.to_string(), times);
        self
    }

    pub fn stored_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.stored.lock().unwrap().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn records_for(&self, symbol: &str) -> Option<usize> {
        self.stored.lock().unwrap().get(symbol).copied()
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceSink for RecordingSink {
    async fn store(&self, symbol: &str, batch: &DataBatch) -> Result<usize, SinkError> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(symbol) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SinkError::WriteFailed(format!("disk full for {symbol}")));
                }
            }
        }
        self.stored
            .lock()
            .unwrap()
            .insert(symbol.to_string(), batch.len());
        Ok(batch.len())
    }
}

/// Store whose backend is down: every operation fails
#[derive(Default)]
pub struct UnavailableStore {
    attempts: AtomicUsize,
}

impl UnavailableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of operations attempted against the store
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn refuse<T>(&self, operation: &str) -> StoreResult<T> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable(format!("{operation}: backend offline")))
    }
}

impl CheckpointStore for UnavailableStore {
    fn put(&self, _checkpoint: &DownloadCheckpoint) -> StoreResult<()> {
        self.refuse("put")
    }

    fn get(&self, _task_id: &str) -> StoreResult<Option<DownloadCheckpoint>> {
        self.refuse("get")
    }

    fn delete(&self, _task_id: &str) -> StoreResult<bool> {
        self.refuse("delete")
    }

    fn scan(&self, _statuses: &[CheckpointStatus]) -> StoreResult<Vec<DownloadCheckpoint>> {
        self.refuse("scan")
    }

    fn append_event(&self, _event: &TaskEvent) -> StoreResult<()> {
        self.refuse("append_event")
    }

    fn read_events(&self, _task_id: &str) -> StoreResult<Vec<TaskEvent>> {
        self.refuse("read_events")
    }
}

/// Retry policy with millisecond delays so tests stay fast
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(4),
    )
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Everything a test needs to drive a batch against in-memory state
pub struct Harness {
    pub provider: Arc<ScriptedProvider>,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<MemoryCheckpointStore>,
    pub state: Arc<DownloadStateManager>,
}

impl Harness {
    pub fn new(provider: ScriptedProvider) -> Self {
        Self::with_sink(provider, RecordingSink::new())
    }

    pub fn with_sink(provider: ScriptedProvider, sink: RecordingSink) -> Self {
        let store = Arc::new(MemoryCheckpointStore::new());
        let state = Arc::new(DownloadStateManager::new(store.clone()));
        Self {
            provider: Arc::new(provider),
            sink: Arc::new(sink),
            store,
            state,
        }
    }

    pub fn coordinator(&self, max_workers: usize) -> BatchDownloadCoordinator {
        BatchDownloadCoordinator::new(self.provider.clone(), self.sink.clone(), self.state.clone())
            .with_max_workers(max_workers)
            .with_retry_policy(fast_retry(3))
    }
}
