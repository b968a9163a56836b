//! Ingestion metrics
//!
//! Emitted through the `metrics` facade; they are no-ops until the embedding
//! application installs a recorder (e.g. a Prometheus exporter).

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(
        "ingest_items_total",
        Unit::Count,
        "Symbols processed, labelled by outcome"
    );
    describe_counter!(
        "ingest_retries_total",
        Unit::Count,
        "Retry attempts after transient provider or sink errors"
    );
    describe_counter!(
        "ingest_batches_total",
        Unit::Count,
        "Finished batches, labelled by final checkpoint status"
    );
    describe_histogram!(
        "ingest_item_duration_seconds",
        Unit::Seconds,
        "Wall time spent on one symbol including retries"
    );
    describe_histogram!(
        "ingest_retry_backoff_seconds",
        Unit::Seconds,
        "Backoff delay applied before a retry"
    );
}

/// Record a retry backoff
pub fn record_retry_backoff(data_type: &str, duration: Duration, attempt: u32) {
    counter!("ingest_retries_total", "data_type" => data_type.to_string()).increment(1);
    histogram!("ingest_retry_backoff_seconds", "attempt" => attempt.to_string())
        .record(duration.as_secs_f64());
}

/// Record the final status of a batch
pub fn record_batch_finished(data_type: &str, status: &str) {
    counter!(
        "ingest_batches_total",
        "data_type" => data_type.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Timing and outcome of a single symbol
#[derive(Debug)]
pub struct ItemMetrics {
    data_type: String,
    symbol: String,
    start_time: Instant,
}

impl ItemMetrics {
    /// Start tracking one symbol
    pub fn start(data_type: impl Into<String>, symbol: impl Into<String>) -> Self {
        let data_type = data_type.into();
        let symbol = symbol.into();
        debug!(data_type = %data_type, symbol = %symbol, "Symbol download started");
        Self {
            data_type,
            symbol,
            start_time: Instant::now(),
        }
    }

    /// Record a stored symbol
    pub fn record_success(&self, records: usize) {
        let duration = self.record("success");
        info!(
            data_type = %self.data_type,
            symbol = %self.symbol,
            records,
            duration_ms = duration.as_millis() as u64,
            "Symbol stored"
        );
    }

    /// Record a failed symbol
    pub fn record_failure(&self, error: &str) {
        let duration = self.record("failure");
        warn!(
            data_type = %self.data_type,
            symbol = %self.symbol,
            error,
            duration_ms = duration.as_millis() as u64,
            "Symbol failed"
        );
    }

    fn record(&self, outcome: &'static str) -> Duration {
        let duration = self.start_time.elapsed();
        counter!(
            "ingest_items_total",
            "data_type" => self.data_type.clone(),
            "outcome" => outcome,
        )
        .increment(1);
        histogram!("ingest_item_duration_seconds", "data_type" => self.data_type.clone())
            .record(duration.as_secs_f64());
        duration
    }
}
