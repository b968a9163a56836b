//! Download configuration constants and retry policy

use std::time::Duration;

/// Default number of symbols fetched concurrently.
/// Small enough to stay polite with provider rate limits.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// Maximum attempts per symbol (first try included).
/// 5 attempts with exponential backoff rides out transient network issues
/// without looping on persistent failures (max total wait ~1 minute).
pub const MAX_ATTEMPTS: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
/// Caps exponential growth (retry 5 = 16s, retry 6 = 32s capped to 30s).
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Default audit window for completed checkpoints, in days
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Default number of events returned by task log queries
pub const DEFAULT_LOG_LIMIT: usize = 50;

/// Calculate exponential backoff delay with the default bounds
pub fn calculate_backoff(retry_count: u32) -> Duration {
    RetryPolicy::default().backoff(retry_count)
}

/// Exponential backoff retry policy for a single symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is raised to at least 1
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `retry_count` (0-based): `base * 2^n`, capped
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            MAX_ATTEMPTS,
            Duration::from_millis(INITIAL_BACKOFF_MS),
            Duration::from_millis(MAX_BACKOFF_MS),
        )
    }
}

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker pool size
    pub max_workers: usize,
    /// Per-symbol retry policy
    pub retry: RetryPolicy,
}

impl CoordinatorConfig {
    /// Set the worker pool size (at least 1)
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Set the retry policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}
