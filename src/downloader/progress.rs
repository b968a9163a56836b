//! Periodic progress reporting for long-running batches.
//!
//! The coordinator feeds every finished symbol into a [`ProgressState`],
//! which decides when a human-readable `[PROGRESS]` line is worth logging:
//! on every `min_percentage_step` of completion, or on a time interval once
//! the batch has been running for a while.

use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_BATCH_DURATION: Duration = Duration::from_secs(30);

/// Lightweight builder that controls update cadence.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    update_interval: Duration,
    min_percentage_step: f64,
}

impl ProgressTracker {
    /// Create a tracker with custom interval and percentage step.
    pub fn new(update_interval: Duration, min_percentage_step: f64) -> Self {
        Self {
            update_interval,
            min_percentage_step,
        }
    }

    /// Build a [`ProgressState`] for a batch of `total` symbols, `already_done` of
    /// which were finished by earlier runs.
    pub fn create_state(&self, total: u64, already_done: u64) -> ProgressState {
        let mut state = ProgressState::new(total);
        state.items_done = already_done;
        state.resumed_from = already_done;
        state.update_interval = self.update_interval;
        state.min_percentage_step = self.min_percentage_step;
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UPDATE_INTERVAL, 10.0)
    }
}

/// Progress tracking state for one batch.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Symbols finished (successfully or not), including earlier runs.
    pub items_done: u64,
    /// Symbols in the job.
    pub total: u64,
    /// Symbols already finished when this run started.
    pub resumed_from: u64,
    /// When this run started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Symbols per second in this run.
    pub current_rate: f64,
    /// Last reported completion percentage.
    pub last_reported_percentage: f64,
    /// Minimum percentage delta required to emit a new update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Create a state with default cadence.
    pub fn new(total: u64) -> Self {
        let now = Instant::now();
        Self {
            items_done: 0,
            total,
            resumed_from: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            last_reported_percentage: 0.0,
            min_percentage_step: 10.0,
        }
    }

    /// Record one more finished symbol.
    pub fn update(&mut self) {
        self.items_done = self.items_done.saturating_add(1).min(self.total);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.items_done.saturating_sub(self.resumed_from) as f64 / elapsed;
        }
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.items_done as f64 / self.total as f64) * 100.0
    }

    /// Whether a progress line should be emitted now.
    pub fn should_emit_update(&self) -> bool {
        if self.items_done == self.resumed_from {
            return false;
        }
        if self.percentage() - self.last_reported_percentage >= self.min_percentage_step {
            return true;
        }
        self.start_time.elapsed() >= MIN_BATCH_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Call after emitting a progress line.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        self.last_reported_percentage = self.percentage();
    }

    /// Estimate remaining time from the current rate.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let remaining = self.total.saturating_sub(self.items_done);
        if self.current_rate > 0.0 && remaining > 0 {
            Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
        } else {
            None
        }
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![
            format!("[PROGRESS] {}/{} symbols", self.items_done, self.total),
            format!("- {:.1}% complete", self.percentage()),
        ];

        if self.current_rate > 0.0 {
            parts.push(format!("at {:.2} symbols/sec", self.current_rate));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
