//! Monotonic progress tracking for a preload run.
//!
//! The advertised percentage is the maximum percentage computed so far,
//! clamped to [0, 100]. Out-of-order recomputation can therefore never make
//! the indicator move backward, and completion forces exactly 100 regardless
//! of intermediate rounding. An empty run is born complete.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared, lock-free progress state for one preload run.
pub struct ProgressTracker {
    total: usize,
    completed: AtomicUsize,
    loaded: AtomicUsize,
    failed: AtomicUsize,
    max_percent: AtomicU64,
}

/// Point-in-time view of a run's progress.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub loaded: usize,
    pub failed: usize,
    pub percent: u64,
    pub done: bool,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            loaded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            max_percent: AtomicU64::new(if total == 0 { 100 } else { 0 }),
        }
    }

    /// Count one item settled as loaded.
    pub fn record_loaded(&self) {
        self.loaded.fetch_add(1, Ordering::SeqCst);
        self.record_settled();
    }

    /// Count one item settled as failed. Failures advance progress exactly
    /// like successes; they never stall the indicator.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.record_settled();
    }

    fn record_settled(&self) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        let percent = self.percent_for(completed);
        self.max_percent.fetch_max(percent, Ordering::SeqCst);
    }

    fn percent_for(&self, completed: usize) -> u64 {
        if self.total == 0 || completed >= self.total {
            return 100;
        }
        ((completed as u64 * 100) / self.total as u64).min(100)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let completed = self.completed.load(Ordering::SeqCst);
        let done = completed >= self.total;
        let percent = if done {
            100
        } else {
            self.max_percent.load(Ordering::SeqCst).min(100)
        };

        ProgressSnapshot {
            total: self.total,
            completed,
            loaded: self.loaded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            percent,
            done,
        }
    }
}
