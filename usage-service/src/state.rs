// SPDX-License-Identifier: GPL-3.0-only

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use tracing::warn;
use usage_types::RunStateSnapshot;

/// Bookkeeping for the most recent run, readable without locking.
///
/// A run is in progress while `last_run_end < last_run_start`.
#[derive(Debug, Default)]
pub struct RunState {
    last_run_start: AtomicI64,
    last_run_end: AtomicI64,
    progress: AtomicUsize,
    total: AtomicUsize,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore persisted timestamps. A run that was in progress when the
    /// state was saved can never finish, so it is marked as ended.
    pub fn restore(last_run_start: i64, last_run_end: i64) -> Self {
        let state = Self {
            last_run_start: AtomicI64::new(last_run_start),
            last_run_end: AtomicI64::new(last_run_end),
            ..Self::default()
        };
        state.reconcile();
        state
    }

    pub fn reconcile(&self) {
        let start = self.last_run_start.load(Ordering::SeqCst);
        if self.last_run_end.load(Ordering::SeqCst) < start {
            warn!("previous usage computation did not finish, marking it as ended");
            self.last_run_end.store(start, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.last_run_end.load(Ordering::SeqCst) < self.last_run_start.load(Ordering::SeqCst)
    }

    /// Mark a run as started at `now_ms`.
    pub fn begin(&self, now_ms: i64) {
        self.progress.store(0, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        // The start must be strictly after the previous end for the run to
        // count as in progress, even within the same millisecond.
        let start = now_ms.max(self.last_run_end.load(Ordering::SeqCst) + 1);
        self.last_run_start.store(start, Ordering::SeqCst);
    }

    /// Mark the current run as completed at `now_ms`. A completed run always
    /// lasts at least a millisecond, which tells it apart from an abandoned one.
    pub fn complete(&self, now_ms: i64) {
        let start = self.last_run_start.load(Ordering::SeqCst);
        self.last_run_end.store(now_ms.max(start + 1), Ordering::SeqCst);
    }

    /// Mark the current run as ended without a meaningful duration.
    pub fn abandon(&self) {
        let start = self.last_run_start.load(Ordering::SeqCst);
        self.last_run_end.store(start, Ordering::SeqCst);
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn record_progress(&self) {
        self.progress.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> RunStateSnapshot {
        RunStateSnapshot {
            last_run_start: self.last_run_start.load(Ordering::SeqCst),
            last_run_end: self.last_run_end.load(Ordering::SeqCst),
            progress: self.progress.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        }
    }
}
