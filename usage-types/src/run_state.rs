// SPDX-License-Identifier: GPL-3.0-only

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of the orchestrator's run bookkeeping.
///
/// Timestamps are milliseconds since the Unix epoch; zero means "never".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStateSnapshot {
    pub last_run_start: i64,
    pub last_run_end: i64,
    pub progress: usize,
    pub total: usize,
}

impl RunStateSnapshot {
    /// A run is in progress iff it ended before it last started.
    pub fn is_running(&self) -> bool {
        self.last_run_end < self.last_run_start
    }

    pub fn last_run_start_time(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.last_run_start)
    }

    pub fn last_run_end_time(&self) -> Option<DateTime<Utc>> {
        millis_to_time(self.last_run_end)
    }

    /// Duration of the last completed run; zero while a run is in progress
    /// or when the last run did not complete.
    pub fn last_run_duration(&self) -> TimeDelta {
        TimeDelta::milliseconds((self.last_run_end - self.last_run_start).max(0))
    }

    /// Percentage of registered listeners that have reported, 0–100.
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.progress as f64 * 100.0 / self.total as f64).clamp(0.0, 100.0)
    }
}

fn millis_to_time(millis: i64) -> Option<DateTime<Utc>> {
    if millis <= 0 {
        return None;
    }
    DateTime::from_timestamp_millis(millis)
}
