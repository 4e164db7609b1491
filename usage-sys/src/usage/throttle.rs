// SPDX-License-Identifier: GPL-3.0-only

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Granularity of cancellation checks while sleeping.
const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Keeps the walker at roughly half of the wall-clock time.
///
/// Once more than `chunk` has been spent walking since the last pause, the
/// walker sleeps for as long as it just worked.
#[derive(Debug)]
pub struct Throttle {
    chunk: Duration,
    chunk_start: Instant,
}

impl Throttle {
    pub fn new(chunk: Duration, now: Instant) -> Self {
        Self {
            chunk,
            chunk_start: now,
        }
    }

    /// How long to pause at `now`, if a pause is due.
    pub fn due(&self, now: Instant) -> Option<Duration> {
        let worked = now.saturating_duration_since(self.chunk_start);
        (worked > self.chunk).then_some(worked)
    }

    /// Start a new chunk of work at `now`.
    pub fn restart(&mut self, now: Instant) {
        self.chunk_start = now;
    }
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `false` when the sleep was cut short by cancellation.
pub fn cancellable_sleep(cancel: &CancellationToken, duration: Duration) -> bool {
    let deadline = Instant::now() + duration;

    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(CANCEL_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_due_only_after_a_full_chunk() {
        let start = Instant::now();
        let throttle = Throttle::new(Duration::from_millis(100), start);

        assert_eq!(throttle.due(start + Duration::from_millis(50)), None);
        assert_eq!(throttle.due(start + Duration::from_millis(100)), None);
        assert_eq!(
            throttle.due(start + Duration::from_millis(150)),
            Some(Duration::from_millis(150))
        );
    }

    #[test]
    fn restart_begins_a_new_chunk() {
        let start = Instant::now();
        let mut throttle = Throttle::new(Duration::from_millis(100), start);
        let later = start + Duration::from_millis(300);
        throttle.restart(later);

        assert_eq!(throttle.due(later + Duration::from_millis(20)), None);
    }

    #[test]
    fn cancelled_sleep_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let started = Instant::now();
        assert!(!cancellable_sleep(&cancel, Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn uncancelled_sleep_runs_to_completion() {
        let cancel = CancellationToken::new();
        let started = Instant::now();
        assert!(cancellable_sleep(&cancel, Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
