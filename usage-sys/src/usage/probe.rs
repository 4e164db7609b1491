// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;

const CANCEL_POLL: Duration = Duration::from_millis(25);

/// Periodic write to a sentinel outside the measured tree, or to the
/// modification time of a measured root itself.
///
/// While the filesystem is frozen (snapshot in progress) the write blocks,
/// and so does the walker. Probe failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct LivenessProbe {
    sentinel: Option<PathBuf>,
    interval: Duration,
    last_check: Instant,
}

impl LivenessProbe {
    pub fn new(sentinel: Option<PathBuf>, interval: Duration, now: Instant) -> Self {
        Self {
            sentinel,
            interval,
            last_check: now,
        }
    }

    /// Touch the sentinel if the interval has elapsed since the last touch.
    ///
    /// Returns `false` when cancelled while waiting for the write to finish.
    pub fn check(&mut self, now: Instant, cancel: &CancellationToken) -> bool {
        let Some(sentinel) = &self.sentinel else {
            return true;
        };
        if now.saturating_duration_since(self.last_check) <= self.interval {
            return true;
        }
        self.last_check = now;

        let (tx, rx) = mpsc::channel::<io::Result<()>>();
        let target = sentinel.clone();
        // A stuck write cannot be interrupted; the helper thread is left behind
        // if the walk is cancelled before the filesystem thaws.
        let spawned = thread::Builder::new()
            .name("usage-liveness-probe".into())
            .spawn(move || {
                let _ = tx.send(touch(&target));
            });
        if let Err(error) = spawned {
            tracing::warn!("cannot start liveness probe: {error}");
            return true;
        }

        loop {
            match rx.recv_timeout(CANCEL_POLL) {
                Ok(Ok(())) => return true,
                Ok(Err(error)) => {
                    tracing::warn!("liveness probe on {} failed: {error}", sentinel.display());
                    return true;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        return false;
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return true,
            }
        }
    }
}

/// Bump the modification time of `path`, creating an empty file if nothing
/// exists there. Directories are touched in place.
pub fn touch(path: &Path) -> io::Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            OpenOptions::new().create(true).append(true).open(path)?
        }
        Err(error) => return Err(error),
    };
    file.set_modified(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::OpenOptionsExt;

    use super::*;

    #[test]
    fn probe_touches_sentinel_once_interval_elapsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sentinel = dir.path().join("probe");
        let start = Instant::now();
        let cancel = CancellationToken::new();
        let mut probe = LivenessProbe::new(Some(sentinel.clone()), Duration::from_secs(10), start);

        assert!(probe.check(start + Duration::from_secs(5), &cancel));
        assert!(!sentinel.exists());

        assert!(probe.check(start + Duration::from_secs(11), &cancel));
        assert!(sentinel.exists());
    }

    #[test]
    fn probe_failure_does_not_stop_the_caller() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sentinel = dir.path().join("missing-dir").join("probe");
        let start = Instant::now();
        let cancel = CancellationToken::new();
        let mut probe = LivenessProbe::new(Some(sentinel.clone()), Duration::ZERO, start);

        assert!(probe.check(start + Duration::from_millis(1), &cancel));
        assert!(!sentinel.exists());
    }

    #[test]
    fn disabled_probe_is_a_no_op() {
        let start = Instant::now();
        let mut probe = LivenessProbe::new(None, Duration::ZERO, start);
        assert!(probe.check(start + Duration::from_secs(60), &CancellationToken::new()));
    }

    #[test]
    fn directory_sentinel_is_touched_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let before = SystemTime::now() - Duration::from_secs(3600);
        File::open(dir.path())
            .and_then(|file| file.set_modified(before))
            .expect("age directory");

        touch(dir.path()).expect("touch directory");

        let modified = std::fs::metadata(dir.path())
            .and_then(|metadata| metadata.modified())
            .expect("directory mtime");
        assert!(modified > before);
        assert_eq!(std::fs::read_dir(dir.path()).expect("list").count(), 0);
    }

    #[test]
    fn blocked_write_is_abandoned_on_cancellation() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Opening a FIFO blocks until the other end shows up, like a write on
        // a frozen filesystem.
        let fifo = dir.path().join("frozen");
        let raw = CString::new(fifo.as_os_str().as_bytes()).expect("fifo path");
        assert_eq!(unsafe { libc::mkfifo(raw.as_ptr(), 0o600) }, 0);

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let mut probe = LivenessProbe::new(Some(fifo.clone()), Duration::ZERO, start);
        let waiting = Instant::now();
        assert!(!probe.check(start + Duration::from_millis(1), &cancel));
        let waited = waiting.elapsed();
        canceller.join().expect("canceller thread");

        assert!(waited >= Duration::from_millis(150), "returned after {waited:?}");
        assert!(waited < Duration::from_secs(5), "returned after {waited:?}");

        // Let the stuck helper thread finish.
        let _ = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&fifo);
    }
}
