// SPDX-License-Identifier: GPL-3.0-only

use std::fs::{self, ReadDir};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::capacity::{CapacitySource, StatvfsCapacity, used_bytes};
use super::listener::ListenerRegistry;
use super::paths::{collapse_roots, normalize};
use super::probe::LivenessProbe;
use super::throttle::{Throttle, cancellable_sleep};
use crate::error::{Result, UsageError};

/// Tuning knobs for a walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Work this long before pausing for an equal amount of time.
    pub chunk: Duration,
    /// Minimum time between two liveness probe writes.
    pub liveness_interval: Duration,
    /// File touched by the liveness probe; `None` disables the probe.
    pub liveness_sentinel: Option<PathBuf>,
    /// Do not descend into directories on another device than their root.
    pub same_filesystem: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            chunk: Duration::from_millis(100),
            liveness_interval: Duration::from_secs(10),
            liveness_sentinel: None,
            same_filesystem: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WalkSummary {
    pub bytes: u64,
    pub files: u64,
    pub dirs: u64,
    pub skipped_errors: u64,
    pub throttle_pauses: u64,
    pub paused: Duration,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum WalkOutcome {
    Completed(WalkSummary),
    /// Shutdown was requested while the walker was paused.
    Cancelled,
}

impl WalkOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WalkOutcome::Cancelled)
    }
}

/// Compute disk usage of a list of paths. Results are published through
/// listeners registered for interesting directories, so each tree is walked
/// only once.
///
/// The walk is throttled to leave I/O bandwidth to other work on the host.
pub struct UsageComputation {
    listeners: ListenerRegistry,
    options: WalkOptions,
    cancel: CancellationToken,
    capacity: Box<dyn CapacitySource>,
}

impl UsageComputation {
    pub fn new(options: WalkOptions) -> Self {
        Self {
            listeners: ListenerRegistry::new(),
            options,
            cancel: CancellationToken::new(),
            capacity: Box::new(StatvfsCapacity),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_capacity_source(mut self, capacity: Box<dyn CapacitySource>) -> Self {
        self.capacity = capacity;
        self
    }

    /// Register `listener` for the directory at `path`. Registering the same
    /// path again replaces the previous listener.
    pub fn add_listener<F>(&mut self, path: &Path, listener: F)
    where
        F: FnOnce(&Path, i64, u64) -> anyhow::Result<()> + Send + 'static,
    {
        self.listeners.insert(path, Box::new(listener));
    }

    /// Number of listeners still waiting for a notification.
    pub fn item_count(&self) -> usize {
        self.listeners.len()
    }

    /// Walk every root once, notifying listeners in post-order.
    ///
    /// Roots nested inside another root are folded into it. Failing to open
    /// a root aborts the computation; unreadable entries below a root only
    /// count as skipped.
    pub fn compute(&mut self, roots: &[PathBuf]) -> Result<WalkOutcome> {
        let started = Instant::now();

        let mut normalized = Vec::with_capacity(roots.len());
        for root in roots {
            let path = normalize(root).map_err(|source| UsageError::RootUnreachable {
                path: root.clone(),
                source,
            })?;
            normalized.push(path);
        }

        let mut walker = Walker {
            listeners: &mut self.listeners,
            options: &self.options,
            cancel: &self.cancel,
            throttle: Throttle::new(self.options.chunk, started),
            probe: LivenessProbe::new(
                self.options.liveness_sentinel.clone(),
                self.options.liveness_interval,
                started,
            ),
            summary: WalkSummary::default(),
        };

        for root in collapse_roots(&normalized) {
            if walker.cancel.is_cancelled() || !walker.walk_root(&root)? {
                tracing::debug!("usage walk cancelled at {}", root.display());
                return Ok(WalkOutcome::Cancelled);
            }
        }

        let mut summary = walker.summary;
        summary.elapsed = started.elapsed();
        Ok(WalkOutcome::Completed(summary))
    }

    /// Report `total - usable` of the filesystem under each root to that
    /// root's listener, without walking anything. Returns how many listeners
    /// were notified.
    pub fn compute_aggregate(&mut self, roots: &[PathBuf]) -> usize {
        roots
            .iter()
            .filter(|root| self.compute_aggregate_of(root, root))
            .count()
    }

    /// Report the usage of the filesystem holding `measured` to the listener
    /// registered for `listener`. Returns whether a listener was notified.
    pub fn compute_aggregate_of(&mut self, listener: &Path, measured: &Path) -> bool {
        let dir = match normalize(listener) {
            Ok(dir) => dir,
            Err(error) => {
                tracing::warn!("cannot resolve {}: {error}", listener.display());
                return false;
            }
        };
        if !self.listeners.contains(&dir) {
            return false;
        }

        let usage = used_bytes(self.capacity.as_ref(), measured);
        self.listeners.notify(&dir, usage, 0)
    }
}

/// One open directory on the walk stack.
struct Frame {
    path: PathBuf,
    entries: Option<ReadDir>,
    bytes: u64,
    count: u64,
}

impl Frame {
    fn new(path: PathBuf, entries: Option<ReadDir>) -> Self {
        Self {
            path,
            entries,
            bytes: 0,
            count: 0,
        }
    }
}

struct Walker<'a> {
    listeners: &'a mut ListenerRegistry,
    options: &'a WalkOptions,
    cancel: &'a CancellationToken,
    throttle: Throttle,
    probe: LivenessProbe,
    summary: WalkSummary,
}

impl Walker<'_> {
    /// Returns `Ok(false)` when cancelled.
    fn walk_root(&mut self, root: &Path) -> Result<bool> {
        let unreachable = |source| UsageError::RootUnreachable {
            path: root.to_path_buf(),
            source,
        };

        let root_metadata = fs::symlink_metadata(root).map_err(unreachable)?;
        if !root_metadata.is_dir() {
            self.summary.files += 1;
            self.summary.bytes += root_metadata.len();
            return Ok(true);
        }

        let entries = fs::read_dir(root).map_err(unreachable)?;
        let root_dev = root_metadata.dev();

        if !self.probe.check(Instant::now(), self.cancel) {
            return Ok(false);
        }
        let mut stack = vec![Frame::new(root.to_path_buf(), Some(entries))];

        loop {
            let next = match stack.last_mut() {
                Some(frame) => frame.entries.as_mut().and_then(Iterator::next),
                None => break,
            };

            match next {
                Some(Ok(entry)) => {
                    let path = entry.path();
                    let metadata = match entry.metadata() {
                        Ok(metadata) => metadata,
                        Err(error) => {
                            tracing::debug!("skipping {}: {error}", path.display());
                            self.summary.skipped_errors += 1;
                            continue;
                        }
                    };

                    if !metadata.is_dir() {
                        if let Some(frame) = stack.last_mut() {
                            frame.bytes += metadata.len();
                            frame.count += 1;
                        }
                        self.summary.files += 1;
                        self.summary.bytes += metadata.len();
                        continue;
                    }

                    if self.options.same_filesystem && metadata.dev() != root_dev {
                        continue;
                    }
                    if !self.probe.check(Instant::now(), self.cancel) {
                        return Ok(false);
                    }

                    let entries = match fs::read_dir(&path) {
                        Ok(entries) => Some(entries),
                        Err(error) => {
                            tracing::debug!("cannot list {}: {error}", path.display());
                            self.summary.skipped_errors += 1;
                            None
                        }
                    };
                    stack.push(Frame::new(path, entries));
                }
                Some(Err(error)) => {
                    tracing::debug!("unreadable entry: {error}");
                    self.summary.skipped_errors += 1;
                }
                None => {
                    let Some(done) = stack.pop() else {
                        break;
                    };
                    self.summary.dirs += 1;

                    if !self.pause_if_due() {
                        return Ok(false);
                    }

                    let bytes = i64::try_from(done.bytes).unwrap_or(i64::MAX);
                    self.listeners.notify(&done.path, bytes, done.count);

                    if let Some(parent) = stack.last_mut() {
                        parent.bytes += done.bytes;
                        parent.count += done.count;
                    }
                }
            }
        }

        Ok(true)
    }

    /// Sleep as long as the walker just worked, once a chunk is used up.
    fn pause_if_due(&mut self) -> bool {
        let Some(pause) = self.throttle.due(Instant::now()) else {
            return true;
        };
        if !cancellable_sleep(self.cancel, pause) {
            return false;
        }

        self.summary.throttle_pauses += 1;
        self.summary.paused += pause;
        self.throttle.restart(Instant::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::usage::capacity::FsCapacity;
    use usage_types::USAGE_UNAVAILABLE;

    type Reports = Arc<Mutex<HashMap<PathBuf, Vec<(i64, u64)>>>>;

    fn recorder(
        reports: &Reports,
    ) -> impl Fn(&Path, i64, u64) -> anyhow::Result<()> + Clone + Send + 'static {
        let reports = Arc::clone(reports);
        move |dir: &Path, bytes: i64, count: u64| {
            reports
                .lock()
                .unwrap()
                .entry(dir.to_path_buf())
                .or_default()
                .push((bytes, count));
            Ok(())
        }
    }

    fn report(reports: &Reports, path: &Path) -> Vec<(i64, u64)> {
        reports.lock().unwrap().get(path).cloned().unwrap_or_default()
    }

    fn completed(outcome: WalkOutcome) -> WalkSummary {
        match outcome {
            WalkOutcome::Completed(summary) => summary,
            WalkOutcome::Cancelled => panic!("walk was cancelled"),
        }
    }

    #[test]
    fn reports_file_and_empty_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let sub = root.join("empty");
        fs::create_dir(&sub).unwrap();
        fs::write(root.join("data.bin"), vec![0_u8; 10_240]).unwrap();

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default());
        computation.add_listener(&root, recorder(&reports));
        computation.add_listener(&sub, recorder(&reports));
        assert_eq!(computation.item_count(), 2);

        let summary = completed(computation.compute(std::slice::from_ref(&root)).unwrap());

        assert_eq!(report(&reports, &sub), vec![(0, 0)]);
        assert_eq!(report(&reports, &root), vec![(10_240, 1)]);
        assert_eq!(summary.files, 1);
        assert_eq!(summary.dirs, 2);
        assert_eq!(summary.bytes, 10_240);
        assert_eq!(computation.item_count(), 0);
    }

    #[test]
    fn ancestors_include_unregistered_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let deep = root.join("a").join("b").join("c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("one"), vec![1_u8; 100]).unwrap();
        fs::write(root.join("a").join("two"), vec![1_u8; 50]).unwrap();

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default());
        computation.add_listener(&root, recorder(&reports));
        computation.add_listener(&root.join("a").join("b"), recorder(&reports));

        completed(computation.compute(std::slice::from_ref(&root)).unwrap());

        assert_eq!(report(&reports, &root.join("a").join("b")), vec![(100, 1)]);
        assert_eq!(report(&reports, &root), vec![(150, 2)]);
    }

    #[test]
    fn overlapping_roots_are_walked_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let child = root.join("child");
        let sibling = root.join("sibling");
        fs::create_dir_all(&child).unwrap();
        fs::create_dir_all(&sibling).unwrap();
        fs::write(child.join("f"), vec![0_u8; 300]).unwrap();
        fs::write(sibling.join("g"), vec![0_u8; 200]).unwrap();

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default());
        for path in [&root, &child, &sibling] {
            computation.add_listener(path, recorder(&reports));
        }

        let roots = vec![child.clone(), root.clone(), root.join(".")];
        let summary = completed(computation.compute(&roots).unwrap());

        assert_eq!(report(&reports, &child), vec![(300, 1)]);
        assert_eq!(report(&reports, &sibling), vec![(200, 1)]);
        assert_eq!(report(&reports, &root), vec![(500, 2)]);
        assert_eq!(summary.bytes, 500);

        let (root_bytes, _) = report(&reports, &root)[0];
        let (child_bytes, _) = report(&reports, &child)[0];
        let (sibling_bytes, _) = report(&reports, &sibling)[0];
        assert!(root_bytes >= child_bytes + sibling_bytes);
    }

    #[test]
    fn children_report_before_parents() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let child = root.join("child");
        fs::create_dir(&child).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut computation = UsageComputation::new(WalkOptions::default());
        for path in [&root, &child] {
            let order = Arc::clone(&order);
            computation.add_listener(path, move |dir, _, _| {
                order.lock().unwrap().push(dir.to_path_buf());
                Ok(())
            });
        }

        completed(computation.compute(std::slice::from_ref(&root)).unwrap());
        assert_eq!(*order.lock().unwrap(), vec![child, root]);
    }

    #[test]
    fn failing_listener_does_not_abort_the_walk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let broken = root.join("broken");
        fs::create_dir(&broken).unwrap();
        fs::write(broken.join("f"), b"abc").unwrap();

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default());
        computation.add_listener(&broken, |_, _, _| anyhow::bail!("listener exploded"));
        computation.add_listener(&root, recorder(&reports));

        completed(computation.compute(std::slice::from_ref(&root)).unwrap());
        assert_eq!(report(&reports, &root), vec![(3, 1)]);
    }

    #[test]
    fn missing_root_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");

        let mut computation = UsageComputation::new(WalkOptions::default());
        let error = computation.compute(&[missing.clone()]).unwrap_err();
        match error {
            UsageError::RootUnreachable { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unreadable_directory_still_reports_zero() {
        if unsafe { libc::geteuid() } == 0 {
            // root ignores directory permissions
            return;
        }
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let locked = root.join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("secret"), vec![0_u8; 64]).unwrap();
        fs::write(root.join("visible"), vec![0_u8; 8]).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default());
        computation.add_listener(&locked, recorder(&reports));
        computation.add_listener(&root, recorder(&reports));

        let summary = completed(computation.compute(std::slice::from_ref(&root)).unwrap());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(report(&reports, &locked), vec![(0, 0)]);
        assert_eq!(report(&reports, &root), vec![(8, 1)]);
        assert_eq!(summary.skipped_errors, 1);
    }

    #[test]
    fn throttled_walk_sleeps_as_long_as_it_works() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for index in 0..200 {
            let sub = root.join(format!("d{index}"));
            fs::create_dir(&sub).unwrap();
            for file in 0..5 {
                fs::write(sub.join(format!("f{file}")), vec![0_u8; 16]).unwrap();
            }
        }

        let options = WalkOptions {
            chunk: Duration::from_millis(1),
            ..WalkOptions::default()
        };
        let mut computation = UsageComputation::new(options);
        let summary = completed(computation.compute(std::slice::from_ref(&root)).unwrap());

        assert!(summary.throttle_pauses >= 1);
        let worked = summary.elapsed.saturating_sub(summary.paused);
        // Every pause lasts as long as the work before it, so pausing takes
        // about half of the wall-clock time. Oversleeping and the unpaused
        // tail of the walk account for the slack.
        assert!(
            summary.paused >= worked / 3,
            "paused {:?} after working {:?}",
            summary.paused,
            worked
        );
        assert!(
            summary.paused <= worked * 2 + Duration::from_millis(50),
            "paused {:?} after working {:?}",
            summary.paused,
            worked
        );
    }

    #[test]
    fn cancellation_ends_the_walk_early() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        fs::create_dir(root.join("sub")).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let reports = Reports::default();
        let mut computation =
            UsageComputation::new(WalkOptions::default()).with_cancellation(cancel);
        computation.add_listener(&root, recorder(&reports));

        let outcome = computation.compute(std::slice::from_ref(&root)).unwrap();
        assert!(outcome.is_cancelled());
        assert!(report(&reports, &root).is_empty());
    }

    #[test]
    fn liveness_probe_touches_sentinel_during_walk() {
        let tree = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        let sentinel = state.path().join("alive");
        fs::create_dir(tree.path().join("sub")).unwrap();

        let options = WalkOptions {
            liveness_interval: Duration::ZERO,
            liveness_sentinel: Some(sentinel.clone()),
            ..WalkOptions::default()
        };
        let mut computation = UsageComputation::new(options);
        completed(computation.compute(&[tree.path().to_path_buf()]).unwrap());

        assert!(sentinel.exists());
    }

    struct FakeCapacity(Option<FsCapacity>);

    /// Answers like a fixed filesystem and remembers which paths were queried.
    #[derive(Clone, Default)]
    struct RecordingCapacity(Arc<Mutex<Vec<PathBuf>>>);

    impl CapacitySource for RecordingCapacity {
        fn capacity(&self, path: &Path) -> io::Result<FsCapacity> {
            self.0.lock().unwrap().push(path.to_path_buf());
            Ok(FsCapacity {
                total: 10 * GB,
                usable: 4 * GB,
            })
        }
    }

    impl CapacitySource for FakeCapacity {
        fn capacity(&self, _path: &Path) -> io::Result<FsCapacity> {
            self.0.ok_or_else(|| io::Error::other("no statistics"))
        }
    }

    const GB: i64 = 1024 * 1024 * 1024;

    #[test]
    fn aggregate_reports_used_space() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let unregistered = root.join("other");

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default())
            .with_capacity_source(Box::new(FakeCapacity(Some(FsCapacity {
                total: 100 * GB,
                usable: 40 * GB,
            }))));
        computation.add_listener(&root, recorder(&reports));

        let notified = computation.compute_aggregate(&[root.clone(), unregistered]);
        assert_eq!(notified, 1);
        assert_eq!(report(&reports, &root), vec![(60 * GB, 0)]);
    }

    #[test]
    fn aggregate_reports_sentinel_when_usable_space_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default())
            .with_capacity_source(Box::new(FakeCapacity(Some(FsCapacity {
                total: 100 * GB,
                usable: 0,
            }))));
        computation.add_listener(&root, recorder(&reports));

        assert_eq!(computation.compute_aggregate(std::slice::from_ref(&root)), 1);
        assert_eq!(report(&reports, &root), vec![(USAGE_UNAVAILABLE, 0)]);
    }

    #[test]
    fn aggregate_queries_the_measured_path_for_the_listener() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        fs::create_dir(&home).unwrap();
        let key = PathBuf::from("/");

        let queried = RecordingCapacity::default();
        let reports = Reports::default();
        let mut computation = UsageComputation::new(WalkOptions::default())
            .with_capacity_source(Box::new(queried.clone()));
        computation.add_listener(&key, recorder(&reports));

        assert!(computation.compute_aggregate_of(&key, &home));
        assert!(!computation.compute_aggregate_of(&key, &home));

        assert_eq!(*queried.0.lock().unwrap(), vec![home]);
        assert_eq!(report(&reports, &key), vec![(6 * GB, 0)]);
    }
}
