// SPDX-License-Identifier: GPL-3.0-only

//! One disk usage run, executed on a blocking thread by the worker.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use usage_sys::{CapacitySource, UsageComputation, WalkOutcome};
use usage_types::{JobUsageRecord, UsageRecord, WatchIdentity, WatchTarget};

use crate::config::ServiceConfig;
use crate::error::Result;
use crate::host::Host;
use crate::persistence::{PersistedUsage, UsageSnapshotFile};
use crate::state::RunState;
use crate::store::UsageStore;
use crate::watch::WatchSet;

/// State shared between the orchestrator handle and its worker.
pub(crate) struct Shared {
    pub(crate) host: Arc<dyn Host>,
    pub(crate) config: ServiceConfig,
    pub(crate) state: Arc<RunState>,
    pub(crate) directories: Arc<UsageStore<UsageRecord>>,
    pub(crate) jobs: Arc<UsageStore<JobUsageRecord>>,
    pub(crate) snapshot_file: UsageSnapshotFile,
    pub(crate) capacity: Arc<dyn CapacitySource>,
    /// A run was requested and has not started yet.
    pub(crate) queued: AtomicBool,
    pub(crate) shutdown: CancellationToken,
    /// Number of runs the worker finished, successful or not.
    pub(crate) runs: watch::Sender<u64>,
}

impl Shared {
    pub(crate) fn persist(&self) {
        let state = self.state.snapshot();
        let usage = PersistedUsage::new(
            state.last_run_start,
            state.last_run_end,
            self.directories.snapshot().to_vec(),
            self.jobs.snapshot().to_vec(),
        );
        if let Err(error) = self.snapshot_file.save(&usage) {
            warn!("failed to save disk usage state: {error}");
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn compute_disk_usage(shared: &Shared) {
    shared.state.begin(now_millis());
    shared.queued.store(false, Ordering::SeqCst);
    info!("re-estimating disk usage");

    let result = {
        let _privileges = shared.host.impersonate_system();
        run_passes(shared)
    };

    match result {
        Ok(WalkOutcome::Completed(summary)) => {
            shared.state.complete(now_millis());
            let state = shared.state.snapshot();
            info!(
                files = summary.files,
                dirs = summary.dirs,
                skipped = summary.skipped_errors,
                pauses = summary.throttle_pauses,
                reported = state.progress,
                "finished re-estimating disk usage in {} ms",
                state.last_run_duration().num_milliseconds()
            );
        }
        Ok(WalkOutcome::Cancelled) => {
            shared.state.abandon();
            debug!("disk usage computation cancelled");
        }
        Err(error) => {
            shared.state.abandon();
            warn!("unable to run disk usage check: {error}");
        }
    }

    shared.persist();
}

fn run_passes(shared: &Shared) -> Result<WalkOutcome> {
    let home = shared.host.home_dir();
    let temp = shared.host.temp_dir();
    let jobs = shared
        .host
        .jobs()?
        .into_iter()
        .filter(|job| {
            let present = job.root_dir.exists();
            if !present {
                debug!("job {} has no directory at {:?}", job.full_name, job.root_dir);
            }
            present
        })
        .collect();

    let watch = WatchSet::build(&home, &temp, jobs)?;
    prune(shared, &watch);

    let options = shared.config.walk_options();
    let mut traversal =
        UsageComputation::new(options.clone()).with_cancellation(shared.shutdown.clone());
    for (path, targets) in group_by_path(&watch.targets) {
        traversal.add_listener(&path, publisher(shared, targets));
    }

    let mut aggregate = UsageComputation::new(options)
        .with_cancellation(shared.shutdown.clone())
        .with_capacity_source(Box::new(Arc::clone(&shared.capacity)));
    aggregate.add_listener(
        &watch.filesystem.path,
        publisher(shared, vec![watch.filesystem.clone()]),
    );

    shared
        .state
        .set_total(traversal.item_count() + aggregate.item_count());

    let outcome = traversal.compute(&watch.roots)?;
    if !outcome.is_cancelled() {
        aggregate.compute_aggregate_of(&watch.filesystem.path, &watch.capacity_path);
    }
    Ok(outcome)
}

/// Drop records for jobs that are gone or renamed, and for directories that
/// disappeared or are no longer watched.
fn prune(shared: &Shared, watch: &WatchSet) {
    // Resolve jobs before taking the store's write lock.
    let stale_jobs: HashSet<PathBuf> = shared
        .jobs
        .snapshot()
        .iter()
        .filter(|job| {
            !job.record.path.exists() || shared.host.job_by_full_name(&job.full_name).is_none()
        })
        .map(|job| job.record.path.clone())
        .collect();
    let removed_jobs = shared
        .jobs
        .retain(|job| !stale_jobs.contains(&job.record.path));

    let watched = watch.directory_paths();
    let removed_directories = shared
        .directories
        .retain(|record| record.path.exists() && watched.contains(&record.path));

    if removed_jobs + removed_directories > 0 {
        debug!(
            jobs = removed_jobs,
            directories = removed_directories,
            "pruned stale usage records"
        );
    }
}

/// A job directory may also be a watched directory; both are reported from
/// a single listener.
fn group_by_path(targets: &[WatchTarget]) -> BTreeMap<PathBuf, Vec<WatchTarget>> {
    let mut grouped: BTreeMap<PathBuf, Vec<WatchTarget>> = BTreeMap::new();
    for target in targets {
        grouped
            .entry(target.path.clone())
            .or_default()
            .push(target.clone());
    }
    grouped
}

fn publisher(
    shared: &Shared,
    targets: Vec<WatchTarget>,
) -> impl FnOnce(&Path, i64, u64) -> anyhow::Result<()> + Send + 'static {
    let directories = Arc::clone(&shared.directories);
    let jobs = Arc::clone(&shared.jobs);
    let state = Arc::clone(&shared.state);

    move |_dir: &Path, bytes: i64, count: u64| {
        for target in &targets {
            match &target.identity {
                WatchIdentity::Directory { display_name } => directories.upsert(
                    UsageRecord::from_bytes(display_name.clone(), target.path.clone(), bytes, count),
                ),
                WatchIdentity::Job(job) => {
                    jobs.upsert(JobUsageRecord::from_bytes(job, bytes, count));
                }
            }
        }
        state.record_progress();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use usage_types::JobDescriptor;

    use super::*;

    #[test]
    fn shared_paths_become_one_listener() {
        let job = JobDescriptor {
            full_name: "build".to_string(),
            display_name: "build".to_string(),
            url: "job/build/".to_string(),
            root_dir: PathBuf::from("/srv/ci/build"),
        };
        let targets = vec![
            WatchTarget::job(job),
            WatchTarget::directory("/srv/ci", "HOME"),
            WatchTarget::directory("/srv/ci/build", "HOME/build"),
        ];

        let grouped = group_by_path(&targets);

        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[Path::new("/srv/ci/build")].len(), 2);
    }
}
