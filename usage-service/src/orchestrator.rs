// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use usage_sys::usage::normalize;
use usage_sys::{CapacitySource, StatvfsCapacity};
use usage_types::{JobUsageRecord, RunStateSnapshot, UsageRecord, UsageStatus};

use crate::config::ServiceConfig;
use crate::host::Host;
use crate::persistence::UsageSnapshotFile;
use crate::run::{self, Shared, now_millis};
use crate::state::RunState;
use crate::store::UsageStore;

/// Keeps disk usage estimates of the host's directories and jobs fresh.
///
/// Runs are executed one at a time by a single worker task. Cloning the
/// orchestrator yields another handle to the same worker.
#[derive(Clone)]
pub struct UsageOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    shared: Arc<Shared>,
    queue: mpsc::UnboundedSender<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UsageOrchestrator {
    /// Restore saved results and spawn the worker. Must be called from within
    /// a tokio runtime.
    pub fn start(host: Arc<dyn Host>, config: ServiceConfig) -> Self {
        Self::start_with_capacity(host, config, Arc::new(StatvfsCapacity))
    }

    /// Like [`Self::start`], reading filesystem capacity from `capacity`.
    pub fn start_with_capacity(
        host: Arc<dyn Host>,
        config: ServiceConfig,
        capacity: Arc<dyn CapacitySource>,
    ) -> Self {
        let snapshot_file = UsageSnapshotFile::new(config.state_path());
        let saved = match snapshot_file.load() {
            Ok(saved) => saved.unwrap_or_default(),
            Err(error) => {
                warn!("discarding unreadable disk usage state: {error}");
                Default::default()
            }
        };
        debug!(
            directories = saved.directories.len(),
            jobs = saved.jobs.len(),
            "restored disk usage state from {:?}",
            snapshot_file.path()
        );

        let (queue, requests) = mpsc::unbounded_channel();
        let (runs, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            host,
            config,
            state: Arc::new(RunState::restore(saved.last_run_start, saved.last_run_end)),
            directories: Arc::new(UsageStore::from_records(saved.directories)),
            jobs: Arc::new(UsageStore::from_records(saved.jobs)),
            snapshot_file,
            capacity,
            queued: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            runs,
        });

        let worker = tokio::spawn(worker_loop(Arc::clone(&shared), requests));

        Self {
            inner: Arc::new(Inner {
                shared,
                queue,
                worker: Mutex::new(Some(worker)),
            }),
        }
    }

    /// Request a run. Returns `false` when the request was coalesced with a
    /// run that is already in progress or queued, or after shutdown.
    pub fn trigger_refresh(&self) -> bool {
        let shared = &self.inner.shared;
        if shared.shutdown.is_cancelled() || shared.state.is_running() {
            return false;
        }
        if shared.queued.swap(true, Ordering::SeqCst) {
            return false;
        }
        if self.inner.queue.send(()).is_err() {
            shared.queued.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    /// Trigger a run once the host reports it finished starting up. The wait
    /// ends early on shutdown.
    pub fn trigger_refresh_on_startup(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let shared = Arc::clone(&orchestrator.inner.shared);
            let poll = shared.config.startup_poll();
            while !shared.host.is_initialized() {
                debug!("host not initialized yet, delaying disk usage computation");
                tokio::select! {
                    _ = shared.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            orchestrator.trigger_refresh();
        })
    }

    /// Usage of the watched directories. Triggers a run when the last one
    /// ended more than a quiet period ago.
    pub fn directory_usages(&self) -> Arc<Vec<UsageRecord>> {
        self.refresh_if_stale();
        self.inner.shared.directories.snapshot()
    }

    /// Usage of the host's jobs. Triggers a run like [`Self::directory_usages`].
    pub fn job_usages(&self) -> Arc<Vec<JobUsageRecord>> {
        self.refresh_if_stale();
        self.inner.shared.jobs.snapshot()
    }

    pub fn directory_usage(&self, path: &Path) -> UsageStatus<UsageRecord> {
        match normalize(path) {
            Ok(path) => self.inner.shared.directories.get(&path),
            Err(_) => UsageStatus::NotYetAvailable,
        }
    }

    pub fn job_usage(&self, path: &Path) -> UsageStatus<JobUsageRecord> {
        match normalize(path) {
            Ok(path) => self.inner.shared.jobs.get(&path),
            Err(_) => UsageStatus::NotYetAvailable,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.state.is_running()
    }

    pub fn run_state(&self) -> RunStateSnapshot {
        self.inner.shared.state.snapshot()
    }

    pub fn last_run_start(&self) -> Option<DateTime<Utc>> {
        self.run_state().last_run_start_time()
    }

    pub fn last_run_end(&self) -> Option<DateTime<Utc>> {
        self.run_state().last_run_end_time()
    }

    /// Listeners that reported during the current or last run.
    pub fn progress(&self) -> usize {
        self.run_state().progress
    }

    /// Listeners registered for the current or last run.
    pub fn total(&self) -> usize {
        self.run_state().total
    }

    /// Time since the last run ended, `None` if no run ever ended.
    pub fn since_last_run(&self) -> Option<TimeDelta> {
        self.last_run_end().map(|end| Utc::now() - end)
    }

    pub fn last_run_duration(&self) -> TimeDelta {
        self.run_state().last_run_duration()
    }

    /// Runs finished by the worker since it started.
    pub fn completed_runs(&self) -> u64 {
        *self.inner.shared.runs.borrow()
    }

    /// Wait until the worker finished at least `count` runs.
    pub async fn wait_for_runs(&self, count: u64) {
        let mut runs = self.inner.shared.runs.subscribe();
        let _ = runs.wait_for(|finished| *finished >= count).await;
    }

    /// Stop the worker. A run in progress ends at its next pause.
    pub async fn shutdown(&self) {
        self.inner.shared.shutdown.cancel();
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker
            && let Err(error) = worker.await
        {
            warn!("disk usage worker ended abnormally: {error}");
        }
    }

    fn refresh_if_stale(&self) {
        let quiet = i64::try_from(self.inner.shared.config.quiet_period().as_millis())
            .unwrap_or(i64::MAX);
        let last_end = self.inner.shared.state.snapshot().last_run_end;
        if now_millis().saturating_sub(last_end) >= quiet {
            self.trigger_refresh();
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, mut requests: mpsc::UnboundedReceiver<()>) {
    loop {
        let request = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => None,
            request = requests.recv() => request,
        };
        if request.is_none() {
            break;
        }

        let job = Arc::clone(&shared);
        if let Err(error) = tokio::task::spawn_blocking(move || run::compute_disk_usage(&job)).await
        {
            warn!("disk usage computation aborted: {error}");
            shared.state.abandon();
            shared.queued.store(false, Ordering::SeqCst);
        }
        shared.runs.send_modify(|finished| *finished += 1);
    }
    debug!("disk usage worker stopped");
}
