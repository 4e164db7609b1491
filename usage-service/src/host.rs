// SPDX-License-Identifier: GPL-3.0-only

//! The host application the service runs inside of.
//!
//! The orchestrator never discovers jobs or privileges on its own; it asks a
//! [`Host`] for them at the start of each run.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;
use usage_types::JobDescriptor;

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

pub trait Host: Send + Sync + 'static {
    /// Every job currently known to the host.
    fn jobs(&self) -> Result<Vec<JobDescriptor>>;

    /// Resolve a job by its unique full name, `None` once it is gone or renamed.
    fn job_by_full_name(&self, full_name: &str) -> Option<JobDescriptor>;

    /// Whether the host finished starting up and its job list is complete.
    fn is_initialized(&self) -> bool;

    fn home_dir(&self) -> PathBuf;

    fn temp_dir(&self) -> PathBuf {
        std::env::temp_dir()
    }

    /// Elevate to full read access for the duration of a run.
    fn impersonate_system(&self) -> PrivilegeGuard {
        PrivilegeGuard::unprivileged()
    }
}

/// Restores the previous privileges when dropped.
#[must_use = "privileges are restored as soon as the guard is dropped"]
pub struct PrivilegeGuard {
    restore: Option<Box<dyn FnOnce() + Send>>,
}

impl PrivilegeGuard {
    pub fn new(restore: impl FnOnce() + Send + 'static) -> Self {
        Self {
            restore: Some(Box::new(restore)),
        }
    }

    /// A guard for hosts that have nothing to elevate.
    pub fn unprivileged() -> Self {
        Self { restore: None }
    }
}

impl Drop for PrivilegeGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}

impl fmt::Debug for PrivilegeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivilegeGuard")
            .field("restores", &self.restore.is_some())
            .finish()
    }
}

/// A host whose jobs are the subdirectories of a single jobs directory.
#[derive(Debug)]
pub struct DirectoryHost {
    home_dir: PathBuf,
    temp_dir: PathBuf,
    jobs_dir: PathBuf,
    initialized: AtomicBool,
}

impl DirectoryHost {
    pub fn new(home_dir: PathBuf, temp_dir: PathBuf, jobs_dir: PathBuf) -> Self {
        Self {
            home_dir,
            temp_dir,
            jobs_dir,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            config.home_dir.clone(),
            config.temp_dir.clone(),
            config.jobs_path(),
        )
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    fn descriptor(&self, name: &str) -> JobDescriptor {
        JobDescriptor {
            full_name: name.to_string(),
            display_name: name.to_string(),
            url: format!("job/{name}/"),
            root_dir: self.jobs_dir.join(name),
        }
    }
}

impl Host for DirectoryHost {
    fn jobs(&self) -> Result<Vec<JobDescriptor>> {
        if !self.jobs_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.jobs_dir).map_err(|error| {
            ServiceError::Host(format!("cannot list jobs in {:?}: {error}", self.jobs_dir))
        })?;

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!("skipping unreadable job entry in {:?}: {error}", self.jobs_dir);
                    continue;
                }
            };
            if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => jobs.push(self.descriptor(&name)),
                Err(name) => warn!("skipping job directory with non UTF-8 name {name:?}"),
            }
        }

        jobs.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(jobs)
    }

    fn job_by_full_name(&self, full_name: &str) -> Option<JobDescriptor> {
        if full_name.is_empty() || Path::new(full_name).components().count() != 1 {
            return None;
        }
        let job = self.descriptor(full_name);
        job.root_dir.is_dir().then_some(job)
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn home_dir(&self) -> PathBuf {
        self.home_dir.clone()
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone()
    }
}
