// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A job-like entity exposed by the host, backed by a directory on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique name, e.g. `folder/job`. Changes when the job is renamed.
    pub full_name: String,
    pub display_name: String,
    pub url: String,
    pub root_dir: PathBuf,
}

/// What a watched directory stands for when its size is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchIdentity {
    /// A well-known directory, such as the home root or the temp directory.
    Directory { display_name: String },
    Job(JobDescriptor),
}

/// A directory of interest whose size should be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    /// Absolute, normalized path.
    pub path: PathBuf,
    pub identity: WatchIdentity,
}

impl WatchTarget {
    pub fn directory(path: impl Into<PathBuf>, display_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            identity: WatchIdentity::Directory {
                display_name: display_name.into(),
            },
        }
    }

    pub fn job(job: JobDescriptor) -> Self {
        Self {
            path: job.root_dir.clone(),
            identity: WatchIdentity::Job(job),
        }
    }

    pub fn display_name(&self) -> &str {
        match &self.identity {
            WatchIdentity::Directory { display_name } => display_name,
            WatchIdentity::Job(job) => &job.display_name,
        }
    }
}
