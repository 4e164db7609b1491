// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use usage_types::{JobUsageRecord, UsageRecord};

use crate::error::{Result, ServiceError};

/// Bump when the layout of [`PersistedUsage`] changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything the service keeps across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedUsage {
    pub version: u32,
    pub last_run_start: i64,
    pub last_run_end: i64,
    #[serde(default)]
    pub directories: Vec<UsageRecord>,
    #[serde(default)]
    pub jobs: Vec<JobUsageRecord>,
}

impl PersistedUsage {
    pub fn new(
        last_run_start: i64,
        last_run_end: i64,
        directories: Vec<UsageRecord>,
        jobs: Vec<JobUsageRecord>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            last_run_start,
            last_run_end,
            directories,
            jobs,
        }
    }
}

/// JSON file holding a [`PersistedUsage`].
#[derive(Debug, Clone)]
pub struct UsageSnapshotFile {
    path: PathBuf,
}

impl UsageSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the saved state. `None` when nothing was saved yet or the file
    /// was written by an incompatible version.
    pub fn load(&self) -> Result<Option<PersistedUsage>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                debug!("no saved usage state at {:?}", self.path);
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };

        let saved: PersistedUsage =
            serde_json::from_reader(BufReader::new(file)).map_err(|error| self.error(error))?;

        if saved.version != SNAPSHOT_VERSION {
            warn!(
                "ignoring usage state {:?} with version {} (expected {})",
                self.path, saved.version, SNAPSHOT_VERSION
            );
            return Ok(None);
        }

        Ok(Some(saved))
    }

    /// Replace the saved state atomically.
    pub fn save(&self, usage: &PersistedUsage) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut file = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut file, usage).map_err(|error| self.error(error))?;
        file.flush()?;
        file.persist(&self.path)
            .map_err(|error| self.error(error.error))?;
        Ok(())
    }

    fn error(&self, error: impl std::fmt::Display) -> ServiceError {
        ServiceError::Persistence {
            path: self.path.clone(),
            reason: error.to_string(),
        }
    }
}
