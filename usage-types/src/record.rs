// SPDX-License-Identifier: GPL-3.0-only

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::target::JobDescriptor;

/// Anything stored in a usage result set, keyed by its on-disk path.
pub trait PathKeyed {
    fn path(&self) -> &Path;
}

/// A directory path on the disk with its usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub display_name: String,
    pub path: PathBuf,
    /// Usage in KiB, negative when the size could not be determined.
    pub usage_kb: i64,
    /// Files contained in the directory, direct and transitive. Zero when not tracked.
    #[serde(default)]
    pub count: u64,
}

impl UsageRecord {
    pub fn new(display_name: impl Into<String>, path: impl Into<PathBuf>, usage_kb: i64, count: u64) -> Self {
        Self {
            display_name: display_name.into(),
            path: path.into(),
            usage_kb,
            count,
        }
    }

    /// Build a record from a raw byte total as delivered by the engine.
    ///
    /// Negative totals (the unavailable sentinel) are kept negative instead of
    /// being truncated towards zero, so they are never shown as "0 KB used".
    pub fn from_bytes(display_name: impl Into<String>, path: impl Into<PathBuf>, bytes: i64, count: u64) -> Self {
        let usage_kb = if bytes < 0 { bytes } else { bytes / 1024 };
        Self::new(display_name, path, usage_kb, count)
    }

    pub fn is_available(&self) -> bool {
        self.usage_kb >= 0
    }

    /// Usage in MiB with one decimal place, or `"N/A"` when unavailable.
    pub fn usage_in_mb(&self) -> String {
        if !self.is_available() {
            return "N/A".to_string();
        }
        format!("{:.1}", self.usage_kb as f64 / 1024.0)
    }

    /// Case-insensitive ordering by display name, for listings.
    pub fn display_order(&self, other: &Self) -> Ordering {
        self.display_name
            .to_lowercase()
            .cmp(&other.display_name.to_lowercase())
    }
}

impl PathKeyed for UsageRecord {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for UsageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for UsageRecord {}

impl Hash for UsageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

/// A job directory path on the disk with its usage information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUsageRecord {
    #[serde(flatten)]
    pub record: UsageRecord,
    pub full_name: String,
    pub url: String,
}

impl JobUsageRecord {
    pub fn from_bytes(job: &JobDescriptor, bytes: i64, count: u64) -> Self {
        Self {
            record: UsageRecord::from_bytes(
                job.display_name.clone(),
                job.root_dir.clone(),
                bytes,
                count,
            ),
            full_name: job.full_name.clone(),
            url: job.url.clone(),
        }
    }
}

impl PathKeyed for JobUsageRecord {
    fn path(&self) -> &Path {
        &self.record.path
    }
}

impl PartialEq for JobUsageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.record == other.record
    }
}

impl Eq for JobUsageRecord {}

impl Hash for JobUsageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.record.hash(state);
    }
}

/// Result of looking up a single path in a usage result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageStatus<T> {
    /// No run has reported this path yet.
    NotYetAvailable,
    Known(T),
}

impl<T> UsageStatus<T> {
    pub fn known(self) -> Option<T> {
        match self {
            UsageStatus::Known(value) => Some(value),
            UsageStatus::NotYetAvailable => None,
        }
    }
}

impl<T> From<Option<T>> for UsageStatus<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => UsageStatus::Known(value),
            None => UsageStatus::NotYetAvailable,
        }
    }
}
