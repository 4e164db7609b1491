// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use usage_sys::usage::{collapse_roots, filesystem_root, normalize};
use usage_types::{JobDescriptor, WatchIdentity, WatchTarget};

use crate::error::Result;

pub const HOME_DISPLAY_NAME: &str = "HOME";
pub const TEMP_DISPLAY_NAME: &str = "TMPDIR";
pub const FILESYSTEM_DISPLAY_NAME: &str = "FILESYSTEM";

/// Directories whose size one run reports.
#[derive(Debug, Clone)]
pub struct WatchSet {
    /// Measured by walking.
    pub targets: Vec<WatchTarget>,
    /// Measured from filesystem capacity counters. Keyed by the filesystem
    /// root, reports the filesystem holding `capacity_path`.
    pub filesystem: WatchTarget,
    pub capacity_path: PathBuf,
    /// Where the walk starts: home, temp and jobs living outside of both.
    pub roots: Vec<PathBuf>,
}

impl WatchSet {
    pub fn build(home: &Path, temp: &Path, jobs: Vec<JobDescriptor>) -> Result<Self> {
        let home = normalize(home)?;
        let temp = normalize(temp)?;

        let mut targets = Vec::new();
        let mut roots = vec![home.clone(), temp.clone()];

        for mut job in jobs {
            job.root_dir = normalize(&job.root_dir)?;
            roots.push(job.root_dir.clone());
            targets.push(WatchTarget::job(job));
        }

        targets.push(WatchTarget::directory(home.clone(), HOME_DISPLAY_NAME));
        for child in first_level_directories(&home) {
            let display_name = match child.file_name() {
                Some(name) => format!("{HOME_DISPLAY_NAME}/{}", name.to_string_lossy()),
                None => continue,
            };
            targets.push(WatchTarget::directory(child, display_name));
        }
        targets.push(WatchTarget::directory(temp, TEMP_DISPLAY_NAME));

        let filesystem = WatchTarget::directory(filesystem_root(&home), FILESYSTEM_DISPLAY_NAME);

        Ok(Self {
            targets,
            filesystem,
            capacity_path: home,
            roots: collapse_roots(&roots),
        })
    }

    /// Paths of every non-job target, the filesystem root included.
    pub fn directory_paths(&self) -> HashSet<PathBuf> {
        self.targets
            .iter()
            .filter(|target| matches!(target.identity, WatchIdentity::Directory { .. }))
            .map(|target| target.path.clone())
            .chain(std::iter::once(self.filesystem.path.clone()))
            .collect()
    }
}

fn first_level_directories(home: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(home) {
        Ok(entries) => entries,
        Err(error) => {
            warn!("cannot list {home:?}: {error}");
            return Vec::new();
        }
    };

    let mut children: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                debug!("skipping unreadable entry in {home:?}: {error}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .map(|entry| entry.path())
        .collect();
    children.sort();
    children
}
