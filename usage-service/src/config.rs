// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use usage_sys::WalkOptions;

use crate::error::ConfigError;

const DEFAULT_HOME: &str = "/var/lib/quick-usage";
const STATE_FILE_NAME: &str = "quick-usage.json";

/// Service configuration, read from a TOML file. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root of the measured data (its first-level directories are reported too).
    pub home_dir: PathBuf,
    /// Directory whose subdirectories are the jobs. Defaults to `<home_dir>/jobs`.
    pub jobs_dir: Option<PathBuf>,
    pub temp_dir: PathBuf,
    /// Where results are persisted. Defaults to `<home_dir>/quick-usage.json`.
    pub state_file: Option<PathBuf>,
    /// Path touched by the liveness probe. Defaults to `home_dir` itself, whose
    /// modification time is bumped; a file must live outside the measured trees.
    pub sentinel_file: Option<PathBuf>,
    /// Minimum time between two passive refreshes.
    pub quiet_period_secs: u64,
    /// How often to check whether the host finished starting up.
    pub startup_poll_secs: u64,
    pub throttle_chunk_ms: u64,
    pub liveness_interval_secs: u64,
    pub same_filesystem: bool,
    /// `EnvFilter` directives, overridden by `RUST_LOG`.
    pub log_filter: Option<String>,
    /// Enables a daily rolling log file in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from(DEFAULT_HOME),
            jobs_dir: None,
            temp_dir: std::env::temp_dir(),
            state_file: None,
            sentinel_file: None,
            quiet_period_secs: 15 * 60,
            startup_poll_secs: 3 * 60,
            throttle_chunk_ms: 100,
            liveness_interval_secs: 10,
            same_filesystem: false,
            log_filter: None,
            log_dir: None,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        let config: Self = toml::from_str(&raw).map_err(|error| ConfigError::Invalid {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let paths: [(&'static str, Option<&PathBuf>); 6] = [
            ("home_dir", Some(&self.home_dir)),
            ("temp_dir", Some(&self.temp_dir)),
            ("jobs_dir", self.jobs_dir.as_ref()),
            ("state_file", self.state_file.as_ref()),
            ("sentinel_file", self.sentinel_file.as_ref()),
            ("log_dir", self.log_dir.as_ref()),
        ];
        for (field, value) in paths {
            if let Some(value) = value
                && !value.is_absolute()
            {
                return Err(ConfigError::RelativePath {
                    field,
                    value: value.clone(),
                });
            }
        }

        if let Some(sentinel) = &self.sentinel_file {
            for measured in [&self.home_dir, &self.temp_dir] {
                if sentinel != measured && sentinel.starts_with(measured) {
                    return Err(ConfigError::SentinelInsideMeasuredTree {
                        sentinel: sentinel.clone(),
                        tree: measured.clone(),
                    });
                }
            }
        }

        if self.throttle_chunk_ms == 0 {
            return Err(ConfigError::Zero("throttle_chunk_ms"));
        }
        if self.startup_poll_secs == 0 {
            return Err(ConfigError::Zero("startup_poll_secs"));
        }

        Ok(())
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.jobs_dir
            .clone()
            .unwrap_or_else(|| self.home_dir.join("jobs"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.home_dir.join(STATE_FILE_NAME))
    }

    pub fn sentinel_path(&self) -> PathBuf {
        self.sentinel_file
            .clone()
            .unwrap_or_else(|| self.home_dir.clone())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }

    pub fn startup_poll(&self) -> Duration {
        Duration::from_secs(self.startup_poll_secs)
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            chunk: Duration::from_millis(self.throttle_chunk_ms),
            liveness_interval: Duration::from_secs(self.liveness_interval_secs),
            liveness_sentinel: Some(self.sentinel_path()),
            same_filesystem: self.same_filesystem,
        }
    }
}
