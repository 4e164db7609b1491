// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;
use usage_sys::UsageError;

/// Service-specific errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("usage computation failed: {0}")]
    Usage(#[from] UsageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot persist usage snapshot {path:?}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("host collaborator failed: {0}")]
    Host(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid config {path:?}: {reason}")]
    Invalid { path: PathBuf, reason: String },

    #[error("{field} must be an absolute path, got {value:?}")]
    RelativePath { field: &'static str, value: PathBuf },

    #[error("sentinel {sentinel:?} lies inside the measured tree {tree:?}")]
    SentinelInsideMeasuredTree { sentinel: PathBuf, tree: PathBuf },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
