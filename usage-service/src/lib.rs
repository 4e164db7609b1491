// SPDX-License-Identifier: GPL-3.0-only

//! Background estimation of disk usage for a host's directories and jobs.
//!
//! [`UsageOrchestrator`] owns a single worker that walks the host's home
//! directory, its temp directory and every job directory once per run, keeps
//! the latest result per directory and persists it across restarts.

pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod orchestrator;
pub mod persistence;
mod run;
pub mod state;
pub mod store;
pub mod watch;

pub use config::ServiceConfig;
pub use error::{ConfigError, Result, ServiceError};
pub use host::{DirectoryHost, Host, PrivilegeGuard};
pub use orchestrator::UsageOrchestrator;
pub use persistence::{PersistedUsage, UsageSnapshotFile};
pub use state::RunState;
pub use store::UsageStore;
pub use watch::WatchSet;
