// SPDX-License-Identifier: GPL-3.0-only

//! Canonical domain models for quick disk usage estimation
//!
//! These types are shared by the computation engine (`usage-sys`) and the
//! refresh orchestrator (`usage-service`):
//!
//! - [`UsageRecord`] / [`JobUsageRecord`] → last known usage of a watched path
//! - [`WatchTarget`] → a directory whose size should be reported during a run
//! - [`RunStateSnapshot`] → start/end/progress of the most recent run
//!
//! Record identity is the path alone; inserting a record for a path that is
//! already known replaces the previous one.

pub mod common;
pub mod record;
pub mod run_state;
pub mod target;

pub use common::{USAGE_UNAVAILABLE, bytes_to_pretty, format_count};
pub use record::{JobUsageRecord, PathKeyed, UsageRecord, UsageStatus};
pub use run_state::RunStateSnapshot;
pub use target::{JobDescriptor, WatchIdentity, WatchTarget};
