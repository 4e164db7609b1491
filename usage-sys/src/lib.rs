// SPDX-License-Identifier: GPL-3.0-only

//! Low-level disk usage computation
//!
//! This crate walks directory trees and queries filesystem capacity on
//! behalf of the usage service:
//! - Single post-order walk per root with per-directory completion listeners
//! - Wall-clock throttling so the walk never dominates the I/O subsystem
//! - A periodic liveness probe that stalls the walk while the filesystem is frozen
//! - Whole-filesystem `total - usable` estimates without any traversal
//!
//! Everything here is blocking I/O; async callers should run it on a
//! blocking thread.

pub mod error;
pub mod usage;

pub use error::{Result, UsageError};
pub use usage::{
    CapacitySource, CompletionListener, FsCapacity, StatvfsCapacity, UsageComputation,
    WalkOptions, WalkOutcome, WalkSummary,
};
