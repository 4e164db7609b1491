// SPDX-License-Identifier: GPL-3.0-only

pub mod capacity;
pub mod computation;
pub mod listener;
pub mod paths;
pub mod probe;
pub mod throttle;

pub use capacity::{CapacitySource, FsCapacity, StatvfsCapacity, used_bytes};
pub use computation::{UsageComputation, WalkOptions, WalkOutcome, WalkSummary};
pub use listener::{CompletionListener, ListenerRegistry};
pub use paths::{collapse_roots, filesystem_root, normalize};
