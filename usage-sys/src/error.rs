// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Error types for usage computation
#[derive(Error, Debug)]
pub enum UsageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot open root {path:?}: {source}")]
    RootUnreachable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for usage computation
pub type Result<T> = std::result::Result<T, UsageError>;
