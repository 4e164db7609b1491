// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::{Component, Path, PathBuf};

/// Make `path` absolute and lexically clean (`.` removed, `..` folded).
///
/// Symbolic links are not resolved; the result is only a stable map key.
pub fn normalize(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    Ok(normalized)
}

/// Drop duplicate roots and roots nested inside another root, so that no
/// directory is walked twice. Order of the surviving roots is shallowest first.
pub fn collapse_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates: Vec<&PathBuf> = roots.iter().collect();
    candidates.sort_by(|left, right| {
        left.components()
            .count()
            .cmp(&right.components().count())
            .then_with(|| left.cmp(right))
    });

    let mut kept: Vec<PathBuf> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept.iter().any(|root| candidate.starts_with(root)) {
            continue;
        }
        kept.push(candidate.clone());
    }

    kept
}

/// The top-most ancestor of `path` (`/` on Unix).
pub fn filesystem_root(path: &Path) -> PathBuf {
    path.ancestors()
        .last()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| path.to_path_buf())
}
