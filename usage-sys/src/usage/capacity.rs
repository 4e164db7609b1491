// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::Path;
use std::sync::Arc;

use nix::sys::statvfs::statvfs;
use usage_types::USAGE_UNAVAILABLE;

/// Raw capacity counters of a filesystem, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsCapacity {
    pub total: i64,
    /// Space available to unprivileged writers.
    pub usable: i64,
}

/// Source of filesystem capacity figures for aggregate mode.
pub trait CapacitySource: Send + Sync {
    fn capacity(&self, path: &Path) -> io::Result<FsCapacity>;
}

impl<T: CapacitySource + ?Sized> CapacitySource for Arc<T> {
    fn capacity(&self, path: &Path) -> io::Result<FsCapacity> {
        (**self).capacity(path)
    }
}

/// Capacity from `statvfs(3)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsCapacity;

impl CapacitySource for StatvfsCapacity {
    fn capacity(&self, path: &Path) -> io::Result<FsCapacity> {
        let stats = statvfs(path).map_err(io::Error::from)?;

        let fragment_size = if stats.fragment_size() > 0 {
            stats.fragment_size() as u64
        } else {
            stats.block_size() as u64
        };
        let total = (stats.blocks() as u64).saturating_mul(fragment_size);
        let usable = (stats.blocks_available() as u64).saturating_mul(fragment_size);

        Ok(FsCapacity {
            total: i64::try_from(total).unwrap_or(i64::MAX),
            usable: i64::try_from(usable).unwrap_or(i64::MAX),
        })
    }
}

/// Bytes in use on the filesystem holding `path` (`total - usable`), or
/// [`USAGE_UNAVAILABLE`] when the platform does not report both figures.
pub fn used_bytes(source: &dyn CapacitySource, path: &Path) -> i64 {
    let capacity = match source.capacity(path) {
        Ok(capacity) => capacity,
        Err(error) => {
            tracing::warn!("filesystem capacity for {} unavailable: {error}", path.display());
            return USAGE_UNAVAILABLE;
        }
    };

    if capacity.total <= 0 || capacity.usable <= 0 {
        tracing::warn!(
            "filesystem capacity for {} unavailable (total={}, usable={})",
            path.display(),
            capacity.total,
            capacity.usable
        );
        return USAGE_UNAVAILABLE;
    }

    capacity.total - capacity.usable
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(io::Result<FsCapacity>);

    impl CapacitySource for Fixed {
        fn capacity(&self, _path: &Path) -> io::Result<FsCapacity> {
            match &self.0 {
                Ok(capacity) => Ok(*capacity),
                Err(error) => Err(io::Error::new(error.kind(), error.to_string())),
            }
        }
    }

    const GB: i64 = 1024 * 1024 * 1024;

    #[test]
    fn used_is_total_minus_usable() {
        let source = Fixed(Ok(FsCapacity {
            total: 100 * GB,
            usable: 40 * GB,
        }));
        assert_eq!(used_bytes(&source, Path::new("/")), 60 * GB);
    }

    #[test]
    fn non_positive_counters_are_unavailable() {
        let source = Fixed(Ok(FsCapacity {
            total: 100 * GB,
            usable: 0,
        }));
        assert_eq!(used_bytes(&source, Path::new("/")), USAGE_UNAVAILABLE);
    }

    #[test]
    fn query_failure_is_unavailable() {
        let source = Fixed(Err(io::Error::from(io::ErrorKind::NotFound)));
        assert_eq!(used_bytes(&source, Path::new("/nowhere")), USAGE_UNAVAILABLE);
    }

    #[test]
    fn statvfs_reports_the_root_filesystem() {
        let capacity = StatvfsCapacity.capacity(Path::new("/")).expect("statvfs on /");
        assert!(capacity.total >= capacity.usable);
    }
}
