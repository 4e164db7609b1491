// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::paths::normalize;

/// Called once with `(directory, bytes, files)` when a directory's size is known.
///
/// `bytes` is negative ([`usage_types::USAGE_UNAVAILABLE`]) when an aggregate
/// query could not determine the usage. Returning an error does not stop the walk.
pub type CompletionListener = Box<dyn FnOnce(&Path, i64, u64) -> anyhow::Result<()> + Send>;

/// Per-run mapping from normalized absolute directory path to its listener.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: HashMap<PathBuf, CompletionListener>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `path`, replacing any listener already
    /// registered for the same normalized path.
    pub fn insert(&mut self, path: &Path, listener: CompletionListener) {
        let key = match normalize(path) {
            Ok(key) => key,
            Err(error) => {
                tracing::warn!("cannot normalize listener path {}: {error}", path.display());
                path.to_path_buf()
            }
        };
        self.listeners.insert(key, listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.listeners.contains_key(path)
    }

    /// Fire the listener registered for `path`, if any. A listener fires at
    /// most once; it is removed from the registry before being invoked.
    pub fn notify(&mut self, path: &Path, bytes: i64, count: u64) -> bool {
        let Some(listener) = self.listeners.remove(path) else {
            return false;
        };

        if let Err(error) = listener(path, bytes, count) {
            tracing::warn!("usage listener for {} failed: {error:#}", path.display());
        }
        true
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("paths", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> CompletionListener {
        let counter = Arc::clone(counter);
        Box::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn reregistering_a_path_replaces_the_listener() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut registry = ListenerRegistry::new();
        registry.insert(Path::new("/srv/home"), counting(&first));
        registry.insert(Path::new("/srv/home/./"), counting(&second));
        assert_eq!(registry.len(), 1);

        assert!(registry.notify(Path::new("/srv/home"), 10, 1));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_fire_at_most_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::new();
        registry.insert(Path::new("/srv/home"), counting(&counter));

        assert!(registry.notify(Path::new("/srv/home"), 1, 0));
        assert!(!registry.notify(Path::new("/srv/home"), 1, 0));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn failing_listener_is_contained() {
        let mut registry = ListenerRegistry::new();
        registry.insert(
            Path::new("/srv/home"),
            Box::new(|_, _, _| anyhow::bail!("store unavailable")),
        );

        assert!(registry.notify(Path::new("/srv/home"), 1, 0));
    }
}
