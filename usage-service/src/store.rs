// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use usage_types::{PathKeyed, UsageStatus};

/// Latest usage record per path.
///
/// Readers get an immutable snapshot that stays valid while a run keeps
/// publishing; writers copy the vector only when a snapshot is still held.
#[derive(Debug)]
pub struct UsageStore<T> {
    records: RwLock<Arc<Vec<T>>>,
}

impl<T> Default for UsageStore<T> {
    fn default() -> Self {
        Self {
            records: RwLock::new(Arc::new(Vec::new())),
        }
    }
}

impl<T: PathKeyed + Clone> UsageStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from previously saved records. Later duplicates win.
    pub fn from_records(records: Vec<T>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.records.read())
    }

    pub fn get(&self, path: &Path) -> UsageStatus<T> {
        self.records
            .read()
            .iter()
            .find(|record| record.path() == path)
            .cloned()
            .into()
    }

    /// Insert `record`, replacing any record for the same path.
    pub fn upsert(&self, record: T) {
        let mut guard = self.records.write();
        let records = Arc::make_mut(&mut guard);
        match records
            .iter_mut()
            .find(|existing| existing.path() == record.path())
        {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Keep only the records matching `keep`; returns how many were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut guard = self.records.write();
        if guard.iter().all(&mut keep) {
            return 0;
        }
        let records = Arc::make_mut(&mut guard);
        let before = records.len();
        records.retain(|record| keep(record));
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
