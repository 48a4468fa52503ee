//! `FileTable`: default `TargetTable` implementation.

use aio_core::entry::TargetId;
use aio_core::target::{IoTarget, TargetTable};

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// A caller's descriptor table. Handles are allocated from 3 upward.
pub struct FileTable {
    entries: RwLock<HashMap<TargetId, Arc<dyn IoTarget>>>,
    next: AtomicI32,
}

impl FileTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next: AtomicI32::new(3),
        }
    }

    /// Install `target` under a fresh handle.
    pub fn install(&self, target: Arc<dyn IoTarget>) -> TargetId {
        let id = TargetId(self.next.fetch_add(1, Ordering::Relaxed));
        self.install_at(id, target);
        id
    }

    /// Install `target` under `id`, replacing any previous entry.
    pub fn install_at(&self, id: TargetId, target: Arc<dyn IoTarget>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, target);
    }

    /// Remove a handle. In-flight requests keep their own reference.
    pub fn close(&self, id: TargetId) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetTable for FileTable {
    fn resolve(&self, id: TargetId) -> Option<Arc<dyn IoTarget>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem_file::MemFile;

    #[test]
    fn install_resolve_close() {
        let table = FileTable::new();
        let id = table.install(Arc::new(MemFile::new(vec![0; 4])));
        assert_eq!(id, TargetId(3));
        assert!(table.resolve(id).is_some());
        assert!(table.resolve(TargetId(99)).is_none());
        assert!(table.close(id));
        assert!(!table.close(id));
        assert!(table.resolve(id).is_none());
    }
}
