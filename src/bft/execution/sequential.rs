//! Sequential execution: no conflict detection, because there is no
//! concurrency to detect conflicts from. Transactions commit in the
//! order `push_commit` was called, always successfully.

use std::sync::Arc;

use crate::bft::error::*;
use crate::bft::execution::{ChangeSet, ContractCommitter, Operation, VersionedStore};

pub struct Sequential {
    store: Arc<dyn VersionedStore>,
    pending: crate::bft::collections::HashMap<u64, ChangeSet>,
}

impl Sequential {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Sequential {
            store,
            pending: crate::bft::collections::hash_map_capacity(16),
        }
    }
}

impl ContractCommitter for Sequential {
    fn push_commit(&mut self, commit_id: u64, changes: ChangeSet) {
        self.pending.insert(commit_id, changes);
    }

    fn check_commit(&self, commit_id: u64) -> bool {
        self.pending.contains_key(&commit_id)
    }

    fn commit(&mut self, commit_id: u64) -> Result<bool> {
        let changes = match self.pending.remove(&commit_id) {
            Some(c) => c,
            None => return Err("no recorded change set for this commit id").wrapped(ErrorKind::ExecutionFailure),
        };
        for (key, ops) in changes {
            apply_last_write(&*self.store, key, &ops);
        }
        Ok(true)
    }
}

pub(crate) fn apply_last_write(store: &dyn VersionedStore, key: Vec<u8>, ops: &[Operation]) {
    for op in ops.iter().rev() {
        match op {
            Operation::Store { data, .. } => {
                store.store(key, data.clone());
                return;
            }
            Operation::Remove { .. } => {
                store.remove(&key);
                return;
            }
            Operation::Load { .. } => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::execution::InMemoryStore;

    #[test]
    fn commits_writes_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let mut seq = Sequential::new(store.clone());
        let mut changes: ChangeSet = crate::bft::collections::hash_map_capacity(1);
        changes.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"v".to_vec() }]);
        seq.push_commit(0, changes);
        assert!(seq.commit(0).unwrap());
        assert_eq!(store.load(b"k"), Some(b"v".to_vec()));
    }
}
