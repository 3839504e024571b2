//! Two-phase locking: acquire every key a transaction touches, in
//! sorted order to avoid a lock-ordering deadlock between concurrently
//! executing transactions, execute, then release on commit.

use std::sync::Arc;

use crate::bft::collections::{self, HashMap};
use crate::bft::error::*;
use crate::bft::execution::sequential::apply_last_write;
use crate::bft::execution::{ChangeSet, ContractCommitter, VersionedStore};

pub struct TwoPl {
    store: Arc<dyn VersionedStore>,
    locked: HashMap<Vec<u8>, u64>,
    pending: HashMap<u64, ChangeSet>,
}

impl TwoPl {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        TwoPl {
            store,
            locked: collections::hash_map_capacity(64),
            pending: collections::hash_map_capacity(16),
        }
    }

    /// Attempts to acquire every key in `changes`, in sorted order.
    /// Returns `false`, holding none of them, if any key is already
    /// locked by a different commit.
    fn try_lock_all(&mut self, commit_id: u64, changes: &ChangeSet) -> bool {
        let mut keys: Vec<&Vec<u8>> = changes.keys().collect();
        keys.sort();

        for key in &keys {
            if let Some(&holder) = self.locked.get(*key) {
                if holder != commit_id {
                    return false;
                }
            }
        }
        for key in keys {
            self.locked.insert(key.clone(), commit_id);
        }
        true
    }

    fn unlock_all(&mut self, commit_id: u64) {
        self.locked.retain(|_, &mut holder| holder != commit_id);
    }
}

impl ContractCommitter for TwoPl {
    fn push_commit(&mut self, commit_id: u64, changes: ChangeSet) {
        self.pending.insert(commit_id, changes);
    }

    fn check_commit(&self, commit_id: u64) -> bool {
        self.pending.contains_key(&commit_id)
    }

    fn commit(&mut self, commit_id: u64) -> Result<bool> {
        let changes = match self.pending.get(&commit_id) {
            Some(c) => c.clone(),
            None => return Err("no recorded change set for this commit id").wrapped(ErrorKind::ExecutionFailure),
        };

        if !self.try_lock_all(commit_id, &changes) {
            return Ok(false);
        }

        for (key, ops) in &changes {
            apply_last_write(&*self.store, key.clone(), ops);
        }

        self.unlock_all(commit_id);
        self.pending.remove(&commit_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::execution::{InMemoryStore, Operation};

    #[test]
    fn conflicting_keys_serialize_through_locks() {
        let store = Arc::new(InMemoryStore::new());
        let mut tpl = TwoPl::new(store.clone());

        let mut a: ChangeSet = collections::hash_map_capacity(1);
        a.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"a".to_vec() }]);
        tpl.push_commit(0, a);
        assert!(tpl.commit(0).unwrap());

        let mut b: ChangeSet = collections::hash_map_capacity(1);
        b.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"b".to_vec() }]);
        tpl.push_commit(1, b);
        assert!(tpl.commit(1).unwrap());

        assert_eq!(store.load(b"k"), Some(b"b".to_vec()));
        assert!(tpl.locked.is_empty());
    }
}
