//! Dependency-graph execution.
//!
//! Grounded on `x_verifier.cpp`'s `VerifyContract`: build a dependency
//! edge between two transactions in the same batch whenever their
//! read/write sets touch the same key, then execute in topological
//! order (Kahn's algorithm) so that transactions with no remaining
//! dependency run as a parallel layer.

use std::sync::Arc;

use crate::bft::collections::{self, HashMap};
use crate::bft::error::*;
use crate::bft::execution::sequential::apply_last_write;
use crate::bft::execution::{ChangeSet, ContractCommitter, VersionedStore};

pub struct Dag {
    store: Arc<dyn VersionedStore>,
    batch: Vec<(u64, ChangeSet)>,
    committed: HashMap<u64, ()>,
}

impl Dag {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Dag {
            store,
            batch: Vec::new(),
            committed: collections::hash_map_capacity(64),
        }
    }

    /// Returns, for each queued commit, the set of earlier-queued
    /// commits it depends on (any key overlap between the two).
    fn build_dependencies(&self) -> HashMap<u64, Vec<u64>> {
        let mut deps: HashMap<u64, Vec<u64>> = collections::hash_map_capacity(self.batch.len());
        for (i, (id, changes)) in self.batch.iter().enumerate() {
            let mut my_deps = Vec::new();
            for (earlier_id, earlier_changes) in self.batch[..i].iter() {
                if changes.keys().any(|k| earlier_changes.contains_key(k)) {
                    my_deps.push(*earlier_id);
                }
            }
            deps.insert(*id, my_deps);
        }
        deps
    }

    /// Kahn's algorithm: repeatedly execute the layer of commits with
    /// no unresolved dependency, then drop them from everyone else's
    /// dependency list.
    fn execute_topological(&mut self) {
        let mut deps = self.build_dependencies();
        let mut remaining: Vec<u64> = self.batch.iter().map(|(id, _)| *id).collect();

        while !remaining.is_empty() {
            let (ready, not_ready): (Vec<u64>, Vec<u64>) = remaining
                .iter()
                .partition(|id| deps.get(id).map(|d| d.is_empty()).unwrap_or(true));

            if ready.is_empty() {
                // A cycle would mean two commits mutually depend on
                // each other, which can't happen: dependencies only
                // point to strictly earlier indices in the batch.
                break;
            }

            for id in &ready {
                if let Some((_, changes)) = self.batch.iter().find(|(cid, _)| cid == id) {
                    for (key, ops) in changes {
                        apply_last_write(&*self.store, key.clone(), ops);
                    }
                }
                self.committed.insert(*id, ());
            }

            for id in &not_ready {
                if let Some(d) = deps.get_mut(id) {
                    d.retain(|dep| !ready.contains(dep));
                }
            }
            remaining = not_ready;
        }
    }
}

impl ContractCommitter for Dag {
    fn push_commit(&mut self, commit_id: u64, changes: ChangeSet) {
        self.batch.push((commit_id, changes));
    }

    fn check_commit(&self, commit_id: u64) -> bool {
        self.batch.iter().any(|(id, _)| *id == commit_id)
    }

    fn commit(&mut self, commit_id: u64) -> Result<bool> {
        if !self.committed.contains_key(&commit_id) {
            self.execute_topological();
            self.batch.clear();
        }
        if self.committed.contains_key(&commit_id) {
            Ok(true)
        } else {
            Err("commit id did not resolve during topological execution").wrapped(ErrorKind::ExecutionFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::execution::{InMemoryStore, Operation};

    #[test]
    fn independent_commits_all_apply() {
        let store = Arc::new(InMemoryStore::new());
        let mut dag = Dag::new(store.clone());

        let mut a: ChangeSet = collections::hash_map_capacity(1);
        a.insert(b"a".to_vec(), vec![Operation::Store { key: b"a".to_vec(), data: b"1".to_vec() }]);
        let mut b: ChangeSet = collections::hash_map_capacity(1);
        b.insert(b"b".to_vec(), vec![Operation::Store { key: b"b".to_vec(), data: b"2".to_vec() }]);

        dag.push_commit(0, a);
        dag.push_commit(1, b);
        assert!(dag.commit(0).unwrap());
        assert!(dag.commit(1).unwrap());
        assert_eq!(store.load(b"a"), Some(b"1".to_vec()));
        assert_eq!(store.load(b"b"), Some(b"2".to_vec()));
    }

    #[test]
    fn dependent_commits_apply_in_order() {
        let store = Arc::new(InMemoryStore::new());
        let mut dag = Dag::new(store.clone());

        let mut a: ChangeSet = collections::hash_map_capacity(1);
        a.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"first".to_vec() }]);
        let mut b: ChangeSet = collections::hash_map_capacity(1);
        b.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"second".to_vec() }]);

        dag.push_commit(0, a);
        dag.push_commit(1, b);
        assert!(dag.commit(1).unwrap());
        assert_eq!(store.load(b"k"), Some(b"second".to_vec()));
    }
}
