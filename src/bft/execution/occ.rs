//! Optimistic concurrency control.
//!
//! Grounded on `v_controller.cpp`'s `CheckCommit`/`Commit` pair: a
//! transaction records the store version it observed for every key it
//! read; `check_commit` replays those reads against the current
//! version, and `commit` applies the last recorded write per key only
//! if every read still matches.

use std::sync::Arc;

use crate::bft::collections::{self, HashMap};
use crate::bft::error::*;
use crate::bft::execution::sequential::apply_last_write;
use crate::bft::execution::{ChangeSet, ContractCommitter, Operation, VersionedStore, MAX_OCC_RETRIES};

pub struct Occ {
    store: Arc<dyn VersionedStore>,
    changes_list: HashMap<u64, ChangeSet>,
    retries: HashMap<u64, u32>,
}

impl Occ {
    pub fn new(store: Arc<dyn VersionedStore>) -> Self {
        Occ {
            store,
            changes_list: collections::hash_map_capacity(64),
            retries: collections::hash_map_capacity(64),
        }
    }

    fn reads_still_valid(&self, changes: &ChangeSet) -> bool {
        changes.iter().all(|(key, ops)| {
            ops.iter().all(|op| match op {
                Operation::Load { version, .. } => self.store.version(key) == *version,
                _ => true,
            })
        })
    }
}

impl ContractCommitter for Occ {
    fn push_commit(&mut self, commit_id: u64, changes: ChangeSet) {
        self.changes_list.insert(commit_id, changes);
    }

    fn check_commit(&self, commit_id: u64) -> bool {
        match self.changes_list.get(&commit_id) {
            Some(changes) => self.reads_still_valid(changes),
            None => false,
        }
    }

    fn commit(&mut self, commit_id: u64) -> Result<bool> {
        let changes = match self.changes_list.get(&commit_id) {
            Some(c) => c.clone(),
            None => return Err("no recorded change set for this commit id").wrapped(ErrorKind::ExecutionFailure),
        };

        if !self.reads_still_valid(&changes) {
            let attempts = self.retries.entry(commit_id).or_insert(0);
            *attempts += 1;
            if *attempts > MAX_OCC_RETRIES {
                self.changes_list.remove(&commit_id);
                self.retries.remove(&commit_id);
                return Err("exceeded the maximum number of optimistic retries")
                    .wrapped(ErrorKind::ExecutionFailure);
            }
            return Ok(false);
        }

        for (key, ops) in &changes {
            apply_last_write(&*self.store, key.clone(), ops);
        }

        self.changes_list.remove(&commit_id);
        self.retries.remove(&commit_id);
        Ok(true)
    }
}
