//! Replay auditor.
//!
//! Grounded on `x_verifier.cpp`: after a batch commits, replay its
//! recorded operations against a scratch store seeded from the same
//! starting versions and compare the resulting writes to what was
//! actually applied, surfacing non-determinism or a buggy committer
//! before it silently diverges state across replicas.

use std::collections::HashMap as StdHashMap;

use crate::bft::execution::{ChangeSet, InMemoryStore, Operation, VersionedStore};

/// One committed transaction's recorded change set plus the final
/// value it should have produced per key, as observed on the replica
/// that actually ran it.
pub struct CommittedRecord {
    pub commit_id: u64,
    pub changes: ChangeSet,
    pub observed: StdHashMap<Vec<u8>, Option<Vec<u8>>>,
}

/// A key where replay produced a different result than was observed.
#[derive(Debug, PartialEq, Eq)]
pub struct Divergence {
    pub commit_id: u64,
    pub key: Vec<u8>,
    pub expected: Option<Vec<u8>>,
    pub replayed: Option<Vec<u8>>,
}

/// Replays `records` in order against a fresh in-memory store and
/// reports every key whose replayed value disagrees with what was
/// observed when the batch first executed.
pub fn verify_batch(records: &[CommittedRecord]) -> Vec<Divergence> {
    let scratch = InMemoryStore::new();
    let mut divergences = Vec::new();

    for record in records {
        for (key, ops) in &record.changes {
            for op in ops {
                match op {
                    Operation::Store { data, .. } => scratch.store(key.clone(), data.clone()),
                    Operation::Remove { .. } => scratch.remove(key),
                    Operation::Load { .. } => {}
                }
            }
        }
        for (key, expected) in &record.observed {
            let replayed = scratch.load(key);
            if replayed != *expected {
                divergences.push(Divergence {
                    commit_id: record.commit_id,
                    key: key.clone(),
                    expected: expected.clone(),
                    replayed,
                });
            }
        }
    }

    divergences
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::collections;

    #[test]
    fn matching_replay_reports_no_divergence() {
        let mut changes: ChangeSet = collections::hash_map_capacity(1);
        changes.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"v".to_vec() }]);
        let mut observed = StdHashMap::new();
        observed.insert(b"k".to_vec(), Some(b"v".to_vec()));

        let records = vec![CommittedRecord { commit_id: 0, changes, observed }];
        assert!(verify_batch(&records).is_empty());
    }

    #[test]
    fn mismatched_observed_value_is_flagged() {
        let mut changes: ChangeSet = collections::hash_map_capacity(1);
        changes.insert(b"k".to_vec(), vec![Operation::Store { key: b"k".to_vec(), data: b"v".to_vec() }]);
        let mut observed = StdHashMap::new();
        observed.insert(b"k".to_vec(), Some(b"stale".to_vec()));

        let records = vec![CommittedRecord { commit_id: 7, changes, observed }];
        let divergences = verify_batch(&records);
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].commit_id, 7);
    }
}
