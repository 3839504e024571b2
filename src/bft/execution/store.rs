//! Versioned key/value contract storage, matching spec.md §4.5's
//! `D_Storage` contract: `load`/`store`/`reset`, plus the per-key
//! version counter the OCC committer validates reads against.

use parking_lot::RwLock;

use crate::bft::collections::{self, HashMap};
use crate::bft::ordering::SeqNo;

/// External collaborator backing contract state. Out of scope:
/// the persistent KV engine behind it (spec.md §1) -- `InMemoryStore`
/// below is a reference implementation used by this crate's own
/// tests, not a production backend.
pub trait VersionedStore: Send + Sync {
    /// The current version counter for `key`, or `0` if never written.
    fn version(&self, key: &[u8]) -> u64;

    fn load(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Writes `value` to `key`, bumping its version counter.
    fn store(&self, key: Vec<u8>, value: Vec<u8>);

    fn remove(&self, key: &[u8]);

    /// Prunes any bookkeeping tied to sequence numbers below `seq`
    /// (e.g. a pruned log of past versions), called by
    /// `CheckpointManager` once `seq` becomes stable.
    fn reset(&self, seq: SeqNo);
}

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    version: u64,
}

/// A simple in-memory `VersionedStore`, sufficient for single-process
/// tests and as a template for a real backend.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Entry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore { entries: RwLock::new(collections::hash_map_capacity(64)) }
    }
}

impl VersionedStore for InMemoryStore {
    fn version(&self, key: &[u8]) -> u64 {
        self.entries.read().get(key).map(|e| e.version).unwrap_or(0)
    }

    fn load(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.read().get(key).map(|e| e.value.clone())
    }

    fn store(&self, key: Vec<u8>, value: Vec<u8>) {
        let mut entries = self.entries.write();
        let version = entries.get(&key).map(|e| e.version).unwrap_or(0) + 1;
        entries.insert(key, Entry { value, version });
    }

    fn remove(&self, key: &[u8]) {
        self.entries.write().remove(key);
    }

    fn reset(&self, _seq: SeqNo) {
        // No historical versions are retained past the current value,
        // so pruning has nothing further to do.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_bumps_version_on_write() {
        let store = InMemoryStore::new();
        assert_eq!(store.version(b"k"), 0);
        store.store(b"k".to_vec(), b"v1".to_vec());
        assert_eq!(store.version(b"k"), 1);
        store.store(b"k".to_vec(), b"v2".to_vec());
        assert_eq!(store.version(b"k"), 2);
        assert_eq!(store.load(b"k"), Some(b"v2".to_vec()));
    }
}
