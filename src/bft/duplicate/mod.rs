//! Tracks whether a client request digest has already been proposed
//! or executed, so a retransmitted request is never double-committed.
//!
//! No source file for this survived prep-filtering; built directly
//! from the state machine description, cross-checked against its call
//! sites in `commitment.cpp`: `CheckIfExecuted`, `CheckAndAddProposed`,
//! `EraseProposed`.

use crate::bft::collections::OrderedMap;
use crate::bft::crypto::hash::Digest;

/// A request digest's lifecycle: `Unseen` (absent from the map)
/// never appears as a stored value, only as the answer when a digest
/// has no entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DuplicateStatus {
    Unseen,
    Proposed,
    Executed,
}

/// `sweep_threshold` bounds how many `Executed` entries accumulate
/// before the oldest ones (by insertion order) are dropped.
pub struct DuplicateManager {
    sweep_threshold: usize,
    states: OrderedMap<Digest, DuplicateStatus>,
}

impl DuplicateManager {
    pub fn new(sweep_threshold: usize) -> Self {
        DuplicateManager {
            sweep_threshold,
            states: OrderedMap::new(),
        }
    }

    pub fn status(&self, digest: &Digest) -> DuplicateStatus {
        self.states.get(digest).copied().unwrap_or(DuplicateStatus::Unseen)
    }

    pub fn is_executed(&self, digest: &Digest) -> bool {
        self.status(digest) == DuplicateStatus::Executed
    }

    /// Marks `digest` as `Proposed`, unless it was already proposed or
    /// executed. Returns `true` if this call performed the transition
    /// (i.e. the caller may go ahead and propose it).
    pub fn check_and_add_proposed(&mut self, digest: Digest) -> bool {
        match self.states.get(&digest) {
            Some(DuplicateStatus::Proposed) | Some(DuplicateStatus::Executed) => false,
            _ => {
                self.states.insert(digest, DuplicateStatus::Proposed);
                true
            }
        }
    }

    /// Reverts a `Proposed` digest back to `Unseen`, e.g. after its
    /// consensus instance failed to reach a quorum and the slot was
    /// reassigned during a view change.
    pub fn erase_proposed(&mut self, digest: &Digest) {
        if self.status(digest) == DuplicateStatus::Proposed {
            self.states.remove(digest);
        }
    }

    pub fn mark_executed(&mut self, digest: Digest) {
        self.states.insert(digest, DuplicateStatus::Executed);
        self.sweep();
    }

    fn sweep(&mut self) {
        while self.states.len() > self.sweep_threshold {
            match self.states.front() {
                Some((_, DuplicateStatus::Executed)) => {
                    self.states.pop_front();
                }
                _ => break,
            }
        }
    }
}
