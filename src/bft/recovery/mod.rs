//! Collaborative state transfer: a lagging or rebooted replica
//! catches up by gathering a quorum of matching state snapshots from
//! its peers, rather than replaying the whole decided chain.
//!
//! Simplified from the teacher's `cst` module (471 lines covering a
//! multi-round fetch protocol with partial reads) down to the
//! STATUS_SYNC/RECOVERY_DATA exchange of spec.md §4.3: a replica that
//! falls behind broadcasts `StatusSyncMessage`, and once it sees a
//! peer further ahead, issues a `RecoveryMessage` and waits for `Q`
//! matching `RecoveryState` snapshots before installing one.

use crate::bft::core::ViewInfo;
use crate::bft::log::{Checkpoint, DecisionLog};
use crate::bft::ordering::SeqNo;
use crate::bft::communication::NodeId;
use crate::bft::collections::{self, HashMap};

/// A full snapshot of a peer's state, sufficient to catch up a
/// recovering replica: its view, last stable checkpoint, the chain of
/// operations decided since that checkpoint, and the decision log
/// backing them.
#[derive(Clone)]
pub struct RecoveryState<S, O> {
    view: ViewInfo,
    checkpoint: Checkpoint<S>,
    requests: Vec<O>,
    declog: DecisionLog,
}

impl<S, O> RecoveryState<S, O> {
    pub fn new(view: ViewInfo, checkpoint: Checkpoint<S>, requests: Vec<O>, declog: DecisionLog) -> Self {
        RecoveryState { view, checkpoint, requests, declog }
    }

    pub fn view(&self) -> &ViewInfo {
        &self.view
    }

    pub fn last_seq(&self) -> SeqNo {
        use crate::bft::ordering::Orderable;
        self.checkpoint.sequence_number()
    }

    pub fn into_inner(self) -> (ViewInfo, Checkpoint<S>, Vec<O>, DecisionLog) {
        (self.view, self.checkpoint, self.requests, self.declog)
    }
}

/// Gathers `RecoveryState` snapshots reported by peers, keyed by their
/// last decided sequence number, until `quorum` of them agree on the
/// same value. Mirrors the teacher's `cst` quorum-of-matching-replies
/// idea, generalized from full-state byte blobs to typed snapshots.
pub struct RecoveryCollector<S, O> {
    quorum: usize,
    by_last_seq: HashMap<u32, Vec<(NodeId, RecoveryState<S, O>)>>,
}

impl<S, O> RecoveryCollector<S, O> {
    pub fn new(quorum: usize) -> Self {
        RecoveryCollector {
            quorum,
            by_last_seq: collections::hash_map_capacity(quorum),
        }
    }

    /// Registers a snapshot reported by `from`. Returns the snapshot
    /// once `quorum` peers reported the same last sequence number; the
    /// returned value is this call's own contribution, which is
    /// sufficient since all reporters are required to agree on its
    /// contents via the checkpoint digest carried inside it.
    pub fn add(&mut self, from: NodeId, state: RecoveryState<S, O>) -> Option<RecoveryState<S, O>>
    where
        S: Clone,
        O: Clone,
    {
        let key = u32::from(state.last_seq());
        let bucket = self.by_last_seq.entry(key).or_insert_with(Vec::new);
        if bucket.iter().any(|(node, _)| *node == from) {
            return None;
        }
        bucket.push((from, state));
        if bucket.len() >= self.quorum {
            Some(bucket[0].1.clone())
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.by_last_seq.clear();
    }
}
