//! Per-sequence vote tracking for the three-phase commitment.
//!
//! Generalizes the teacher's single in-flight `Consensus`/`ProtoPhase`
//! tracker (see `commitment/mod.rs`) into one collector per sequence
//! number, so that `MessageManager` can keep several instances within
//! the watermark window in flight at once, as resdb's
//! `transaction_collector` does.

use std::collections::HashMap;

use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::ordering::SeqNo;

/// Status of a single sequence number's three-phase commitment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CollectorStatus {
    None,
    ReadyPrepare,
    ReadyCommit,
    ReadyExecute,
    Executed,
}

/// Tracks votes for a single sequence number, across the
/// pre-prepare/prepare/commit phases. Status only ever moves forward.
pub struct TransactionCollector {
    seq: SeqNo,
    status: CollectorStatus,
    view: u64,
    digest: Option<Digest>,
    prepare_votes: HashMap<NodeId, Digest>,
    commit_votes: HashMap<NodeId, Digest>,
}

impl TransactionCollector {
    pub fn new(seq: SeqNo) -> Self {
        TransactionCollector {
            seq,
            status: CollectorStatus::None,
            view: 0,
            digest: None,
            prepare_votes: HashMap::new(),
            commit_votes: HashMap::new(),
        }
    }

    pub fn seq(&self) -> SeqNo {
        self.seq
    }

    pub fn status(&self) -> CollectorStatus {
        self.status
    }

    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    /// Records the pre-prepare proposed by the primary.
    ///
    /// Returns `false` when a different digest was already bound to
    /// this slot: the caller should treat this as a duplicate/
    /// conflicting proposal and refuse to rebind.
    pub fn set_pre_prepare(&mut self, view: u64, digest: Digest) -> bool {
        if let Some(existing) = &self.digest {
            return *existing == digest;
        }
        self.view = view;
        self.digest = Some(digest);
        if self.status == CollectorStatus::None {
            self.status = CollectorStatus::ReadyPrepare;
        }
        true
    }

    /// Records a PREPARE vote from `node` for `digest`.
    pub fn add_prepare(&mut self, node: NodeId, digest: Digest) {
        self.prepare_votes.insert(node, digest);
    }

    /// Records a COMMIT vote from `node` for `digest`.
    pub fn add_commit(&mut self, node: NodeId, digest: Digest) {
        self.commit_votes.insert(node, digest);
    }

    fn matching(&self, votes: &HashMap<NodeId, Digest>) -> usize {
        match &self.digest {
            None => 0,
            Some(d) => votes.values().filter(|v| *v == d).count(),
        }
    }

    pub fn prepare_votes(&self) -> usize {
        self.matching(&self.prepare_votes)
    }

    pub fn commit_votes(&self) -> usize {
        self.matching(&self.commit_votes)
    }

    /// Advances `status` once `quorum` matching votes have been
    /// gathered for the current phase. Returns `true` if the status
    /// changed (the `MayConsensusChangeStatus` compare-and-swap in
    /// the original).
    pub fn may_advance(&mut self, quorum: usize) -> bool {
        match self.status {
            CollectorStatus::ReadyPrepare if self.prepare_votes() >= quorum => {
                self.status = CollectorStatus::ReadyCommit;
                true
            }
            CollectorStatus::ReadyCommit if self.commit_votes() >= quorum => {
                self.status = CollectorStatus::ReadyExecute;
                true
            }
            _ => false,
        }
    }

    pub fn mark_executed(&mut self) {
        self.status = CollectorStatus::Executed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(b: u8) -> Digest {
        let mut ctx = crate::bft::crypto::hash::Context::new();
        ctx.update(&[b]);
        ctx.finish()
    }

    #[test]
    fn status_is_monotonic_under_quorum_growth() {
        let mut c = TransactionCollector::new(SeqNo::from(1u32));
        let d = digest(1);
        assert_eq!(c.status(), CollectorStatus::None);
        assert!(c.set_pre_prepare(0, d));
        assert_eq!(c.status(), CollectorStatus::ReadyPrepare);

        for i in 0..3u32 {
            c.add_prepare(NodeId::from(i), d);
        }
        assert!(c.may_advance(3));
        assert_eq!(c.status(), CollectorStatus::ReadyCommit);

        for i in 0..3u32 {
            c.add_commit(NodeId::from(i), d);
        }
        assert!(c.may_advance(3));
        assert_eq!(c.status(), CollectorStatus::ReadyExecute);
    }

    #[test]
    fn conflicting_pre_prepare_is_rejected() {
        let mut c = TransactionCollector::new(SeqNo::from(1u32));
        assert!(c.set_pre_prepare(0, digest(1)));
        assert!(!c.set_pre_prepare(0, digest(2)));
    }
}
