//! Owns every in-flight `TransactionCollector` within the watermark
//! window, plus the bookkeeping `commitment` and `checkpoint` consult
//! to decide whether a sequence number is still live.
//!
//! Grounded on `message_manager.cpp`'s `AssignNextSeq`/`AddConsensusMsg`/
//! `IsValidMsg`/`MayConsensusChangeStatus`/`GetPreparedProof`/
//! `GetTransactionState`/`SetLastCommittedTime`/`GetLastCommittedTime`/
//! `IsPrepared`. The original keeps these in a single `std::map<uint64_t,
//! TransactionCollector>` guarded by a mutex; here the pool is an
//! `IntMap` keyed by sequence number, since collectors are churned
//! constantly as the watermark slides and IntMap avoids hashing an
//! already-dense integer key.

use std::time::Instant;

use intmap::IntMap;

use crate::bft::commitment::collector::{CollectorStatus, TransactionCollector};
use crate::bft::communication::NodeId;
use crate::bft::communication::message::PreparedProof;
use crate::bft::config::ReplicaConfig;
use crate::bft::collections::{self, HashMap};
use crate::bft::crypto::hash::Digest;
use crate::bft::ordering::SeqNo;

/// A snapshot of where a sequence number's three-phase commitment
/// currently stands, for callers that only need to read, not mutate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub status: CollectorStatus,
    pub view: u64,
    pub digest: Option<Digest>,
}

pub struct MessageManager {
    watermark_window: u32,
    low_water_mark: SeqNo,
    next_seq: SeqNo,
    max_executed_seq: SeqNo,
    collectors: IntMap<TransactionCollector>,
    last_committed_time: HashMap<NodeId, Instant>,
}

impl MessageManager {
    pub fn new(config: &ReplicaConfig) -> Self {
        MessageManager {
            watermark_window: config.watermark_window(),
            low_water_mark: SeqNo::ZERO,
            next_seq: SeqNo::ZERO,
            max_executed_seq: SeqNo::ZERO,
            collectors: IntMap::new(),
            last_committed_time: collections::hash_map_capacity(config.params().n()),
        }
    }

    pub fn low_water_mark(&self) -> SeqNo {
        self.low_water_mark
    }

    pub fn max_executed_seq(&self) -> SeqNo {
        self.max_executed_seq
    }

    /// Hands out the next sequence number for a new client batch,
    /// unless doing so would push `next_seq − max_executed_seq` past
    /// `W`, in which case the sequence window is exhausted and the
    /// caller must apply backpressure. Only meaningful for the current
    /// primary.
    pub fn assign_next_seq(&mut self) -> Option<SeqNo> {
        if self.next_seq.saturating_sub(self.max_executed_seq) >= self.watermark_window {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.next();
        Some(seq)
    }

    /// Whether `seq` falls within `[low_water_mark, low_water_mark + W)`.
    pub fn is_valid_msg(&self, seq: SeqNo) -> bool {
        seq.in_window(self.low_water_mark, self.watermark_window)
    }

    fn key(seq: SeqNo) -> u64 {
        u32::from(seq) as u64
    }

    /// Returns the collector for `seq`, creating one lazily if `seq`
    /// is still within the watermark window.
    pub fn collector_mut(&mut self, seq: SeqNo) -> Option<&mut TransactionCollector> {
        if !self.is_valid_msg(seq) {
            return None;
        }
        let key = Self::key(seq);
        if !self.collectors.contains_key(key) {
            self.collectors.insert(key, TransactionCollector::new(seq));
        }
        self.collectors.get_mut(key)
    }

    pub fn collector(&self, seq: SeqNo) -> Option<&TransactionCollector> {
        self.collectors.get(Self::key(seq))
    }

    /// Records a PRE_PREPARE. Returns `false` if a conflicting digest
    /// was already bound to this slot (`DuplicateProposal`).
    pub fn add_pre_prepare(&mut self, seq: SeqNo, view: u64, digest: Digest) -> bool {
        match self.collector_mut(seq) {
            Some(c) => c.set_pre_prepare(view, digest),
            None => false,
        }
    }

    pub fn add_prepare(&mut self, seq: SeqNo, node: NodeId, digest: Digest) {
        if let Some(c) = self.collector_mut(seq) {
            c.add_prepare(node, digest);
        }
    }

    pub fn add_commit(&mut self, seq: SeqNo, node: NodeId, digest: Digest) {
        if let Some(c) = self.collector_mut(seq) {
            c.add_commit(node, digest);
        }
    }

    /// Checks whether `seq`'s collector can advance given `quorum`
    /// matching votes, advancing it in place if so.
    pub fn may_advance(&mut self, seq: SeqNo, quorum: usize) -> Option<CollectorStatus> {
        let c = self.collectors.get_mut(Self::key(seq))?;
        let advanced = c.may_advance(quorum);
        advanced.then(|| c.status())
    }

    pub fn mark_executed(&mut self, seq: SeqNo) {
        if let Some(c) = self.collectors.get_mut(Self::key(seq)) {
            c.mark_executed();
        }
        if seq > self.max_executed_seq {
            self.max_executed_seq = seq;
        }
    }

    pub fn is_prepared(&self, seq: SeqNo) -> bool {
        matches!(
            self.collector(seq).map(|c| c.status()),
            Some(CollectorStatus::ReadyCommit)
                | Some(CollectorStatus::ReadyExecute)
                | Some(CollectorStatus::Executed)
        )
    }

    pub fn transaction_state(&self, seq: SeqNo) -> Option<TransactionState> {
        self.collector(seq).map(|c| TransactionState {
            status: c.status(),
            view: c.view(),
            digest: c.digest().copied(),
        })
    }

    /// Builds a `PreparedProof` for `seq`, if it has reached
    /// `ReadyCommit` or later (i.e. gathered a prepare quorum).
    pub fn get_prepared_proof(&self, seq: SeqNo) -> Option<PreparedProof> {
        let c = self.collector(seq)?;
        if !self.is_prepared(seq) {
            return None;
        }
        Some(PreparedProof {
            seq,
            digest: *c.digest()?,
            view: c.view(),
        })
    }

    pub fn set_last_committed_time(&mut self, node: NodeId, at: Instant) {
        self.last_committed_time.insert(node, at);
    }

    pub fn get_last_committed_time(&self, node: NodeId) -> Option<Instant> {
        self.last_committed_time.get(&node).copied()
    }

    /// Slides the watermark window forward to `new_lo`, discarding
    /// collectors that fall below it. Called once a checkpoint
    /// becomes stable.
    pub fn advance_watermark(&mut self, new_lo: SeqNo) {
        if new_lo <= self.low_water_mark {
            return;
        }
        let window = self.watermark_window as u64;
        let lo = Self::key(self.low_water_mark);
        let hi = Self::key(new_lo);
        for key in lo..hi.min(lo + window + 1) {
            self.collectors.remove(key);
        }
        self.low_water_mark = new_lo;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bft::config::SystemParams;

    fn manager() -> MessageManager {
        let params = SystemParams::new(4, 1).unwrap();
        let config = ReplicaConfig::new(NodeId::from(0), params);
        MessageManager::new(&config)
    }

    fn digest(b: u8) -> Digest {
        let mut ctx = crate::bft::crypto::hash::Context::new();
        ctx.update(&[b]);
        ctx.finish()
    }

    #[test]
    fn rejects_messages_outside_watermark() {
        let mut mm = manager();
        let far = SeqNo::from(5000u32);
        assert!(!mm.is_valid_msg(far));
        assert!(mm.collector_mut(far).is_none());
    }

    #[test]
    fn prepared_proof_available_once_commit_ready() {
        let mut mm = manager();
        let seq = SeqNo::from(1u32);
        let d = digest(9);
        assert!(mm.add_pre_prepare(seq, 0, d));
        for i in 0..3u32 {
            mm.add_prepare(seq, NodeId::from(i), d);
        }
        assert_eq!(mm.may_advance(seq, 3), Some(CollectorStatus::ReadyCommit));
        assert!(mm.is_prepared(seq));
        let proof = mm.get_prepared_proof(seq).unwrap();
        assert_eq!(proof.digest, d);
    }

    #[test]
    fn advance_watermark_evicts_old_collectors() {
        let mut mm = manager();
        let seq = SeqNo::from(1u32);
        mm.add_pre_prepare(seq, 0, digest(1));
        assert!(mm.collector(seq).is_some());
        mm.advance_watermark(SeqNo::from(100u32));
        assert!(mm.collector(seq).is_none());
    }

    #[test]
    fn assign_next_seq_exhausts_once_window_is_full() {
        let params = SystemParams::new(4, 1).unwrap();
        let config = ReplicaConfig::new(NodeId::from(0), params).with_watermark_window(2);
        let mut mm = MessageManager::new(&config);

        assert!(mm.assign_next_seq().is_some());
        assert!(mm.assign_next_seq().is_some());
        assert!(mm.assign_next_seq().is_none());

        mm.mark_executed(SeqNo::from(1u32));
        assert!(mm.assign_next_seq().is_some());
    }
}
