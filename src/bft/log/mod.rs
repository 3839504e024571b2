//! Persisted replica state: the decision log of consensus messages,
//! the pending/decided client requests, and local checkpoints.

#[cfg(feature = "serialize_serde")]
use serde::{Serialize, Deserialize};

use crate::bft::error::*;
use crate::bft::recovery::RecoveryState;
use crate::bft::crypto::hash::Digest;
use crate::bft::core::ViewInfo;
use crate::bft::executable::UpdateBatch;
use crate::bft::communication::message::{
    Header,
    SystemMessage,
    RequestMessage,
    ConsensusMessage,
    ConsensusMessageKind,
};
use crate::bft::collections::{self, HashMap, OrderedMap};
use crate::bft::ordering::{SeqNo, Orderable};

/// Checkpoint period, in number of decided sequence numbers.
pub const PERIOD: u32 = 1000;

/// Information reported after a logging operation.
pub enum Info {
    /// Nothing to report.
    Nil,
    /// The log became full. We are waiting for the execution layer to
    /// provide the current application state, to complete the log's
    /// garbage collection and eventually its checkpoint.
    BeginCheckpoint,
}

enum CheckpointState<S> {
    None,
    Partial {
        seq: SeqNo,
    },
    PartialWithEarlier {
        seq: SeqNo,
        earlier: Checkpoint<S>,
    },
    Complete(Checkpoint<S>),
}

/// A local checkpoint: the application state, plus the sequence
/// number of the last batch executed before it was taken.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub struct Checkpoint<S> {
    seq: SeqNo,
    appstate: S,
}

impl<S> Orderable for Checkpoint<S> {
    fn sequence_number(&self) -> SeqNo {
        self.seq
    }
}

impl<S> Checkpoint<S> {
    pub fn new(seq: SeqNo, appstate: S) -> Self {
        Checkpoint { seq, appstate }
    }

    pub fn state(&self) -> &S {
        &self.appstate
    }

    pub fn into_inner(self) -> (SeqNo, S) {
        (self.seq, self.appstate)
    }
}

/// A system message together with the header it arrived with.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone)]
pub struct StoredMessage<M> {
    header: Header,
    message: M,
}

impl<M> StoredMessage<M> {
    pub fn new(header: Header, message: M) -> Self {
        Self { header, message }
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_inner(self) -> (Header, M) {
        (self.header, self.message)
    }
}

/// Subset of a `Log` containing only consensus messages received
/// since the last checkpoint.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Clone, Default)]
pub struct DecisionLog {
    pre_prepares: Vec<StoredMessage<ConsensusMessage>>,
    prepares: Vec<StoredMessage<ConsensusMessage>>,
    commits: Vec<StoredMessage<ConsensusMessage>>,
}

impl DecisionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pre_prepares(&self) -> &[StoredMessage<ConsensusMessage>] {
        &self.pre_prepares[..]
    }

    pub fn prepares(&self) -> &[StoredMessage<ConsensusMessage>] {
        &self.prepares[..]
    }

    pub fn commits(&self) -> &[StoredMessage<ConsensusMessage>] {
        &self.commits[..]
    }
}

/// The replica's request log: pending client requests awaiting a
/// batch, the decision log of consensus votes since the last
/// checkpoint, and the chain of decided operations.
pub struct Log<S, O> {
    curr_seq: SeqNo,
    batch_size: usize,
    declog: DecisionLog,
    requests: OrderedMap<Digest, StoredMessage<RequestMessage<O>>>,
    deciding: HashMap<Digest, StoredMessage<RequestMessage<O>>>,
    decided: Vec<O>,
    checkpoint: CheckpointState<S>,
}

impl<S, O> Log<S, O> {
    /// `batch_size` is the maximum number of client requests batched
    /// into a single consensus instance.
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            curr_seq: SeqNo::ZERO,
            declog: DecisionLog::new(),
            deciding: collections::hash_map_capacity(batch_size),
            decided: Vec::with_capacity(PERIOD as usize),
            requests: collections::ordered_map(),
            checkpoint: CheckpointState::None,
        }
    }

    pub fn decision_log(&self) -> &DecisionLog {
        &self.declog
    }

    /// Replaces this log's state with a snapshot received over the
    /// recovery protocol.
    pub fn install_state(&mut self, last_seq: SeqNo, rs: RecoveryState<S, O>) {
        let (_view, checkpoint, requests, declog) = rs.into_inner();
        self.declog = declog;
        self.decided = requests;
        self.checkpoint = CheckpointState::Complete(checkpoint);
        self.curr_seq = last_seq;
    }

    /// Takes a snapshot of the log, to serve a recovering peer.
    ///
    /// Fails if a checkpoint is in progress and hasn't yet received
    /// the application state from the execution layer.
    pub fn snapshot(&self, view: ViewInfo) -> Result<RecoveryState<S, O>>
    where
        S: Clone,
        O: Clone,
    {
        match self.checkpoint {
            CheckpointState::Complete(ref checkpoint) => Ok(RecoveryState::new(
                view,
                checkpoint.clone(),
                self.decided.clone(),
                self.declog.clone(),
            )),
            _ => Err("checkpoint is not yet finalized").wrapped(ErrorKind::Log),
        }
    }

    /// Adds `message` and its `header` to the log. `digest` is the
    /// hash of the request's payload, used as its key in the request
    /// maps; it has no effect for non-request messages.
    pub fn insert(&mut self, header: Header, digest: Digest, message: SystemMessage<O>) {
        match message {
            SystemMessage::Request(message) => {
                let stored = StoredMessage::new(header, message);
                self.requests.insert(digest, stored);
            }
            SystemMessage::Consensus(message) => {
                let stored = StoredMessage::new(header, message);
                match stored.message().kind() {
                    ConsensusMessageKind::PrePrepare(_) => self.declog.pre_prepares.push(stored),
                    ConsensusMessageKind::Prepare(_) => self.declog.prepares.push(stored),
                    ConsensusMessageKind::Commit(_) => self.declog.commits.push(stored),
                }
            }
            _ => (),
        }
    }

    /// Retrieves the next batch of request digests available for
    /// proposing, once `batch_size` requests have accumulated.
    pub fn next_batch(&mut self) -> Option<Vec<Digest>> {
        let (digest, stored) = self.requests.pop_front()?;
        self.deciding.insert(digest, stored);
        if self.deciding.len() >= self.batch_size {
            Some(self.deciding.keys().copied().take(self.batch_size).collect())
        } else {
            None
        }
    }

    pub fn has_request(&self, digest: &Digest) -> bool {
        self.deciding.contains_key(digest) || self.requests.contains_key(digest)
    }

    pub fn clone_requests(&self, digests: &[Digest]) -> Vec<StoredMessage<RequestMessage<O>>>
    where
        O: Clone,
    {
        digests
            .iter()
            .flat_map(|d| self.deciding.get(d).or_else(|| self.requests.get(d)))
            .cloned()
            .collect()
    }

    /// Finalizes a decided batch, removing its requests from the
    /// pending maps and appending them to the decided chain. If the
    /// newly decided sequence number is a checkpoint boundary, begins
    /// a local checkpoint and reports `Info::BeginCheckpoint`.
    pub fn finalize_batch(&mut self, seq: SeqNo, digests: &[Digest]) -> Result<(Info, UpdateBatch<O>)>
    where
        O: Clone,
    {
        let mut batch = UpdateBatch::new(seq);
        for digest in digests {
            let (header, message) = self
                .deciding
                .remove(digest)
                .or_else(|| self.requests.remove(digest))
                .map(StoredMessage::into_inner)
                .ok_or_else(|| Error::simple(ErrorKind::Log))?;
            let operation = message.into_envelope().operation;
            batch.add(header.from(), *digest, operation);
        }

        for update in batch.as_ref() {
            self.decided.push(update.operation().clone());
        }

        self.curr_seq = seq;
        let seq_u32 = u32::from(seq);
        let info = if seq_u32 > 0 && seq_u32 % PERIOD == 0 {
            self.begin_checkpoint(seq)?
        } else {
            Info::Nil
        };

        Ok((info, batch))
    }

    fn begin_checkpoint(&mut self, seq: SeqNo) -> Result<Info> {
        let earlier = std::mem::replace(&mut self.checkpoint, CheckpointState::None);
        self.checkpoint = match earlier {
            CheckpointState::None => CheckpointState::Partial { seq },
            CheckpointState::Complete(earlier) => CheckpointState::PartialWithEarlier { seq, earlier },
            _ => return Err("checkpoint already in progress").wrapped(ErrorKind::Log),
        };
        Ok(Info::BeginCheckpoint)
    }

    /// Completes an on-going checkpoint with the application state
    /// reported by the execution layer, clearing the decided chain
    /// and the decision log up to the pre-prepare of the request
    /// currently in flight.
    pub fn finalize_checkpoint(&mut self, appstate: S) -> Result<()> {
        match self.checkpoint {
            CheckpointState::None => Err("no checkpoint has been started").wrapped(ErrorKind::Log),
            CheckpointState::Complete(_) => Err("checkpoint already finalized").wrapped(ErrorKind::Log),
            CheckpointState::Partial { seq } | CheckpointState::PartialWithEarlier { seq, .. } => {
                self.checkpoint = CheckpointState::Complete(Checkpoint { seq, appstate });
                self.decided.clear();
                match self.declog.pre_prepares.pop() {
                    Some(last_pre_prepare) => {
                        self.declog.pre_prepares.clear();
                        self.curr_seq = last_pre_prepare.message().sequence_number();
                    }
                    None => (),
                }
                self.declog.prepares.clear();
                self.declog.commits.clear();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_batch_waits_for_full_batch() {
        let mut log: Log<(), u32> = Log::new(2);
        assert!(log.next_batch().is_none());
    }
}
