//! Three-phase commitment: pre-prepare, prepare, commit.
//!
//! Grounded directly on `commitment.cpp`'s `ProcessNewRequest`/
//! `ProcessProposeMsg`/`ProcessPrepareMsg`/`ProcessCommitMsg`.

pub mod collector;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use self::collector::CollectorStatus;
use crate::bft::communication::message::{
    ConsensusMessage,
    ConsensusMessageKind,
    ForwardedRequest,
    Header,
    ResponseMessage,
    SystemMessage,
};
use crate::bft::communication::{NodeId, ReplicaCommunicator};
use crate::bft::core::SystemInfo;
use crate::bft::crypto::hash::Digest;
use crate::bft::duplicate::DuplicateManager;
use crate::bft::error::*;
use crate::bft::message_manager::MessageManager;
use crate::bft::ordering::SeqNo;
use crate::bft::stats::Stats;

pub use self::collector::TransactionCollector;

/// What the caller (the replica's dispatch loop) should do once a
/// `Commitment` operation returns.
pub enum Outcome {
    /// No further action is required.
    Nothing,
    /// This slot just reached `ReadyExecute`; hand it off to the
    /// execution layer, in order.
    ReadyToExecute(SeqNo),
    /// This replica is not the primary; the request was relayed and a
    /// pending-complaint entry armed for the view-change timer.
    Redirected,
    /// The sequence window is exhausted; a negative RESPONSE was sent
    /// to the proxy instead of a pre-prepare.
    Backpressure,
}

/// Drives one replica's three-phase commitment. Operates purely on
/// request digests: `Commitment` never inspects the request payload
/// itself, only the `Digest` bound to a slot by `MessageManager`; the
/// log/execution layers resolve digests back to operations.
pub struct Commitment {
    id: NodeId,
    system: Arc<SystemInfo>,
    message_manager: Arc<Mutex<MessageManager>>,
    duplicate: Arc<Mutex<DuplicateManager>>,
    communicator: Arc<dyn ReplicaCommunicator>,
    stats: Arc<Stats>,
    /// Digests forwarded to the primary but not yet seen bound to a
    /// slot; the view-change timer consults this to decide whether to
    /// complain about the current primary.
    pending_complaints: Mutex<Vec<Digest>>,
}

impl Commitment {
    pub fn new(
        id: NodeId,
        system: Arc<SystemInfo>,
        message_manager: Arc<Mutex<MessageManager>>,
        duplicate: Arc<Mutex<DuplicateManager>>,
        communicator: Arc<dyn ReplicaCommunicator>,
        stats: Arc<Stats>,
    ) -> Self {
        Commitment {
            id,
            system,
            message_manager,
            duplicate,
            communicator,
            stats,
            pending_complaints: Mutex::new(Vec::new()),
        }
    }

    /// Digests currently relayed to the primary and awaiting a bound
    /// slot. Consulted by the view-change timer.
    pub fn pending_complaints(&self) -> Vec<Digest> {
        self.pending_complaints.lock().clone()
    }

    fn quorum(&self) -> usize {
        self.system.current_view().params().quorum()
    }

    fn is_primary(&self) -> bool {
        self.system.is_primary(self.id)
    }

    /// `ProcessNewRequest`: a fresh client request arrives, already
    /// hashed by the caller to `digest`. The primary assigns it the
    /// next sequence number, binds a PRE_PREPARE to it, and broadcasts.
    /// A backup instead relays the request to the primary and arms a
    /// pending-complaint entry for the view-change timer.
    pub fn process_new_request(&self, header: Header, digest: Digest) -> Result<Outcome> {
        self.stats.inc_client_request();

        if !self.is_primary() {
            let primary = self.system.current_view().leader();
            self.pending_complaints.lock().push(digest);
            self.communicator.send(
                primary,
                SystemMessage::Forward(ForwardedRequest { digest, from: header.from() }),
            )?;
            debug!(?primary, "redirecting request to the primary");
            return Ok(Outcome::Redirected);
        }

        self.propose(digest, header.from())
    }

    /// `ProcessProposeMsg`'s counterpart on the primary: a backup
    /// relayed a request it received directly from a proxy. Proposes
    /// it exactly as `process_new_request` would, addressing any
    /// negative RESPONSE back to the original proxy in `msg.from`.
    pub fn process_forwarded_request(&self, msg: ForwardedRequest) -> Result<Outcome> {
        if !self.is_primary() {
            return Err("received a forwarded request but is not the current primary")
                .wrapped(ErrorKind::StaleView);
        }
        self.propose(msg.digest, msg.from)
    }

    /// Shared by `process_new_request` and `process_forwarded_request`:
    /// assigns the next sequence number, binds a PRE_PREPARE, and
    /// broadcasts it. `proxy` is who gets a negative RESPONSE if the
    /// sequence window is exhausted.
    fn propose(&self, digest: Digest, proxy: NodeId) -> Result<Outcome> {
        {
            let mut duplicate = self.duplicate.lock();
            if !duplicate.check_and_add_proposed(digest) {
                return Err("request was already proposed or executed")
                    .wrapped(ErrorKind::DuplicateProposal);
            }
        }

        let view = self.system.current_view();
        let seq = {
            let mut mm = self.message_manager.lock();
            let seq = match mm.assign_next_seq() {
                Some(seq) => seq,
                None => {
                    drop(mm);
                    self.duplicate.lock().erase_proposed(&digest);
                    warn!(?proxy, "sequence window exhausted, rejecting request");
                    self.communicator.send(
                        proxy,
                        SystemMessage::Response(ResponseMessage {
                            proxy_id: u64::from(u32::from(proxy)),
                            client_seq: 0,
                            result: Vec::new(),
                        }),
                    )?;
                    return Ok(Outcome::Backpressure);
                }
            };
            if !mm.add_pre_prepare(seq, view.view(), digest) {
                drop(mm);
                self.duplicate.lock().erase_proposed(&digest);
                return Err("sequence number already bound to a different digest")
                    .wrapped(ErrorKind::ConflictingRewrite);
            }
            seq
        };

        self.pending_complaints.lock().retain(|d| *d != digest);
        self.stats.inc_propose();
        debug!(seq = u32::from(seq), "proposing new request");

        let message = ConsensusMessage::new(
            seq,
            view.view(),
            ConsensusMessageKind::PrePrepare(Some(digest)),
        );
        self.communicator
            .broadcast(SystemMessage::Consensus(message), true)?;

        Ok(Outcome::Nothing)
    }

    /// `ProcessProposeMsg`: a non-primary receives a PRE_PREPARE.
    pub fn process_propose_msg(&self, header: Header, msg: ConsensusMessage) -> Result<Outcome> {
        let view = self.system.current_view();
        if msg.view() != view.view() {
            return Err("pre-prepare carries a stale view").wrapped(ErrorKind::StaleView);
        }
        if header.from() != view.leader() {
            return Err("pre-prepare not from the current primary")
                .wrapped(ErrorKind::MalformedMessage);
        }

        let digest = match msg.kind() {
            ConsensusMessageKind::PrePrepare(Some(d)) => *d,
            ConsensusMessageKind::PrePrepare(None) => {
                warn!("received a null pre-prepare outside of view change");
                return Ok(Outcome::Nothing);
            }
            _ => return Err("expected a pre-prepare message").wrapped(ErrorKind::MalformedMessage),
        };

        let seq = msg.sequence_number();
        let advanced = {
            let mut mm = self.message_manager.lock();
            if !mm.add_pre_prepare(seq, msg.view(), digest) {
                return Err("conflicting pre-prepare for this sequence number")
                    .wrapped(ErrorKind::ConflictingRewrite);
            }
            mm.may_advance(seq, self.quorum())
        };

        self.pending_complaints.lock().retain(|d| *d != digest);

        // Binding the pre-prepare always triggers this replica's own
        // PREPARE vote.
        let message = ConsensusMessage::new(seq, msg.view(), ConsensusMessageKind::Prepare(digest));
        self.communicator
            .broadcast(SystemMessage::Consensus(message), true)?;

        // Prepares can arrive before their pre-prepare; if enough were
        // already buffered to clear the quorum on their own, binding
        // the pre-prepare just now takes the slot straight past
        // ReadyPrepare into ReadyCommit, and COMMIT must go out too.
        if advanced == Some(CollectorStatus::ReadyCommit) {
            let message = ConsensusMessage::new(seq, msg.view(), ConsensusMessageKind::Commit(digest));
            self.communicator
                .broadcast(SystemMessage::Consensus(message), true)?;
        }

        Ok(Outcome::Nothing)
    }

    /// `ProcessPrepareMsg`: record a PREPARE vote, and once `Q` of
    /// them match, broadcast a COMMIT.
    pub fn process_prepare_msg(&self, header: Header, msg: ConsensusMessage) -> Result<Outcome> {
        let digest = match msg.kind() {
            ConsensusMessageKind::Prepare(d) => *d,
            _ => return Err("expected a prepare message").wrapped(ErrorKind::MalformedMessage),
        };

        let seq = msg.sequence_number();
        let advanced = {
            let mut mm = self.message_manager.lock();
            mm.add_prepare(seq, header.from(), digest);
            mm.may_advance(seq, self.quorum())
        };

        if advanced == Some(CollectorStatus::ReadyCommit) {
            let message = ConsensusMessage::new(seq, msg.view(), ConsensusMessageKind::Commit(digest));
            self.communicator
                .broadcast(SystemMessage::Consensus(message), true)?;
        }

        Ok(Outcome::Nothing)
    }

    /// `ProcessCommitMsg`: record a COMMIT vote; once `Q` match, the
    /// collector is ready for execution.
    pub fn process_commit_msg(&self, header: Header, msg: ConsensusMessage) -> Result<Outcome> {
        let digest = match msg.kind() {
            ConsensusMessageKind::Commit(d) => *d,
            _ => return Err("expected a commit message").wrapped(ErrorKind::MalformedMessage),
        };

        let seq = msg.sequence_number();
        let advanced = {
            let mut mm = self.message_manager.lock();
            mm.add_commit(seq, header.from(), digest);
            mm.may_advance(seq, self.quorum())
        };

        match advanced {
            Some(CollectorStatus::ReadyExecute) => Ok(Outcome::ReadyToExecute(seq)),
            _ => Ok(Outcome::Nothing),
        }
    }

    /// Notes this slot as executed, for recycling by `MessageManager`
    /// and by the duplicate digest state machine.
    pub fn mark_executed(&self, seq: SeqNo, digest: Digest) {
        self.message_manager.lock().mark_executed(seq);
        self.duplicate.lock().mark_executed(digest);
        self.stats.inc_execute();
    }
}
