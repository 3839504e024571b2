//! End-to-end scenarios wiring the protocol components together the
//! way a replica's dispatch loop would, without any actual network or
//! threading: messages are routed synchronously through per-replica
//! inboxes and drained until quiescent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use covenant::crypto::hash::{Context as HashContext, Digest};
use covenant::crypto::signature::Signature;
use covenant::message::{
    ConsensusMessageKind, StableCheckpointProof, SystemMessage, WireMessage,
};
use covenant::{
    ChangeSet, Commitment, CommitmentOutcome, DuplicateManager, ExecutionOp, MessageManager,
    NodeId, ReplicaCommunicator, ReplicaConfig, Result, Stats, SystemInfo, SystemParams, ViewInfo,
    ViewParams, VersionedStore, ViewChangeManager, ViewChangeOutcome,
};

fn digest(bytes: &[u8]) -> Digest {
    let mut ctx = HashContext::new();
    ctx.update(bytes);
    ctx.finish()
}

fn zero_signature() -> Signature {
    Signature::from_bytes(&[0u8; 64]).unwrap()
}

fn header(from: NodeId, to: NodeId) -> covenant::message::Header {
    let (header, _) = WireMessage::new(from, to, b"", zero_signature()).into_inner();
    header
}

/// Routes `SystemMessage`s between replicas via per-node FIFO inboxes.
struct TestNet {
    ids: Vec<NodeId>,
    inboxes: Mutex<HashMap<NodeId, VecDeque<(NodeId, SystemMessage)>>>,
}

impl TestNet {
    fn new(ids: Vec<NodeId>) -> Arc<Self> {
        let inboxes = ids.iter().map(|&id| (id, VecDeque::new())).collect();
        Arc::new(TestNet { ids, inboxes: Mutex::new(inboxes) })
    }

    fn handle(self: &Arc<Self>, from: NodeId) -> TestCommunicator {
        TestCommunicator { from, net: self.clone() }
    }

    fn pop(&self, node: NodeId) -> Option<(NodeId, SystemMessage)> {
        self.inboxes.lock().get_mut(&node).and_then(|q| q.pop_front())
    }
}

struct TestCommunicator {
    from: NodeId,
    net: Arc<TestNet>,
}

impl ReplicaCommunicator for TestCommunicator {
    fn send(&self, target: NodeId, message: SystemMessage) -> Result<()> {
        self.net.inboxes.lock().get_mut(&target).unwrap().push_back((self.from, message));
        Ok(())
    }

    fn broadcast(&self, message: SystemMessage, include_self: bool) -> Result<()> {
        for &id in &self.net.ids {
            if id == self.from && !include_self {
                continue;
            }
            self.send(id, message.clone())?;
        }
        Ok(())
    }
}

struct Replica {
    id: NodeId,
    commitment: Commitment,
    system: Arc<SystemInfo>,
    view_params: ViewParams,
    vcm: Mutex<ViewChangeManager>,
    communicator: Arc<TestCommunicator>,
}

fn build_replicas(n: usize, f: usize) -> (Arc<TestNet>, Vec<Replica>) {
    build_replicas_with_window(n, f, 1000)
}

fn build_replicas_with_window(n: usize, f: usize, window: u32) -> (Arc<TestNet>, Vec<Replica>) {
    let params = SystemParams::new(n, f).unwrap();
    let ids: Vec<NodeId> = NodeId::targets(0..n as u32).collect();
    let net = TestNet::new(ids.clone());

    let replicas = ids
        .iter()
        .map(|&id| {
            let view_params = ViewParams::new(params.clone(), ids.clone());
            let system = Arc::new(SystemInfo::new(ViewInfo::new(0, view_params.clone())));
            let config = ReplicaConfig::new(id, params.clone()).with_watermark_window(window);
            let message_manager = Arc::new(Mutex::new(MessageManager::new(&config)));
            let duplicate = Arc::new(Mutex::new(DuplicateManager::new(1024)));
            let stats = Arc::new(Stats::new());
            let communicator = Arc::new(net.handle(id));
            Replica {
                id,
                commitment: Commitment::new(
                    id,
                    system.clone(),
                    message_manager,
                    duplicate,
                    communicator.clone(),
                    stats,
                ),
                system,
                view_params,
                vcm: Mutex::new(ViewChangeManager::new(&config)),
                communicator,
            }
        })
        .collect();

    (net, replicas)
}

fn empty_checkpoint_proof() -> StableCheckpointProof {
    StableCheckpointProof { seq: covenant::SeqNo::ZERO, hash: digest(b"genesis"), signatures: vec![] }
}

/// Drains every inbox, dispatching each message to the matching
/// replica's `Commitment`, until all queues are empty. Returns every
/// `ReadyToExecute` outcome observed, in delivery order.
fn pump(net: &Arc<TestNet>, replicas: &[Replica]) -> Vec<(NodeId, covenant::SeqNo)> {
    let mut ready = Vec::new();
    loop {
        let mut delivered_any = false;
        for replica in replicas {
            while let Some((from, message)) = net.pop(replica.id) {
                delivered_any = true;
                let hdr = header(from, replica.id);
                let outcome = match &message {
                    SystemMessage::Consensus(msg) => match msg.kind() {
                        ConsensusMessageKind::PrePrepare(_) => {
                            replica.commitment.process_propose_msg(hdr, msg.clone())
                        }
                        ConsensusMessageKind::Prepare(_) => {
                            replica.commitment.process_prepare_msg(hdr, msg.clone())
                        }
                        ConsensusMessageKind::Commit(_) => {
                            replica.commitment.process_commit_msg(hdr, msg.clone())
                        }
                    },
                    SystemMessage::Forward(fr) => {
                        replica.commitment.process_forwarded_request(fr.clone())
                    }
                    _ => Ok(CommitmentOutcome::Nothing),
                }
                .expect("message processing should not fail in this harness");

                if let CommitmentOutcome::ReadyToExecute(seq) = outcome {
                    ready.push((replica.id, seq));
                }
            }
        }
        if !delivered_any {
            break;
        }
    }
    ready
}

#[test]
fn scenario_a_happy_path_commits_across_all_replicas() {
    let (net, replicas) = build_replicas(4, 1);
    let primary = &replicas[0];

    let req_digest = digest(b"client request #1");
    let hdr = header(primary.id, primary.id);
    let outcome = primary.commitment.process_new_request(hdr, req_digest).unwrap();
    assert!(matches!(outcome, CommitmentOutcome::Nothing));

    let ready = pump(&net, &replicas);

    // Every replica (including the primary, which also votes) should
    // reach ReadyToExecute for sequence number zero exactly once.
    assert_eq!(ready.len(), 4);
    for (_, seq) in &ready {
        assert_eq!(u32::from(*seq), 0);
    }
}

#[test]
fn scenario_backup_forwards_request_and_clears_complaint_on_bind() {
    let (net, replicas) = build_replicas(4, 1);
    let backup = &replicas[1];
    let client = NodeId::from(99);

    let req_digest = digest(b"redirected request");
    let hdr = header(client, backup.id);
    let outcome = backup.commitment.process_new_request(hdr, req_digest).unwrap();
    assert!(matches!(outcome, CommitmentOutcome::Redirected));
    assert_eq!(backup.commitment.pending_complaints(), vec![req_digest]);

    let ready = pump(&net, &replicas);

    assert_eq!(ready.len(), 4);
    for (_, seq) in &ready {
        assert_eq!(u32::from(*seq), 0);
    }
    assert!(backup.commitment.pending_complaints().is_empty());
}

#[test]
fn scenario_sequence_window_exhaustion_yields_backpressure() {
    let (net, replicas) = build_replicas_with_window(4, 1, 2);
    let primary = &replicas[0];
    let proxy = replicas[3].id;

    for i in 0..2u8 {
        let d = digest(&[i]);
        let hdr = header(proxy, primary.id);
        let outcome = primary.commitment.process_new_request(hdr, d).unwrap();
        assert!(matches!(outcome, CommitmentOutcome::Nothing));
    }

    let overflow_digest = digest(b"one too many");
    let hdr = header(proxy, primary.id);
    let outcome = primary.commitment.process_new_request(hdr, overflow_digest).unwrap();
    assert!(matches!(outcome, CommitmentOutcome::Backpressure));

    let (from, msg) = net.pop(proxy).expect("negative response sent to proxy");
    assert_eq!(from, primary.id);
    assert!(matches!(msg, SystemMessage::Response(_)));
}

#[test]
fn scenario_prepares_buffered_before_pre_prepare_trigger_commit_fast_path() {
    let (net, replicas) = build_replicas(4, 1);
    let observer = &replicas[3];
    let req_digest = digest(b"fast path request");
    let seq = covenant::SeqNo::ZERO;
    let view = 0u64;

    // Three PREPARE votes (a full quorum for n=4, f=1) arrive before
    // this slot has ever seen a matching PRE_PREPARE.
    for &voter in &[replicas[0].id, replicas[1].id, replicas[2].id] {
        let msg = covenant::message::ConsensusMessage::new(
            seq,
            view,
            ConsensusMessageKind::Prepare(req_digest),
        );
        let hdr = header(voter, observer.id);
        let outcome = observer.commitment.process_prepare_msg(hdr, msg).unwrap();
        assert!(matches!(outcome, CommitmentOutcome::Nothing));
    }

    // The pre-prepare arrives last. Binding it must take the slot
    // straight from None to ReadyCommit, broadcasting a COMMIT
    // alongside the usual PREPARE, without waiting on any further vote.
    let pre_prepare = covenant::message::ConsensusMessage::new(
        seq,
        view,
        ConsensusMessageKind::PrePrepare(Some(req_digest)),
    );
    let hdr = header(replicas[0].id, observer.id);
    let outcome = observer.commitment.process_propose_msg(hdr, pre_prepare).unwrap();
    assert!(matches!(outcome, CommitmentOutcome::Nothing));

    let mut saw_prepare = false;
    let mut saw_commit = false;
    while let Some((from, msg)) = net.pop(replicas[0].id) {
        if from != observer.id {
            continue;
        }
        if let SystemMessage::Consensus(m) = msg {
            match m.kind() {
                ConsensusMessageKind::Prepare(d) if *d == req_digest => saw_prepare = true,
                ConsensusMessageKind::Commit(d) if *d == req_digest => saw_commit = true,
                _ => {}
            }
        }
    }
    assert!(saw_prepare, "observer should still cast its own prepare vote");
    assert!(saw_commit, "observer should commit immediately once the quorum was already met");
}

#[test]
fn scenario_b_silent_primary_triggers_view_change() {
    let (net, replicas) = build_replicas(4, 1);
    let old_primary = replicas[0].id;
    assert_eq!(replicas[0].system.current_view().leader(), old_primary);

    // Replicas 1..3 notice the primary's silence, back off once, and
    // settle on view 2, whose leader is replica 1.
    for replica in &replicas[1..] {
        let mut vcm = replica.vcm.lock();
        vcm.begin_view_change(0, empty_checkpoint_proof(), vec![]).unwrap();
        let msg = vcm.retry_view_change(empty_checkpoint_proof(), vec![]).unwrap();
        drop(vcm);
        replica
            .communicator
            .broadcast(SystemMessage::ViewChange(msg), true)
            .unwrap();
    }

    // Drain VIEW_CHANGE votes; replica 1 is view 2's leader and should
    // gather a quorum (3 of 4 voted, quorum is 3) and assemble NEW_VIEW.
    let mut new_view = None;
    loop {
        let mut delivered_any = false;
        for replica in &replicas {
            while let Some((from, message)) = net.pop(replica.id) {
                delivered_any = true;
                if let SystemMessage::ViewChange(msg) = message {
                    let outcome =
                        replica.vcm.lock().process_view_change(from, msg, &replica.view_params);
                    if let ViewChangeOutcome::BecomePrimary(nv) = outcome {
                        new_view = Some((replica.id, nv));
                    }
                }
            }
        }
        if !delivered_any {
            break;
        }
    }

    let (new_primary, new_view_msg) =
        new_view.expect("quorum of view-change votes should elect a new primary");
    assert_eq!(new_primary, NodeId::from(1));
    assert_eq!(new_view_msg.view, 2);

    replicas
        .iter()
        .find(|r| r.id == new_primary)
        .unwrap()
        .communicator
        .broadcast(SystemMessage::NewView(new_view_msg), true)
        .unwrap();

    // Every replica, including the elected one and the old, silent
    // primary, installs the new view once it observes NEW_VIEW.
    loop {
        let mut delivered_any = false;
        for replica in &replicas {
            while let Some((_, message)) = net.pop(replica.id) {
                delivered_any = true;
                if let SystemMessage::NewView(msg) = message {
                    assert!(replica.vcm.lock().validate_new_view(&msg));
                    replica.vcm.lock().install_new_view(msg.view);
                    replica
                        .system
                        .install_view(ViewInfo::new(msg.view, replica.view_params.clone()));
                }
            }
        }
        if !delivered_any {
            break;
        }
    }

    for replica in &replicas {
        assert_eq!(replica.system.current_view().leader(), new_primary);
    }

    // The new primary drives a fresh request through the three-phase
    // commitment under the installed view, same as the happy path.
    let new_primary_replica = replicas.iter().find(|r| r.id == new_primary).unwrap();
    let req_digest = digest(b"request after view change");
    let hdr = header(new_primary_replica.id, new_primary_replica.id);
    new_primary_replica
        .commitment
        .process_new_request(hdr, req_digest)
        .unwrap();

    let ready = pump(&net, &replicas);
    assert_eq!(ready.len(), 4);
    for (_, seq) in &ready {
        assert_eq!(u32::from(*seq), 0);
    }
}

#[test]
fn scenario_f_duplicate_request_is_rejected_by_primary() {
    let (_, replicas) = build_replicas(4, 1);
    let primary = &replicas[0];
    let d = digest(b"replayed request");

    let hdr = header(primary.id, primary.id);
    assert!(primary.commitment.process_new_request(hdr, d).is_ok());

    let hdr2 = header(primary.id, primary.id);
    let err = primary.commitment.process_new_request(hdr2, d).unwrap_err();
    assert_eq!(err.kind(), covenant::ErrorKind::DuplicateProposal);
}

#[test]
fn scenario_e_occ_batch_retries_until_conflict_resolves() {
    use covenant::execution::occ::Occ;
    use covenant::ContractCommitter;

    let store = Arc::new(covenant::InMemoryStore::new());
    let mut occ = Occ::new(store.clone());

    let mut changes: ChangeSet = HashMap::default();
    changes.insert(
        b"balance".to_vec(),
        vec![
            ExecutionOp::Load { key: b"balance".to_vec(), version: 0 },
            ExecutionOp::Store { key: b"balance".to_vec(), data: b"100".to_vec() },
        ],
    );
    occ.push_commit(1, changes);

    // A concurrent write lands first, bumping the version out from
    // under the staged transaction's recorded read.
    store.store(b"balance".to_vec(), b"50".to_vec());
    assert!(!occ.check_commit(1));
    assert_eq!(occ.commit(1).unwrap(), false);

    // Re-staging with the now-current version lets it land.
    let mut retried: ChangeSet = HashMap::default();
    retried.insert(
        b"balance".to_vec(),
        vec![
            ExecutionOp::Load { key: b"balance".to_vec(), version: 1 },
            ExecutionOp::Store { key: b"balance".to_vec(), data: b"150".to_vec() },
        ],
    );
    occ.push_commit(1, retried);
    assert!(occ.commit(1).unwrap());
    assert_eq!(store.load(b"balance"), Some(b"150".to_vec()));
}

#[test]
fn scenario_c_checkpoint_stabilizes_and_advances_watermark() {
    use covenant::crypto::signature::KeyPair;
    use covenant::crypto::SignatureService;
    use covenant::{CheckpointManager, CheckpointOutcome};

    struct LocalSigner(Vec<KeyPair>);
    impl SignatureService for LocalSigner {
        fn hash(&self, data: &[u8]) -> Digest {
            digest(data)
        }
        fn sign(&self, data: &[u8]) -> Signature {
            self.0[0].sign(data)
        }
        fn verify(&self, node: NodeId, data: &[u8], signature: &Signature) -> Result<()> {
            self.0[usize::from(node)].public_key().verify(data, signature)
        }
    }

    let keys: Vec<KeyPair> = (0..4)
        .map(|_| KeyPair::from_bytes(&KeyPair::generate_pkcs8().unwrap()).unwrap())
        .collect();
    let signer = Arc::new(LocalSigner(keys));
    let params = SystemParams::new(4, 1).unwrap();
    let config = ReplicaConfig::new(NodeId::from(0), params);
    let mut ckpt = CheckpointManager::new(&config, signer.clone());

    let mut last = None;
    for seq in 1..=config.checkpoint_period() {
        last = ckpt.add_commit_data(covenant::SeqNo::from(seq), digest(&seq.to_be_bytes()));
    }
    let msg = last.expect("checkpoint period boundary should emit a message");

    let mut stable = None;
    for i in 0..3u32 {
        let sig = signer.sign(msg.hash.as_ref());
        let outcome = ckpt.process_checkpoint(NodeId::from(i), sig, msg.clone());
        if let CheckpointOutcome::Stable(proof) = outcome {
            stable = Some(proof);
        }
    }

    let proof = stable.expect("quorum of matching votes should stabilize the checkpoint");
    assert!(ckpt.is_valid_checkpoint_proof(&proof));
    assert_eq!(ckpt.current_stable_seq(), msg.seq);

    let mut mm = MessageManager::new(&config);
    mm.add_pre_prepare(covenant::SeqNo::from(1u32), 0, digest(b"stale slot"));
    mm.advance_watermark(ckpt.current_stable_seq());
    assert!(mm.collector(covenant::SeqNo::from(1u32)).is_none());
}
