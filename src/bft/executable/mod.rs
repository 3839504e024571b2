//! User application execution business logic.
//!
//! A [`Service`] implements deterministic application semantics; an
//! [`Executor`] runs it on a dedicated thread, away from whichever
//! component feeds it batches, so that a slow or CPU-heavy `update`
//! never blocks message processing.

use std::sync::mpsc;
use std::thread;

use crate::bft::communication::NodeId;
use crate::bft::crypto::hash::Digest;
use crate::bft::ordering::SeqNo;
use crate::bft::error::*;

/// Represents a single client update request, to be executed.
#[derive(Clone)]
pub struct Update<O> {
    from: NodeId,
    digest: Digest,
    operation: O,
}

/// Represents a single client update reply.
#[derive(Clone)]
pub struct UpdateReply<P> {
    to: NodeId,
    digest: Digest,
    payload: P,
}

/// Storage for a batch of client update requests to be executed, in
/// the deterministic order decided by consensus for sequence `seq`.
#[derive(Clone)]
pub struct UpdateBatch<O> {
    seq: SeqNo,
    inner: Vec<Update<O>>,
}

/// Storage for a batch of client update replies.
#[derive(Clone)]
pub struct UpdateBatchReplies<P> {
    seq: SeqNo,
    inner: Vec<UpdateReply<P>>,
}

enum ExecutionRequest<S, O> {
    /// Install state from the recovery protocol, then replay `after`.
    InstallState(S, Vec<O>),
    /// Execute a batch, applied deterministically in order.
    Update(UpdateBatch<O>),
    /// Same as above, additionally snapshotting the application state
    /// once the batch lands on a checkpoint boundary.
    UpdateAndGetAppstate(UpdateBatch<O>),
}

/// A user defined application.
///
/// Application logic is implemented by this trait; it never sees
/// concurrency, ordering, or retries, those are handled by
/// `execution`'s concurrency-control layer before a batch reaches
/// `update`.
pub trait Service: Send {
    type State: Send + Clone;
    type Request: Send;
    type Reply: Send;

    /// Returns the initial state of the application.
    fn initial_state(&mut self) -> Result<Self::State>;

    /// Process a user request, producing a matching reply, meanwhile
    /// updating the application state.
    fn update(&mut self, state: &mut Self::State, request: Self::Request) -> Self::Reply;
}

pub enum ExecutorOutcome<S: Service> {
    Replies(UpdateBatchReplies<S::Reply>),
    RepliesWithAppstate(UpdateBatchReplies<S::Reply>, S::State),
}

/// Stateful data of the task responsible for executing client requests.
pub struct Executor<S: Service> {
    service: S,
    state: S::State,
    e_rx: mpsc::Receiver<ExecutionRequest<S::State, S::Request>>,
    on_outcome: Box<dyn Fn(ExecutorOutcome<S>) + Send>,
}

/// A handle to the client request executor.
pub struct ExecutorHandle<S: Service> {
    e_tx: mpsc::Sender<ExecutionRequest<S::State, S::Request>>,
}

impl<S: Service> ExecutorHandle<S>
where
    S: Service + Send + 'static,
    S::Request: Send + 'static,
    S::Reply: Send + 'static,
{
    /// Sets the current state of the execution layer to the given value.
    pub fn install_state(&mut self, state: S::State, after: Vec<S::Request>) -> Result<()> {
        self.e_tx
            .send(ExecutionRequest::InstallState(state, after))
            .simple(ErrorKind::Executable)
    }

    /// Queues a batch of requests `batch` for execution.
    pub fn queue_update(&mut self, batch: UpdateBatch<S::Request>) -> Result<()> {
        self.e_tx
            .send(ExecutionRequest::Update(batch))
            .simple(ErrorKind::Executable)
    }

    /// Same as `queue_update()`, additionally reporting the serialized
    /// application state. Useful when a batch closes a checkpoint period.
    pub fn queue_update_and_get_appstate(&mut self, batch: UpdateBatch<S::Request>) -> Result<()> {
        self.e_tx
            .send(ExecutionRequest::UpdateAndGetAppstate(batch))
            .simple(ErrorKind::Executable)
    }
}

impl<S: Service> Clone for ExecutorHandle<S> {
    fn clone(&self) -> Self {
        Self { e_tx: self.e_tx.clone() }
    }
}

impl<S> Executor<S>
where
    S: Service + Send + 'static,
    S::State: Send + Clone + 'static,
    S::Request: Send + 'static,
    S::Reply: Send + 'static,
{
    /// Spawns a new service executor onto a dedicated OS thread.
    ///
    /// `on_outcome` is invoked from that thread every time a batch
    /// finishes executing; it should hand the replies off quickly
    /// (e.g. push onto a channel) and not itself run application logic.
    pub fn new<F>(mut service: S, on_outcome: F) -> Result<ExecutorHandle<S>>
    where
        F: Fn(ExecutorOutcome<S>) + Send + 'static,
    {
        let (e_tx, e_rx) = mpsc::channel();

        let state = service.initial_state()?;
        let mut exec = Executor {
            e_rx,
            service,
            state,
            on_outcome: Box::new(on_outcome),
        };

        thread::spawn(move || {
            while let Ok(exec_req) = exec.e_rx.recv() {
                match exec_req {
                    ExecutionRequest::InstallState(checkpoint, after) => {
                        exec.state = checkpoint;
                        for req in after {
                            exec.service.update(&mut exec.state, req);
                        }
                    }
                    ExecutionRequest::Update(batch) => {
                        let seq = batch.seq;
                        let mut reply_batch = UpdateBatchReplies::with_capacity(seq, batch.len());
                        for update in batch.into_inner() {
                            let (peer_id, dig, req) = update.into_inner();
                            let reply = exec.service.update(&mut exec.state, req);
                            reply_batch.add(peer_id, dig, reply);
                        }
                        (exec.on_outcome)(ExecutorOutcome::Replies(reply_batch));
                    }
                    ExecutionRequest::UpdateAndGetAppstate(batch) => {
                        let seq = batch.seq;
                        let mut reply_batch = UpdateBatchReplies::with_capacity(seq, batch.len());
                        for update in batch.into_inner() {
                            let (peer_id, dig, req) = update.into_inner();
                            let reply = exec.service.update(&mut exec.state, req);
                            reply_batch.add(peer_id, dig, reply);
                        }
                        let snapshot = exec.state.clone();
                        (exec.on_outcome)(ExecutorOutcome::RepliesWithAppstate(reply_batch, snapshot));
                    }
                }
            }
        });

        Ok(ExecutorHandle { e_tx })
    }
}

impl<O> UpdateBatch<O> {
    /// Returns a new, empty batch of requests for sequence `seq`.
    pub fn new(seq: SeqNo) -> Self {
        Self { seq, inner: Vec::new() }
    }

    pub fn seq(&self) -> SeqNo {
        self.seq
    }

    /// Adds a new update request to the batch.
    pub fn add(&mut self, from: NodeId, digest: Digest, operation: O) {
        self.inner.push(Update { from, digest, operation });
    }

    pub fn into_inner(self) -> Vec<Update<O>> {
        self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<O> AsRef<[Update<O>]> for UpdateBatch<O> {
    fn as_ref(&self) -> &[Update<O>] {
        &self.inner[..]
    }
}

impl<O> Update<O> {
    pub fn into_inner(self) -> (NodeId, Digest, O) {
        (self.from, self.digest, self.operation)
    }

    pub fn operation(&self) -> &O {
        &self.operation
    }
}

impl<P> UpdateBatchReplies<P> {
    pub fn with_capacity(seq: SeqNo, n: usize) -> Self {
        Self { seq, inner: Vec::with_capacity(n) }
    }

    pub fn seq(&self) -> SeqNo {
        self.seq
    }

    pub fn add(&mut self, to: NodeId, digest: Digest, payload: P) {
        self.inner.push(UpdateReply { to, digest, payload });
    }

    pub fn into_inner(self) -> Vec<UpdateReply<P>> {
        self.inner
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl<P> UpdateReply<P> {
    pub fn into_inner(self) -> (NodeId, Digest, P) {
        (self.to, self.digest, self.payload)
    }
}
