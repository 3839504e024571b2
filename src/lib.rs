//! `covenant` is a permissioned BFT replication core: given a fixed,
//! known set of `N = 3f + 1` replicas, it orders client requests into
//! a single sequence of batches, agreeing on that order despite up to
//! `f` Byzantine replicas, and executes the resulting batches against
//! pluggable concurrency-controlled state machines.
//!
//! The bulk of the implementation lives under [`bft`], which by
//! default is a private module: embedders depend on the surface
//! re-exported here. Enable the `expose_impl` feature to make `bft`
//! public, e.g. to write integration tests against its internals.

#[cfg(feature = "expose_impl")]
pub mod bft;

#[cfg(not(feature = "expose_impl"))]
mod bft;

pub use bft::checkpoint::{CheckpointManager, Outcome as CheckpointOutcome};
pub use bft::commitment::{Commitment, Outcome as CommitmentOutcome};
pub use bft::communication::message;
pub use bft::communication::{Context, NodeId, ReplicaCommunicator};
pub use bft::config::{ReplicaConfig, SystemParams};
pub use bft::core::{SystemInfo, ViewInfo, ViewParams};
pub use bft::crypto;
pub use bft::duplicate::{DuplicateManager, DuplicateStatus};
pub use bft::error::{Error, ErrorKind, Result};
pub use bft::executable::{Executor, ExecutorHandle, Service, Update, UpdateBatch};
pub use bft::execution;
pub use bft::execution::{
    ChangeSet, ContractCommitter, InMemoryStore, Operation as ExecutionOp, VersionedStore,
};
pub use bft::log::Log;
pub use bft::message_manager::MessageManager;
pub use bft::ordering::SeqNo;
pub use bft::recovery::{RecoveryCollector, RecoveryState};
pub use bft::stats::Stats;
pub use bft::view_change::{Outcome as ViewChangeOutcome, ViewChangeManager};
