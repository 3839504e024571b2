//! Parallel deterministic execution with pluggable concurrency
//! control.
//!
//! Grounded on the `tusk`/`x_manager` executor family
//! (`streaming_e_committer.cpp`, `v_controller.cpp`, `x_verifier.cpp`):
//! transactions read and write byte-addressed keys through a
//! [`VersionedStore`], and a [`ContractCommitter`] decides, per
//! concurrency-control strategy, whether a transaction's recorded
//! reads are still valid by the time it wants to commit.

pub mod dag;
pub mod occ;
pub mod sequential;
pub mod store;
pub mod two_pl;
pub mod verifier;

use crate::bft::error::*;

pub use store::{InMemoryStore, VersionedStore};

/// A single read or write performed by a transaction against one key.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Recorded the store's version for `key` at the time of the read.
    Load { key: Vec<u8>, version: u64 },
    Store { key: Vec<u8>, data: Vec<u8> },
    Remove { key: Vec<u8> },
}

/// The ordered list of operations a transaction performed against one
/// key, in program order -- mirrors the original's
/// `ModifyMap = HashMap<Address, Vec<Op>>`.
pub type ChangeSet = crate::bft::collections::HashMap<Vec<u8>, Vec<Operation>>;

/// Caps per-transaction OCC retries (REDESIGN FLAG, see DESIGN.md Open
/// Questions #3): the original's `redo_` vector grows without bound on
/// repeated conflicts.
pub const MAX_OCC_RETRIES: u32 = 8;

/// Implemented by every concurrency-control strategy
/// (`Sequential`/`TwoPl`/`Occ`/`Dag`). `commit_id` indexes a
/// transaction's slot within the current execution window.
pub trait ContractCommitter: Send {
    /// Stages a transaction's recorded read/write set for `commit_id`.
    fn push_commit(&mut self, commit_id: u64, changes: ChangeSet);

    /// Checks whether `commit_id`'s recorded reads are still valid
    /// against the current store state (no other committed write
    /// touched a key it read, at a version later than the one it saw).
    fn check_commit(&self, commit_id: u64) -> bool;

    /// Applies `commit_id`'s writes to the store if `check_commit`
    /// passes. Returns `false` on conflict, leaving the store
    /// untouched; the caller is responsible for re-executing the
    /// transaction and resubmitting, up to `MAX_OCC_RETRIES` times.
    fn commit(&mut self, commit_id: u64) -> Result<bool>;
}
