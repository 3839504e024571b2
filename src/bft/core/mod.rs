//! Shared view/membership bookkeeping.
//!
//! Grounded on the `SystemInfo` references threaded through
//! `message_manager.h`/`viewchange_manager.h` in the original: a
//! small piece of state, read far more often than written, naming the
//! current view, its primary, and the replica list.

use crate::bft::communication::NodeId;
use crate::bft::config::SystemParams;

/// Parameters plus the replica list needed to resolve a primary.
#[derive(Clone)]
pub struct ViewParams {
    params: SystemParams,
    replicas: Vec<NodeId>,
}

impl ViewParams {
    pub fn new(params: SystemParams, replicas: Vec<NodeId>) -> Self {
        ViewParams { params, replicas }
    }

    pub fn n(&self) -> usize {
        self.params.n()
    }

    pub fn f(&self) -> usize {
        self.params.f()
    }

    pub fn quorum(&self) -> usize {
        self.params.quorum()
    }

    pub fn replicas(&self) -> &[NodeId] {
        &self.replicas
    }
}

/// The replica group's current view: its number and the resulting
/// primary, computed as `replicas[(view - 1) % n]` once `view > 0`
/// (view 0 uses `replicas[0]`, matching `SetCurrentViewAndNewPrimary`).
#[derive(Clone)]
pub struct ViewInfo {
    view: u64,
    params: ViewParams,
}

impl ViewInfo {
    pub fn new(view: u64, params: ViewParams) -> Self {
        ViewInfo { view, params }
    }

    pub fn view(&self) -> u64 {
        self.view
    }

    pub fn params(&self) -> &ViewParams {
        &self.params
    }

    pub fn leader(&self) -> NodeId {
        if self.view == 0 {
            self.params.replicas()[0]
        } else {
            let n = self.params.n() as u64;
            self.params.replicas()[((self.view - 1) % n) as usize]
        }
    }

    pub fn next_view(&self) -> ViewInfo {
        ViewInfo { view: self.view + 1, params: self.params.clone() }
    }
}

/// Shared, rarely-mutated view/membership state. Holders take the
/// lock only for the instant it takes to clone a `ViewInfo`.
pub struct SystemInfo {
    view: parking_lot::RwLock<ViewInfo>,
}

impl SystemInfo {
    pub fn new(initial: ViewInfo) -> Self {
        SystemInfo { view: parking_lot::RwLock::new(initial) }
    }

    pub fn current_view(&self) -> ViewInfo {
        self.view.read().clone()
    }

    pub fn install_view(&self, view: ViewInfo) {
        *self.view.write() = view;
    }

    pub fn is_primary(&self, id: NodeId) -> bool {
        self.current_view().leader() == id
    }
}
