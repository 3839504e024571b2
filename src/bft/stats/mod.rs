//! Passive counters tracking replica activity.
//!
//! Grounded on resdb's `Stats` (reached globally in the original via
//! `Stats::GetGlobalStats()` from `commitment.cpp`'s
//! `IncClientRequest`/`IncPropose`/`SeqFail` call sites). Here there is
//! no global singleton: a `Stats` is created once per replica and
//! shared by reference with the components that report into it.

use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed atomic counters; exact interleaving across threads is not
/// load-bearing, only the approximate totals used for observability.
#[derive(Default)]
pub struct Stats {
    client_request: AtomicU64,
    propose: AtomicU64,
    seq_fail: AtomicU64,
    execute: AtomicU64,
    view_change: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_client_request(&self) {
        self.client_request.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_propose(&self) {
        self.propose.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_seq_fail(&self) {
        self.seq_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_execute(&self) {
        self.execute.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_view_change(&self) {
        self.view_change.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_request_count(&self) -> u64 {
        self.client_request.load(Ordering::Relaxed)
    }

    pub fn propose_count(&self) -> u64 {
        self.propose.load(Ordering::Relaxed)
    }

    pub fn seq_fail_count(&self) -> u64 {
        self.seq_fail.load(Ordering::Relaxed)
    }

    pub fn execute_count(&self) -> u64 {
        self.execute.load(Ordering::Relaxed)
    }

    pub fn view_change_count(&self) -> u64 {
        self.view_change.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let stats = Stats::new();
        assert_eq!(stats.propose_count(), 0);
        stats.inc_propose();
        stats.inc_propose();
        assert_eq!(stats.propose_count(), 2);
    }
}
