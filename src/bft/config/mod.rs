//! Replica group configuration.
//!
//! Mirrors the shape of the teacher's `NodeConfig` (referenced, but
//! not defined, by `communication::Node`), extended with the
//! system-wide parameters the original C++ keeps on `ResDBConfig`:
//! fault tolerance `f`, watermark window width, checkpoint period and
//! the worker pool size used by `execution`.

use std::time::Duration;

use crate::bft::communication::NodeId;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

/// Parameters shared by every component of a replica group, derived
/// once at startup and handed out by reference.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct SystemParams {
    n: usize,
    f: usize,
}

impl SystemParams {
    /// Builds a new set of system parameters, checking the assumption
    /// that `n >= 3f + 1`.
    pub fn new(n: usize, f: usize) -> Option<Self> {
        if n < 3 * f + 1 {
            None
        } else {
            Some(SystemParams { n, f })
        }
    }

    /// Total number of replicas, `n`.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Maximum number of tolerated faulty replicas, `f`.
    pub fn f(&self) -> usize {
        self.f
    }

    /// Quorum size, `q = 2f + 1`.
    pub fn quorum(&self) -> usize {
        2 * self.f + 1
    }
}

/// Per-replica configuration: identity plus the tunables governing
/// watermarks, checkpoints and timeouts.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ReplicaConfig {
    id: NodeId,
    params: SystemParams,
    watermark_window: u32,
    checkpoint_period: u32,
    max_process_txn: usize,
    #[cfg_attr(feature = "serialize_serde", serde(with = "duration_millis"))]
    view_change_base_timeout: Duration,
    #[cfg_attr(feature = "serialize_serde", serde(with = "duration_millis"))]
    replica_liveness_timeout: Duration,
}

impl ReplicaConfig {
    pub fn new(id: NodeId, params: SystemParams) -> Self {
        ReplicaConfig {
            id,
            params,
            watermark_window: 1000,
            checkpoint_period: 100,
            max_process_txn: 1024,
            view_change_base_timeout: Duration::from_millis(2000),
            replica_liveness_timeout: Duration::from_millis(10000),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn params(&self) -> &SystemParams {
        &self.params
    }

    pub fn watermark_window(&self) -> u32 {
        self.watermark_window
    }

    pub fn checkpoint_period(&self) -> u32 {
        self.checkpoint_period
    }

    pub fn max_process_txn(&self) -> usize {
        self.max_process_txn
    }

    pub fn view_change_base_timeout(&self) -> Duration {
        self.view_change_base_timeout
    }

    pub fn replica_liveness_timeout(&self) -> Duration {
        self.replica_liveness_timeout
    }

    pub fn with_watermark_window(mut self, w: u32) -> Self {
        self.watermark_window = w;
        self
    }

    pub fn with_checkpoint_period(mut self, period: u32) -> Self {
        self.checkpoint_period = period;
        self
    }

    pub fn with_max_process_txn(mut self, max: usize) -> Self {
        self.max_process_txn = max;
        self
    }
}

#[cfg(feature = "serialize_serde")]
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_undersized_groups() {
        assert!(SystemParams::new(3, 1).is_none());
        assert!(SystemParams::new(4, 1).is_some());
    }

    #[test]
    fn quorum_is_two_f_plus_one() {
        let params = SystemParams::new(7, 2).unwrap();
        assert_eq!(params.quorum(), 5);
    }
}
