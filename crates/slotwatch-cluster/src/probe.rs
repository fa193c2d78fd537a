//! Single-shot convergence probes.
//!
//! After a reconfiguration the cluster needs time to settle. Callers poll
//! these probes under a [`RetryPolicy`]; the probes themselves never
//! sleep, retry, or touch the network.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VerificationError;
use crate::topology::{ClusterSlot, ShardTopology};
use crate::verify::{check_coverage, check_shard_shape, check_slot_shape, ExpectedShape};

/// Outcome of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    Converged,
    /// Not there yet; the mismatch seen on this attempt.
    Pending(VerificationError),
}

impl Convergence {
    pub fn is_converged(&self) -> bool {
        matches!(self, Convergence::Converged)
    }

    fn from_check(result: Result<(), VerificationError>) -> Self {
        match result {
            Ok(()) => Convergence::Converged,
            Err(e) => Convergence::Pending(e),
        }
    }
}

/// Checks a CLUSTER SLOTS view against the configured shape.
///
/// Converged means full coverage with no gaps or overlaps, the right
/// number of distinct masters, and the right replica count per range.
pub fn probe_slots(slots: &[ClusterSlot], shape: &ExpectedShape) -> Convergence {
    Convergence::from_check(check_slot_shape(slots, shape).and_then(|()| check_coverage(slots)))
}

/// Checks a per-node snapshot against the configured shape.
pub fn probe_shards(topology: &ShardTopology, shape: &ExpectedShape) -> Convergence {
    Convergence::from_check(check_shard_shape(topology, shape))
}

/// Bounds for a polling loop around a probe.
///
/// Plain data; the loop itself lives with the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Pause between attempts.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Upper bound on the whole loop, settle time included.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Wait before the first attempt.
    #[serde(with = "humantime_serde")]
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            settle: Duration::from_secs(30),
        }
    }
}
