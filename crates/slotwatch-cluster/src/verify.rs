//! Consistency checks over topology snapshots.
//!
//! Single-snapshot checks compare what the cluster reports against the
//! configured shape. Two-snapshot checks compare a cluster before and
//! after a reconfiguration and decide whether the change was legal.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VerificationError;
use crate::slots::{SlotCoverage, SLOT_COUNT};
use crate::topology::{total_covered_slots, ClusterSlot, NodeId, RoleKind, ShardTopology};

/// Configured cluster shape: M masters with R replicas each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedShape {
    pub masters: usize,
    pub replicas: usize,
}

impl Default for ExpectedShape {
    fn default() -> Self {
        Self {
            masters: 3,
            replicas: 1,
        }
    }
}

impl ExpectedShape {
    pub fn new(masters: usize, replicas: usize) -> Self {
        Self { masters, replicas }
    }

    /// Members per shard row, master included.
    pub fn row_len(&self) -> usize {
        self.replicas + 1
    }

    pub fn node_count(&self) -> usize {
        self.masters * self.row_len()
    }
}

/// Same range and the same addresses in the same order. IDs are ignored.
fn slot_matches(observed: &ClusterSlot, expected: &ClusterSlot) -> bool {
    observed.start == expected.start
        && observed.end == expected.end
        && observed.nodes.len() == expected.nodes.len()
        && observed
            .nodes
            .iter()
            .zip(&expected.nodes)
            .all(|(o, e)| o.addr == e.addr)
}

/// Checks that every expected entry has an exact counterpart in `observed`.
///
/// One-directional: observed entries that no expected entry asks for are
/// not reported. Fails on the first expected entry without a match.
pub fn slots_equal(
    observed: &[ClusterSlot],
    expected: &[ClusterSlot],
) -> Result<(), VerificationError> {
    for want in expected {
        if !observed.iter().any(|got| slot_matches(got, want)) {
            return Err(VerificationError::MissingSlot {
                expected: want.clone(),
                observed: observed.to_vec(),
            });
        }
    }
    Ok(())
}

/// Identity of the master serving a slot entry: its ID, or its address
/// when the view carries no IDs.
fn master_key(slot: &ClusterSlot) -> Option<&str> {
    slot.master()
        .map(|n| n.id.as_ref().map_or(n.addr.as_str(), NodeId::as_str))
}

/// Shape checks over a CLUSTER SLOTS view.
///
/// Total coverage must be the full slot space, the number of distinct
/// masters must match, and every range must carry the configured number
/// of replicas.
pub fn check_slot_shape(
    slots: &[ClusterSlot],
    shape: &ExpectedShape,
) -> Result<(), VerificationError> {
    let covered = total_covered_slots(slots);
    if covered != SLOT_COUNT as u32 {
        return Err(VerificationError::Coverage {
            expected: SLOT_COUNT as u32,
            observed: covered,
        });
    }

    let masters: BTreeSet<&str> = slots.iter().filter_map(master_key).collect();
    if masters.len() != shape.masters {
        return Err(VerificationError::MasterCount {
            expected: shape.masters,
            observed: masters.len(),
        });
    }

    for slot in slots {
        let replicas = slot.replicas().len();
        if replicas != shape.replicas {
            return Err(VerificationError::ReplicaCount {
                scope: format!("slots {}", slot.range()),
                expected: shape.replicas,
                observed: replicas,
            });
        }
    }

    debug!(entries = slots.len(), masters = masters.len(), "slot shape ok");
    Ok(())
}

/// Exact coverage: every slot owned by exactly one entry.
///
/// Catches a gap and an overlap of equal size, which a plain sum misses.
pub fn check_coverage(slots: &[ClusterSlot]) -> Result<(), VerificationError> {
    let ranges: Vec<_> = slots.iter().map(ClusterSlot::range).collect();
    let coverage = SlotCoverage::from_ranges(&ranges);
    if coverage.is_complete() {
        Ok(())
    } else {
        Err(VerificationError::CoverageHoles {
            gaps: coverage.gaps(),
            overlaps: coverage.overlaps(),
        })
    }
}

/// Shape checks over a per-node snapshot.
///
/// M rows of R+1 members, one master per row found by role, and every
/// slave in a row following that row's master.
pub fn check_shard_shape(
    topology: &ShardTopology,
    shape: &ExpectedShape,
) -> Result<(), VerificationError> {
    if topology.shard_count() != shape.masters {
        return Err(VerificationError::ShardCount {
            expected: shape.masters,
            observed: topology.shard_count(),
        });
    }

    for (shard, row) in topology.rows().iter().enumerate() {
        if row.len() != shape.row_len() {
            return Err(VerificationError::ShardSize {
                shard,
                expected: shape.row_len(),
                observed: row.len(),
            });
        }

        let master = topology.master_of(shard)?;
        for node in row {
            if let Some(followed) = node.replica_of() {
                if followed != &master.id {
                    return Err(VerificationError::ForeignReplica {
                        shard,
                        node: node.id.clone(),
                        expected: master.id.clone(),
                        observed: followed.clone(),
                    });
                }
            }
        }

        let replicas = topology.replica_count(shard)?;
        if replicas != shape.replicas {
            return Err(VerificationError::ReplicaCount {
                scope: format!("shard {shard}"),
                expected: shape.replicas,
                observed: replicas,
            });
        }
    }
    Ok(())
}

/// A node whose role differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub id: NodeId,
    /// Row of the node in the later snapshot.
    pub shard: usize,
    pub from: RoleKind,
    pub to: RoleKind,
}

/// Differences between two snapshots, keyed by node ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyDiff {
    pub role_changes: Vec<RoleChange>,
    /// Present only in the later snapshot.
    pub added: Vec<NodeId>,
    /// Present only in the earlier snapshot.
    pub removed: Vec<NodeId>,
}

impl TopologyDiff {
    pub fn is_empty(&self) -> bool {
        self.role_changes.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    pub fn promotions(&self) -> impl Iterator<Item = &RoleChange> {
        self.role_changes
            .iter()
            .filter(|c| c.from == RoleKind::Slave && c.to == RoleKind::Master)
    }

    pub fn demotions(&self) -> impl Iterator<Item = &RoleChange> {
        self.role_changes
            .iter()
            .filter(|c| c.from == RoleKind::Master && c.to == RoleKind::Slave)
    }
}

/// Compares two snapshots node by node.
pub fn diff_topology(before: &ShardTopology, after: &ShardTopology) -> TopologyDiff {
    let old: BTreeMap<&NodeId, RoleKind> = before
        .nodes()
        .map(|(_, _, n)| (&n.id, n.role.kind()))
        .collect();
    let new_ids: BTreeSet<&NodeId> = after.nodes().map(|(_, _, n)| &n.id).collect();

    let mut diff = TopologyDiff::default();
    for (shard, _, node) in after.nodes() {
        match old.get(&node.id) {
            Some(&from) if from != node.role.kind() => diff.role_changes.push(RoleChange {
                id: node.id.clone(),
                shard,
                from,
                to: node.role.kind(),
            }),
            Some(_) => {}
            None => diff.added.push(node.id.clone()),
        }
    }
    diff.removed = old
        .keys()
        .filter(|id| !new_ids.contains(*id))
        .map(|id| (*id).clone())
        .collect();
    diff
}

/// The role transition a legal failover produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverOutcome {
    pub shard: usize,
    pub promoted: NodeId,
    /// The previous master, unless it left the shard.
    pub demoted: Option<NodeId>,
}

/// Checks that a shard went through exactly one failover.
///
/// One slave of the previous master is now the master, the previous
/// master is a slave or gone, no other member changed role, and the
/// shard owns the same slots as before.
pub fn verify_failover(
    before: &ShardTopology,
    after: &ShardTopology,
    shard: usize,
) -> Result<FailoverOutcome, VerificationError> {
    let old_master = before.master_of(shard)?;
    let new_master = after.master_of(shard)?;

    if new_master.id == old_master.id {
        return Err(VerificationError::InvalidFailover {
            shard,
            detail: format!("{} is still master", old_master.id),
        });
    }

    let before_row = before.shard(shard).unwrap_or_default();
    let after_row = after.shard(shard).unwrap_or_default();

    let Some(candidate) = before_row.iter().find(|n| n.id == new_master.id) else {
        return Err(VerificationError::InvalidFailover {
            shard,
            detail: format!("new master {} was not a member of the shard", new_master.id),
        });
    };
    if candidate.replica_of() != Some(&old_master.id) {
        return Err(VerificationError::InvalidFailover {
            shard,
            detail: format!(
                "new master {} did not replicate {} before the failover",
                new_master.id, old_master.id
            ),
        });
    }

    // every member other than the two that swapped keeps its role
    for node in after_row {
        if node.id == new_master.id || node.id == old_master.id {
            continue;
        }
        if let Some(prior) = before_row.iter().find(|n| n.id == node.id) {
            if prior.role.kind() != node.role.kind() {
                return Err(VerificationError::InvalidFailover {
                    shard,
                    detail: format!(
                        "{} changed from {} to {}",
                        node.id,
                        prior.role.kind(),
                        node.role.kind()
                    ),
                });
            }
        }
    }

    let slots_before = before.shard_slots(shard)?;
    let slots_after = after.shard_slots(shard)?;
    if slots_before != slots_after {
        return Err(VerificationError::SlotsChanged {
            shard,
            before: slots_before,
            after: slots_after,
        });
    }

    let demoted = after_row
        .iter()
        .find(|n| n.id == old_master.id)
        .map(|n| n.id.clone());

    Ok(FailoverOutcome {
        shard,
        promoted: new_master.id.clone(),
        demoted,
    })
}
