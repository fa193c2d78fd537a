//! Point-in-time model of a cluster's topology.
//!
//! Nodes, their roles, the slots they own, and the shard arrangement
//! reconstructed from introspection replies. A snapshot is built fresh on
//! every query and never mutated afterwards; a later view of the cluster
//! is a new snapshot.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::VerificationError;
use crate::slots::{slot_total, SlotRange};

/// The port clients use for data commands on every member.
pub const DATA_PORT: u16 = 6379;

/// Identifier the cluster assigns to a node.
///
/// Opaque to us; stable across restarts of the node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines and reports.
    pub fn short(&self) -> &str {
        truncate_id(&self.0, 8)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // similar to git short hashes
        write!(f, "{}", self.short())
    }
}

/// Truncates a string to at most `max_len` bytes on a char boundary.
fn truncate_id(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Joins host and port, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: impl std::fmt::Display) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// The role of a node without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Master,
    Slave,
}

impl std::fmt::Display for RoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleKind::Master => write!(f, "master"),
            RoleKind::Slave => write!(f, "slave"),
        }
    }
}

/// A node's role together with the data that only makes sense for it.
///
/// Masters own slot ranges (possibly none, mid-reconfiguration); slaves
/// follow exactly one master. A node can never carry both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Role {
    Master { slots: Vec<SlotRange> },
    Slave { master: NodeId },
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Master { .. } => RoleKind::Master,
            Role::Slave { .. } => RoleKind::Slave,
        }
    }
}

/// Status flags from the third field of a CLUSTER NODES line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFlags {
    /// The line describes the node that answered.
    pub myself: bool,
    /// Suspected failing (`fail?`).
    pub pfail: bool,
    /// Confirmed failed by the cluster.
    pub fail: bool,
    /// Still handshaking, not yet a member.
    pub handshake: bool,
    /// No known address.
    pub noaddr: bool,
}

impl NodeFlags {
    /// Parses a comma-separated flag field such as `myself,master`.
    ///
    /// Role flags are ignored here; the role is read separately.
    pub fn parse(field: &str) -> Self {
        let mut flags = NodeFlags::default();
        for flag in field.split(',') {
            match flag {
                "myself" => flags.myself = true,
                "fail?" | "pfail" => flags.pfail = true,
                "fail" => flags.fail = true,
                "handshake" => flags.handshake = true,
                "noaddr" => flags.noaddr = true,
                _ => {}
            }
        }
        flags
    }

    /// Returns true if the node is considered healthy.
    pub fn is_healthy(&self) -> bool {
        !self.fail && !self.pfail
    }
}

impl std::fmt::Display for NodeFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut flags = Vec::new();
        if self.myself {
            flags.push("myself");
        }
        if self.pfail {
            flags.push("fail?");
        }
        if self.fail {
            flags.push("fail");
        }
        if self.handshake {
            flags.push("handshake");
        }
        if self.noaddr {
            flags.push("noaddr");
        }
        if flags.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", flags.join(","))
        }
    }
}

/// One cluster member as seen in introspection output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Host part of the advertised address; the port is dropped.
    pub host: String,
    #[serde(flatten)]
    pub role: Role,
    pub flags: NodeFlags,
}

impl Node {
    /// Creates a master owning the given ranges.
    pub fn master(id: impl Into<String>, host: impl Into<String>, slots: Vec<SlotRange>) -> Self {
        Self {
            id: NodeId::new(id),
            host: host.into(),
            role: Role::Master { slots },
            flags: NodeFlags::default(),
        }
    }

    /// Creates a slave following `master`.
    pub fn slave(id: impl Into<String>, host: impl Into<String>, master: impl Into<String>) -> Self {
        Self {
            id: NodeId::new(id),
            host: host.into(),
            role: Role::Slave {
                master: NodeId::new(master),
            },
            flags: NodeFlags::default(),
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self.role, Role::Master { .. })
    }

    /// Owned slot ranges; always empty for slaves.
    pub fn slots(&self) -> &[SlotRange] {
        match &self.role {
            Role::Master { slots } => slots,
            Role::Slave { .. } => &[],
        }
    }

    /// The master this node follows, if it is a slave.
    pub fn replica_of(&self) -> Option<&NodeId> {
        match &self.role {
            Role::Master { .. } => None,
            Role::Slave { master } => Some(master),
        }
    }

    /// Returns the total number of slots owned by this node.
    pub fn slot_count(&self) -> u32 {
        slot_total(self.slots())
    }

    /// `host:port` for this node on the given port.
    pub fn addr(&self, port: u16) -> String {
        join_host_port(&self.host, port)
    }
}

/// A node serving a slot range, as listed by CLUSTER SLOTS.
///
/// `id` is `None` in views built only for address comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotNode {
    pub id: Option<NodeId>,
    pub addr: String,
}

impl SlotNode {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: Some(NodeId::new(id)),
            addr: addr.into(),
        }
    }

    /// An address-only entry.
    pub fn addr_only(addr: impl Into<String>) -> Self {
        Self {
            id: None,
            addr: addr.into(),
        }
    }
}

/// One contiguous slot range and the nodes serving it.
///
/// By convention `nodes[0]` is the master and the rest are its replicas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSlot {
    pub start: u16,
    pub end: u16,
    pub nodes: Vec<SlotNode>,
}

impl ClusterSlot {
    pub fn new(range: SlotRange, nodes: Vec<SlotNode>) -> Self {
        Self {
            start: range.start,
            end: range.end,
            nodes,
        }
    }

    pub fn range(&self) -> SlotRange {
        SlotRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Slots in the entry, always >= 1.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u32 {
        self.range().len()
    }

    /// The serving master, if any node is listed.
    pub fn master(&self) -> Option<&SlotNode> {
        self.nodes.first()
    }

    /// Every listed node after the master.
    pub fn replicas(&self) -> &[SlotNode] {
        self.nodes.get(1..).unwrap_or(&[])
    }
}

impl std::fmt::Display for ClusterSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let addrs: Vec<&str> = self.nodes.iter().map(|n| n.addr.as_str()).collect();
        write!(f, "{{{}-{} [{}]}}", self.start, self.end, addrs.join(" "))
    }
}

/// Sums `end - start + 1` over all entries.
///
/// Overlapping or duplicated entries are counted as-is, so a gap and an
/// overlap of equal size add up to a full cluster. Use
/// [`check_coverage`](crate::check_coverage) to tell them apart.
pub fn total_covered_slots(slots: &[ClusterSlot]) -> u32 {
    slots.iter().map(ClusterSlot::len).sum()
}

/// A full snapshot: one row per shard, each row the shard's members in
/// replica-index order.
///
/// Index 0 is where the master starts out, but after a failover any index
/// may hold it. Look masters up by role with [`ShardTopology::master_of`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardTopology {
    shards: Vec<Vec<Node>>,
    data_port: u16,
}

impl ShardTopology {
    pub fn new(shards: Vec<Vec<Node>>) -> Self {
        Self {
            shards,
            data_port: DATA_PORT,
        }
    }

    /// Uses `port` instead of the default data port for address views.
    pub fn with_data_port(mut self, port: u16) -> Self {
        self.data_port = port;
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn rows(&self) -> &[Vec<Node>] {
        &self.shards
    }

    pub fn shard(&self, shard: usize) -> Option<&[Node]> {
        self.shards.get(shard).map(Vec::as_slice)
    }

    pub fn node(&self, shard: usize, replica: usize) -> Option<&Node> {
        self.shards.get(shard)?.get(replica)
    }

    /// Iterates every node with its (shard, replica) position.
    pub fn nodes(&self) -> impl Iterator<Item = (usize, usize, &Node)> {
        self.shards
            .iter()
            .enumerate()
            .flat_map(|(i, row)| row.iter().enumerate().map(move |(j, n)| (i, j, n)))
    }

    /// Finds a node by ID anywhere in the snapshot.
    pub fn find(&self, id: &NodeId) -> Option<(usize, usize, &Node)> {
        self.nodes().find(|(_, _, n)| &n.id == id)
    }

    /// Returns the single master of a shard row, checked by role.
    pub fn master_of(&self, shard: usize) -> Result<&Node, VerificationError> {
        let row = self
            .shards
            .get(shard)
            .ok_or(VerificationError::NoSuchShard {
                shard,
                rows: self.shards.len(),
            })?;
        let mut masters = row.iter().filter(|n| n.is_master());
        match (masters.next(), masters.next()) {
            (Some(master), None) => Ok(master),
            _ => Err(VerificationError::ShardMasters {
                shard,
                observed: row.iter().filter(|n| n.is_master()).count(),
            }),
        }
    }

    /// Every node whose role is master, in row order.
    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.nodes().map(|(_, _, n)| n).filter(|n| n.is_master())
    }

    /// Distinct master IDs across all rows.
    pub fn master_ids(&self) -> BTreeSet<&NodeId> {
        self.masters().map(|n| &n.id).collect()
    }

    /// Slots owned by the shard's master.
    pub fn shard_slot_count(&self, shard: usize) -> Result<u32, VerificationError> {
        Ok(self.master_of(shard)?.slot_count())
    }

    /// Number of members of the row that follow the row's master.
    pub fn replica_count(&self, shard: usize) -> Result<usize, VerificationError> {
        let master = self.master_of(shard)?;
        Ok(self.shards[shard]
            .iter()
            .filter(|n| n.replica_of() == Some(&master.id))
            .count())
    }

    /// Slot ranges owned by the shard's master, sorted.
    pub fn shard_slots(&self, shard: usize) -> Result<Vec<SlotRange>, VerificationError> {
        let mut slots = self.master_of(shard)?.slots().to_vec();
        slots.sort();
        Ok(slots)
    }

    /// Nodes serving exactly `start..=end`, as address-only entries.
    ///
    /// Finds the row whose master owns that exact range and lists the
    /// master first, then the rest of the row in index order. Partial or
    /// overlapping ranges never match.
    pub fn nodes_for_range(&self, start: u16, end: u16) -> Option<Vec<SlotNode>> {
        let wanted = SlotRange { start, end };
        for shard in 0..self.shards.len() {
            let Ok(master) = self.master_of(shard) else {
                continue;
            };
            if !master.slots().contains(&wanted) {
                continue;
            }
            let mut nodes = vec![SlotNode::addr_only(master.addr(self.data_port))];
            nodes.extend(
                self.shards[shard]
                    .iter()
                    .filter(|n| n.id != master.id)
                    .map(|n| SlotNode::addr_only(n.addr(self.data_port))),
            );
            return Some(nodes);
        }
        None
    }
}
