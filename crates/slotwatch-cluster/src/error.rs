//! Error types for topology queries.
//!
//! Each stage of a query has its own error type so callers can tell a
//! bad version string from an unreachable node from a garbled reply.
//! `TopologyError` wraps all of them for call sites that just propagate.

use std::num::ParseIntError;

use crate::response::ErrorKind;
use crate::slots::SlotRange;
use crate::topology::{ClusterSlot, NodeId};

/// The version string could not be turned into a supported tool variant.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Nothing before the first dot.
    #[error("version {version:?} has no major part")]
    MissingMajor { version: String },

    /// The major component is not an integer.
    #[error("unable to parse major part in version {version:?}: {source}")]
    InvalidMajor {
        version: String,
        #[source]
        source: ParseIntError,
    },

    /// The major version has no matching tool variant.
    #[error("unsupported version {version:?} (major {major})")]
    UnsupportedVersion { version: String, major: i64 },
}

/// The remote execution boundary failed before any reply was produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error on {target}: {message}")]
pub struct TransportError {
    /// Name of the node the command was sent to.
    pub target: String,
    /// What went wrong, as reported by the executor.
    pub message: String,
}

impl TransportError {
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            message: message.into(),
        }
    }
}

/// A reply that the node sent back but which signals a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {raw}")]
pub struct ProtocolError {
    /// Which known condition matched.
    pub kind: ErrorKind,
    /// The reply text, trailing newline removed.
    pub raw: String,
}

/// Malformed introspection text.
///
/// A parse call that returns one of these never hands back partial data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A positional field is missing from a node line.
    #[error("missing field {field} (index {index}) in line {line:?}")]
    MissingField {
        field: &'static str,
        index: usize,
        line: String,
    },

    /// A field that must be an integer is not one.
    #[error("invalid {field} {value:?}: {reason}")]
    InvalidInteger {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// A slot range whose bounds are reversed or out of range.
    #[error("invalid slot range {start}-{end}")]
    InvalidSlotRange { start: u32, end: u32 },

    /// A slot-map group ended in the middle of a node triple.
    #[error("truncated slot group {group}: expected {expected} after token {position}")]
    Truncated {
        group: usize,
        position: usize,
        expected: &'static str,
    },

    /// No line carried the `myself` marker.
    #[error("no line marked 'myself' in CLUSTER NODES reply")]
    MissingSelf,

    /// A `name value` pair list had an odd number of lines.
    #[error("unpaired entry {0:?} in CONFIG GET reply")]
    UnpairedConfig(String),
}

impl ParseError {
    pub(crate) fn invalid_integer(
        field: &'static str,
        value: &str,
        err: impl std::fmt::Display,
    ) -> Self {
        ParseError::InvalidInteger {
            field,
            value: value.to_string(),
            reason: err.to_string(),
        }
    }
}

/// The observed topology does not match what was expected.
///
/// Every variant carries both sides so the mismatch can be diagnosed
/// from the error message alone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    /// An expected slot entry has no exact counterpart in the observed set.
    #[error("{expected} not found in [{}]", list_slots(.observed))]
    MissingSlot {
        expected: ClusterSlot,
        observed: Vec<ClusterSlot>,
    },

    /// The summed range lengths are not the full slot space.
    #[error("covered slots: expected {expected}, observed {observed}")]
    Coverage { expected: u32, observed: u32 },

    /// Some slots are unowned or owned more than once.
    #[error("slot coverage broken: gaps [{}], overlaps [{}]", crate::slots::format_ranges(.gaps), crate::slots::format_ranges(.overlaps))]
    CoverageHoles {
        gaps: Vec<SlotRange>,
        overlaps: Vec<SlotRange>,
    },

    /// The number of distinct masters differs from the configured count.
    #[error("masters: expected {expected}, observed {observed}")]
    MasterCount { expected: usize, observed: usize },

    /// A slot range or shard has the wrong number of replicas.
    #[error("replicas for {scope}: expected {expected}, observed {observed}")]
    ReplicaCount {
        scope: String,
        expected: usize,
        observed: usize,
    },

    /// The snapshot has the wrong number of shard rows.
    #[error("shard rows: expected {expected}, observed {observed}")]
    ShardCount { expected: usize, observed: usize },

    /// A shard row has the wrong number of members.
    #[error("shard {shard} members: expected {expected}, observed {observed}")]
    ShardSize {
        shard: usize,
        expected: usize,
        observed: usize,
    },

    /// A shard row does not hold exactly one master.
    #[error("shard {shard} has {observed} masters, expected exactly 1")]
    ShardMasters { shard: usize, observed: usize },

    /// A slave in a shard row follows a node outside that row.
    #[error("shard {shard}: {node} replicates {observed}, expected {expected}")]
    ForeignReplica {
        shard: usize,
        node: NodeId,
        expected: NodeId,
        observed: NodeId,
    },

    /// A shard's slot ownership changed across a failover.
    #[error("shard {shard} slots changed: before [{}], after [{}]", crate::slots::format_ranges(.before), crate::slots::format_ranges(.after))]
    SlotsChanged {
        shard: usize,
        before: Vec<SlotRange>,
        after: Vec<SlotRange>,
    },

    /// The role transitions across a failover do not match a single promotion.
    #[error("shard {shard}: invalid failover transition: {detail}")]
    InvalidFailover { shard: usize, detail: String },

    /// A shard index outside the snapshot.
    #[error("shard {shard} not present (snapshot has {rows} shards)")]
    NoSuchShard { shard: usize, rows: usize },
}

fn list_slots(slots: &[ClusterSlot]) -> String {
    slots
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from loading or writing a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Any failure a topology query can produce.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Verification(#[from] VerificationError),
}

impl TopologyError {
    /// Returns true if this is a MOVED redirect reply.
    pub fn is_redirect(&self) -> bool {
        matches!(self, TopologyError::Protocol(p) if p.kind == ErrorKind::Moved)
    }

    /// Returns true if retrying after the cluster settles may succeed.
    ///
    /// Only verification mismatches qualify. Transport, protocol and parse
    /// failures are reported to the caller as-is.
    pub fn is_convergence(&self) -> bool {
        matches!(self, TopologyError::Verification(_))
    }
}
