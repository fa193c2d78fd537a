//! slotwatch-cluster: topology extraction and verification for
//! slot-sharded key-value clusters.
//!
//! Cluster members describe themselves through line-oriented text
//! (CLUSTER NODES, CLUSTER SLOTS and friends). This crate turns that text
//! into typed snapshots and checks them against the configured shape.
//!
//! # Architecture
//!
//! - **Command building**: argv for the CLI tool, by version, TLS and mode
//! - **Reply classification**: ordered rules separating errors from payloads
//! - **Parsing**: node lines, slot maps, info and integer replies
//! - **Model**: nodes, roles, slot ranges and shard rows
//! - **Verification**: coverage, shape and failover checks over snapshots
//!
//! Running commands is left to a [`RemoteExecutor`] supplied by the caller.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use slotwatch_cluster::{probe_slots, ClusterClient, ClusterConfig};
//!
//! let config = ClusterConfig::default();
//! let client = ClusterClient::new(config.clone(), my_executor)?;
//! let slots = client.cluster_slots()?;
//! assert!(probe_slots(&slots, &config.shape).is_converged());
//! ```

mod client;
mod command;
mod config;
mod error;
mod exec;
mod parse;
mod probe;
mod response;
mod slots;
mod topology;
mod verify;

pub use client::ClusterClient;
pub use command::{
    major_version, Addressing, AddressingMode, CliTool, CommandBuilder, Operation, TlsFiles,
};
pub use config::{ClusterConfig, ExecutorConfig, NODE_PLACEHOLDER};
pub use error::{
    BuildError, ConfigError, ParseError, ProtocolError, TopologyError, TransportError,
    VerificationError,
};
pub use exec::{NodeTarget, RemoteExecutor};
pub use parse::{
    parse_cluster_info, parse_cluster_nodes, parse_cluster_slaves, parse_cluster_slots,
    parse_config_get, parse_integer, parse_myself, parse_node_line, ClusterInfo,
};
pub use probe::{probe_shards, probe_slots, Convergence, RetryPolicy};
pub use response::{
    parse_redirect, trim_reply, ErrorKind, Matcher, Redirect, ResponseClassifier, Rule, OK,
};
pub use slots::{format_ranges, slot_total, SlotCoverage, SlotRange, MAX_SLOT, SLOT_COUNT};
pub use topology::{
    join_host_port, total_covered_slots, ClusterSlot, Node, NodeFlags, NodeId, Role, RoleKind,
    ShardTopology, SlotNode, DATA_PORT,
};
pub use verify::{
    check_coverage, check_shard_shape, check_slot_shape, diff_topology, slots_equal,
    verify_failover, ExpectedShape, FailoverOutcome, RoleChange, TopologyDiff,
};
