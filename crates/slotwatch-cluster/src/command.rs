//! Command-line construction for introspection and data commands.
//!
//! Every command is a plain argv: the CLI tool, an optional TLS flag
//! block, an optional cluster routing flag, then the operation tokens.
//! Building is pure; nothing here touches the network.

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::topology::NodeId;

/// Extracts the major component of a free-form version string.
///
/// Build metadata (after `+`) and prerelease (after `-`) are stripped
/// first. Only majors 4, 5 and 6 are recognized; anything else fails
/// rather than defaulting to a tool that may not exist in the image.
pub fn major_version(version: &str) -> Result<u32, BuildError> {
    let core = split_off(split_off(version, '+'), '-');
    let major = core.split('.').next().unwrap_or_default();
    if major.is_empty() {
        return Err(BuildError::MissingMajor {
            version: version.to_string(),
        });
    }

    let major: i64 = major.parse().map_err(|source| BuildError::InvalidMajor {
        version: version.to_string(),
        source,
    })?;

    match major {
        4..=6 => Ok(major as u32),
        _ => Err(BuildError::UnsupportedVersion {
            version: version.to_string(),
            major,
        }),
    }
}

fn split_off(input: &str, delim: char) -> &str {
    input.split_once(delim).map_or(input, |(head, _)| head)
}

/// The executable used to talk to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliTool {
    /// Shipped with 4.x images.
    RedisTrib,
    RedisCli,
}

impl CliTool {
    /// Picks the tool for a recognized major version.
    pub fn for_major(major: u32) -> Self {
        if major == 4 {
            CliTool::RedisTrib
        } else {
            CliTool::RedisCli
        }
    }

    pub fn binary(&self) -> &'static str {
        match self {
            CliTool::RedisTrib => "redis-trib",
            CliTool::RedisCli => "redis-cli",
        }
    }
}

/// Certificate paths passed with `--tls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsFiles {
    pub cert: String,
    pub key: String,
    pub ca_cert: String,
}

impl Default for TlsFiles {
    fn default() -> Self {
        Self {
            cert: "/certs/client.crt".into(),
            key: "/certs/client.key".into(),
            ca_cert: "/certs/ca.crt".into(),
        }
    }
}

impl TlsFiles {
    /// `--tls --cert <c> --key <k> --cacert <ca>`, in that order.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "--tls".into(),
            "--cert".into(),
            self.cert.clone(),
            "--key".into(),
            self.key.clone(),
            "--cacert".into(),
            self.ca_cert.clone(),
        ]
    }
}

/// Whether the tool should follow cluster redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    #[default]
    Standalone,
    Cluster,
}

impl std::fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressingMode::Standalone => write!(f, "standalone"),
            AddressingMode::Cluster => write!(f, "cluster"),
        }
    }
}

/// How an operation picks its addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Uses the database's own mode.
    FollowDatabase,
    /// Always talks to the one node it runs on.
    Fixed(AddressingMode),
}

/// Every command the query layer issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Ping,
    Set { key: String, value: String },
    Get { key: String },
    Del { key: String },
    RandomKey,
    DbSize,
    ConfigGet { param: String },
    FlushDb,
    ClusterInfo,
    ClusterNodes,
    ClusterSaveConfig,
    ClusterCountKeysInSlot { slot: u16 },
    ClusterCountFailureReports { node_id: NodeId },
    ClusterSlaves { node_id: NodeId },
    ClusterFailover,
    ClusterSlots,
}

impl Operation {
    /// Data commands follow the database mode, per-node commands stay
    /// standalone and every CLUSTER subcommand is cluster-addressed.
    pub fn addressing(&self) -> Addressing {
        match self {
            Self::Ping | Self::Set { .. } | Self::Get { .. } | Self::Del { .. } | Self::RandomKey => {
                Addressing::FollowDatabase
            }
            Self::DbSize | Self::ConfigGet { .. } | Self::FlushDb => {
                Addressing::Fixed(AddressingMode::Standalone)
            }
            _ => Addressing::Fixed(AddressingMode::Cluster),
        }
    }

    /// Resolves the addressing mode against the database mode.
    pub fn mode(&self, db_mode: AddressingMode) -> AddressingMode {
        match self.addressing() {
            Addressing::FollowDatabase => db_mode,
            Addressing::Fixed(mode) => mode,
        }
    }

    /// Command tokens as sent to the tool, e.g. `["CLUSTER", "SLAVES", id]`.
    pub fn to_tokens(&self) -> Vec<String> {
        match self {
            Self::Ping => vec!["PING".into()],
            Self::Set { key, value } => vec!["SET".into(), key.clone(), value.clone()],
            Self::Get { key } => vec!["GET".into(), key.clone()],
            Self::Del { key } => vec!["DEL".into(), key.clone()],
            Self::RandomKey => vec!["RANDOMKEY".into()],
            Self::DbSize => vec!["DBSIZE".into()],
            Self::ConfigGet { param } => vec!["CONFIG".into(), "GET".into(), param.clone()],
            Self::FlushDb => vec!["FLUSHDB".into()],
            Self::ClusterInfo => vec!["CLUSTER".into(), "INFO".into()],
            Self::ClusterNodes => vec!["CLUSTER".into(), "NODES".into()],
            Self::ClusterSaveConfig => vec!["CLUSTER".into(), "SAVECONFIG".into()],
            Self::ClusterCountKeysInSlot { slot } => vec![
                "CLUSTER".into(),
                "COUNTKEYSINSLOT".into(),
                slot.to_string(),
            ],
            Self::ClusterCountFailureReports { node_id } => vec![
                "CLUSTER".into(),
                "COUNT-FAILURE-REPORTS".into(),
                node_id.as_str().to_string(),
            ],
            Self::ClusterSlaves { node_id } => vec![
                "CLUSTER".into(),
                "SLAVES".into(),
                node_id.as_str().to_string(),
            ],
            Self::ClusterFailover => vec!["CLUSTER".into(), "FAILOVER".into()],
            Self::ClusterSlots => vec!["CLUSTER".into(), "SLOTS".into()],
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Set { .. } => "SET",
            Self::Get { .. } => "GET",
            Self::Del { .. } => "DEL",
            Self::RandomKey => "RANDOMKEY",
            Self::DbSize => "DBSIZE",
            Self::ConfigGet { .. } => "CONFIG GET",
            Self::FlushDb => "FLUSHDB",
            Self::ClusterInfo => "CLUSTER INFO",
            Self::ClusterNodes => "CLUSTER NODES",
            Self::ClusterSaveConfig => "CLUSTER SAVECONFIG",
            Self::ClusterCountKeysInSlot { .. } => "CLUSTER COUNTKEYSINSLOT",
            Self::ClusterCountFailureReports { .. } => "CLUSTER COUNT-FAILURE-REPORTS",
            Self::ClusterSlaves { .. } => "CLUSTER SLAVES",
            Self::ClusterFailover => "CLUSTER FAILOVER",
            Self::ClusterSlots => "CLUSTER SLOTS",
        }
    }
}

/// Produces full argv vectors for one database version and TLS setting.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    tool: CliTool,
    tls: Option<TlsFiles>,
}

impl CommandBuilder {
    /// Fails with [`BuildError`] before any remote call if the version
    /// is not supported.
    pub fn new(version: &str, tls: Option<TlsFiles>) -> Result<Self, BuildError> {
        let major = major_version(version)?;
        Ok(Self {
            tool: CliTool::for_major(major),
            tls,
        })
    }

    pub fn tool(&self) -> CliTool {
        self.tool
    }

    /// Tool, TLS block, then `-c` in cluster mode.
    pub fn base(&self, mode: AddressingMode) -> Vec<String> {
        let mut argv = vec![self.tool.binary().to_string()];
        if let Some(tls) = &self.tls {
            argv.extend(tls.to_args());
        }
        if mode == AddressingMode::Cluster {
            argv.push("-c".into());
        }
        argv
    }

    /// The complete argv for `op` against a database running in `db_mode`.
    pub fn build(&self, op: &Operation, db_mode: AddressingMode) -> Vec<String> {
        let mut argv = self.base(op.mode(db_mode));
        argv.extend(op.to_tokens());
        argv
    }
}
