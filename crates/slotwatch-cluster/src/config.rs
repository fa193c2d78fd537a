//! Immutable configuration passed into every query.
//!
//! Loaded from a TOML file, then overridden by the CLI. Once built it is
//! shared read-only; there is no process-wide instance.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::{major_version, AddressingMode, CommandBuilder, TlsFiles};
use crate::error::{BuildError, ConfigError};
use crate::exec::NodeTarget;
use crate::probe::RetryPolicy;
use crate::topology::DATA_PORT;
use crate::verify::ExpectedShape;

/// Placeholder in the launcher replaced by the member name.
pub const NODE_PLACEHOLDER: &str = "{node}";

/// How commands reach a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Prefix run before the built argv. `{node}` is replaced by the
    /// member name.
    pub launcher: Vec<String>,
    /// Limit on a single remote command.
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            launcher: ["kubectl", "exec", "-n", "default", NODE_PLACEHOLDER, "--"]
                .map(String::from)
                .to_vec(),
            command_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a topology query needs to know about the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Database name; member names are derived from it.
    pub name: String,
    /// Server version string, e.g. `6.0.6` or `5.0.3-rc1`.
    pub version: String,
    pub mode: AddressingMode,
    pub tls: bool,
    pub tls_files: TlsFiles,
    pub data_port: u16,
    pub shape: ExpectedShape,
    pub retry: RetryPolicy,
    pub executor: ExecutorConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "redis".into(),
            version: "6.0.6".into(),
            mode: AddressingMode::Cluster,
            tls: false,
            tls_files: TlsFiles::default(),
            data_port: DATA_PORT,
            shape: ExpectedShape::default(),
            retry: RetryPolicy::default(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Reads a TOML file. Missing keys take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Renders the config as TOML, e.g. for `config-template`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects settings no query could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }
        if let Err(e) = major_version(&self.version) {
            return Err(ConfigError::Invalid(e.to_string()));
        }
        if self.mode == AddressingMode::Cluster && self.shape.masters == 0 {
            return Err(ConfigError::Invalid(
                "cluster mode needs at least one master".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if !self.executor.launcher.iter().any(|a| a.contains(NODE_PLACEHOLDER)) {
            return Err(ConfigError::Invalid(format!(
                "executor.launcher must contain {NODE_PLACEHOLDER}"
            )));
        }
        Ok(())
    }

    /// Command builder for the configured version and TLS setting.
    pub fn command_builder(&self) -> Result<CommandBuilder, BuildError> {
        let tls = self.tls.then(|| self.tls_files.clone());
        CommandBuilder::new(&self.version, tls)
    }

    /// The member at (shard, replica); standalone databases have only one.
    pub fn target(&self, shard: usize, replica: usize) -> NodeTarget {
        match self.mode {
            AddressingMode::Cluster => NodeTarget::cluster(&self.name, shard, replica),
            AddressingMode::Standalone => NodeTarget::standalone(&self.name),
        }
    }

    /// Every member in shard-major order.
    pub fn targets(&self) -> Vec<NodeTarget> {
        match self.mode {
            AddressingMode::Standalone => vec![NodeTarget::standalone(&self.name)],
            AddressingMode::Cluster => (0..self.shape.masters)
                .flat_map(|i| (0..self.shape.row_len()).map(move |j| (i, j)))
                .map(|(i, j)| NodeTarget::cluster(&self.name, i, j))
                .collect(),
        }
    }
}
