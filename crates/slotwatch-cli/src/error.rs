use std::time::Duration;

use slotwatch_cluster::{BuildError, ConfigError, TopologyError, VerificationError};

/// Failures surfaced by CLI commands.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("cluster did not converge after {attempts} attempts in {elapsed:?}{}", describe_last(.last))]
    NotConverged {
        attempts: u32,
        elapsed: Duration,
        last: Option<VerificationError>,
    },

    #[error("{command} replied {reply:?}")]
    UnexpectedReply { command: String, reply: String },

    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn describe_last(last: &Option<VerificationError>) -> String {
    match last {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}
