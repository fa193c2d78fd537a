//! Runs commands on cluster members through a local launcher process.
//!
//! The launcher is a prefix such as `kubectl exec -n default {node} --`;
//! the built argv is appended and the process's stdout is the reply.

use std::process::{Command, Stdio};

use slotwatch_cluster::{NodeTarget, RemoteExecutor, TransportError, NODE_PLACEHOLDER};
use tracing::trace;

/// Spawns one launcher process per command.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    launcher: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    /// Full process argv for `target`, placeholder substituted.
    pub fn command_line(&self, target: &NodeTarget, argv: &[String]) -> Vec<String> {
        self.launcher
            .iter()
            .map(|part| part.replace(NODE_PLACEHOLDER, target.name()))
            .chain(argv.iter().cloned())
            .collect()
    }
}

impl RemoteExecutor for ProcessExecutor {
    fn execute(&self, target: &NodeTarget, argv: &[String]) -> Result<String, TransportError> {
        let line = self.command_line(target, argv);
        let (program, args) = line
            .split_first()
            .ok_or_else(|| TransportError::new(target.name(), "empty command line"))?;
        trace!(node = %target, ?line, "spawning");

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| TransportError::new(target.name(), format!("failed to run {program}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::new(
                target.name(),
                format!("{program} exited with {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
