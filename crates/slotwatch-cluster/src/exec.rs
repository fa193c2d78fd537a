//! The boundary to whatever runs commands on cluster members.
//!
//! The library never spawns processes or opens sockets. It hands a built
//! argv and a target to a [`RemoteExecutor`] and gets raw text back.

use std::sync::Arc;

use crate::error::TransportError;

/// One addressable cluster member.
///
/// Members are named after the database: `<name>-0` for a standalone
/// instance, `<name>-shard<i>-<j>` for replica `j` of shard `i`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeTarget {
    name: String,
    shard: Option<usize>,
    replica: usize,
}

impl NodeTarget {
    pub fn standalone(db: &str) -> Self {
        Self {
            name: format!("{db}-0"),
            shard: None,
            replica: 0,
        }
    }

    pub fn cluster(db: &str, shard: usize, replica: usize) -> Self {
        Self {
            name: format!("{db}-shard{shard}-{replica}"),
            shard: Some(shard),
            replica,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shard index, or `None` for a standalone instance.
    pub fn shard(&self) -> Option<usize> {
        self.shard
    }

    pub fn replica(&self) -> usize {
        self.replica
    }
}

impl std::fmt::Display for NodeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Runs a command on one member and returns its raw output.
///
/// Implementations must be safe to call from several threads at once;
/// snapshot queries fan out across members.
pub trait RemoteExecutor: Send + Sync {
    fn execute(&self, target: &NodeTarget, argv: &[String]) -> Result<String, TransportError>;
}

impl<T: RemoteExecutor + ?Sized> RemoteExecutor for &T {
    fn execute(&self, target: &NodeTarget, argv: &[String]) -> Result<String, TransportError> {
        (**self).execute(target, argv)
    }
}

impl<T: RemoteExecutor + ?Sized> RemoteExecutor for Arc<T> {
    fn execute(&self, target: &NodeTarget, argv: &[String]) -> Result<String, TransportError> {
        (**self).execute(target, argv)
    }
}
