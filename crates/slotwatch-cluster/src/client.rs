//! One-shot queries against a cluster.
//!
//! Each call builds a command, runs it through the executor, classifies
//! the reply and parses it. Nothing here retries or sleeps; polling
//! belongs to the caller.

use tracing::{debug, warn};

use crate::command::{AddressingMode, CommandBuilder, Operation};
use crate::config::ClusterConfig;
use crate::error::{BuildError, TopologyError};
use crate::exec::{NodeTarget, RemoteExecutor};
use crate::parse::{
    parse_cluster_info, parse_cluster_nodes, parse_cluster_slaves, parse_cluster_slots,
    parse_config_get, parse_integer, parse_myself, ClusterInfo,
};
use crate::response::ResponseClassifier;
use crate::topology::{ClusterSlot, Node, NodeId, ShardTopology};

/// Query handle bound to one configuration and one executor.
pub struct ClusterClient<E> {
    config: ClusterConfig,
    builder: CommandBuilder,
    classifier: ResponseClassifier,
    executor: E,
}

impl<E: RemoteExecutor> ClusterClient<E> {
    /// Fails if the configured version has no supported tool.
    pub fn new(config: ClusterConfig, executor: E) -> Result<Self, BuildError> {
        let builder = config.command_builder()?;
        Ok(Self {
            config,
            builder,
            classifier: ResponseClassifier::default(),
            executor,
        })
    }

    /// Replaces the default classification table.
    pub fn with_classifier(mut self, classifier: ResponseClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Runs `op` on `target` and returns the classified reply.
    ///
    /// Transport failures surface before the reply is looked at.
    pub fn run(&self, target: &NodeTarget, op: &Operation) -> Result<String, TopologyError> {
        let argv = self.builder.build(op, self.config.mode);
        debug!(node = %target, op = op.name(), "running command");

        let raw = self.executor.execute(target, &argv)?;
        self.classifier.classify(&raw).map_err(|e| {
            warn!(node = %target, op = op.name(), kind = %e.kind, "error reply: {}", e.raw);
            TopologyError::from(e)
        })
    }

    /// Where data commands go: the standalone instance, or shard 0
    /// replica 0 of a cluster.
    fn primary(&self) -> NodeTarget {
        self.config.target(0, 0)
    }

    pub fn ping(&self) -> Result<String, TopologyError> {
        self.run(&self.primary(), &Operation::Ping)
    }

    pub fn set_item(&self, key: &str, value: &str) -> Result<String, TopologyError> {
        let op = Operation::Set {
            key: key.into(),
            value: value.into(),
        };
        self.run(&self.primary(), &op)
    }

    pub fn get_item(&self, key: &str) -> Result<String, TopologyError> {
        self.run(&self.primary(), &Operation::Get { key: key.into() })
    }

    pub fn delete_item(&self, key: &str) -> Result<String, TopologyError> {
        self.run(&self.primary(), &Operation::Del { key: key.into() })
    }

    /// RANDOMKEY on replica 0 of `shard`. Standalone databases ignore
    /// the shard.
    pub fn random_key(&self, shard: usize) -> Result<String, TopologyError> {
        self.run(&self.config.target(shard, 0), &Operation::RandomKey)
    }

    /// DBSIZE of one member.
    pub fn db_size(&self, target: &NodeTarget) -> Result<i64, TopologyError> {
        let reply = self.run(target, &Operation::DbSize)?;
        Ok(parse_integer("dbsize", &reply)?)
    }

    /// DBSIZE summed over every member, replicas included.
    pub fn db_size_total(&self) -> Result<i64, TopologyError> {
        let mut total = 0;
        for target in self.config.targets() {
            total += self.db_size(&target)?;
        }
        Ok(total)
    }

    /// CONFIG GET on the primary, as (name, value) pairs.
    pub fn config_get(&self, param: &str) -> Result<Vec<(String, String)>, TopologyError> {
        let op = Operation::ConfigGet {
            param: param.into(),
        };
        let reply = self.run(&self.primary(), &op)?;
        Ok(parse_config_get(&reply)?)
    }

    pub fn flush_db(&self, target: &NodeTarget) -> Result<String, TopologyError> {
        self.run(target, &Operation::FlushDb)
    }

    /// Flushes every member currently holding the master role.
    ///
    /// Replicas reject writes, so the roles are read first.
    pub fn flush_masters(&self) -> Result<(), TopologyError> {
        if self.config.mode == AddressingMode::Standalone {
            self.flush_db(&self.primary())?;
            return Ok(());
        }
        let topology = self.shard_topology()?;
        for (i, j, node) in topology.nodes() {
            if node.is_master() {
                self.flush_db(&self.config.target(i, j))?;
            }
        }
        Ok(())
    }

    pub fn cluster_info(&self) -> Result<ClusterInfo, TopologyError> {
        let reply = self.run(&self.primary(), &Operation::ClusterInfo)?;
        Ok(parse_cluster_info(&reply)?)
    }

    /// Every node as seen by `target`.
    pub fn cluster_nodes(&self, target: &NodeTarget) -> Result<Vec<Node>, TopologyError> {
        let reply = self.run(target, &Operation::ClusterNodes)?;
        Ok(parse_cluster_nodes(&reply)?)
    }

    /// `target`'s view of itself.
    pub fn myself(&self, target: &NodeTarget) -> Result<Node, TopologyError> {
        let reply = self.run(target, &Operation::ClusterNodes)?;
        Ok(parse_myself(&reply)?)
    }

    /// Member targets laid out as shard rows.
    pub fn shard_targets(&self) -> Vec<Vec<NodeTarget>> {
        let shape = self.config.shape;
        (0..shape.masters)
            .map(|i| {
                (0..shape.row_len())
                    .map(|j| self.config.target(i, j))
                    .collect()
            })
            .collect()
    }

    /// Wraps rows of self-views into a snapshot using the configured port.
    pub fn assemble(&self, rows: Vec<Vec<Node>>) -> ShardTopology {
        ShardTopology::new(rows).with_data_port(self.config.data_port)
    }

    /// Queries every member in turn and builds a snapshot.
    pub fn shard_topology(&self) -> Result<ShardTopology, TopologyError> {
        let rows = self
            .shard_targets()
            .iter()
            .map(|row| row.iter().map(|t| self.myself(t)).collect::<Result<Vec<_>, _>>())
            .collect::<Result<Vec<Vec<Node>>, _>>()?;
        Ok(self.assemble(rows))
    }

    pub fn cluster_slots(&self) -> Result<Vec<ClusterSlot>, TopologyError> {
        let reply = self.run(&self.primary(), &Operation::ClusterSlots)?;
        Ok(parse_cluster_slots(&reply)?)
    }

    pub fn save_config(&self) -> Result<String, TopologyError> {
        self.run(&self.primary(), &Operation::ClusterSaveConfig)
    }

    pub fn count_keys_in_slot(&self, slot: u16) -> Result<i64, TopologyError> {
        let reply = self.run(&self.primary(), &Operation::ClusterCountKeysInSlot { slot })?;
        Ok(parse_integer("countkeysinslot", &reply)?)
    }

    pub fn count_failure_reports(&self, node_id: &NodeId) -> Result<i64, TopologyError> {
        let op = Operation::ClusterCountFailureReports {
            node_id: node_id.clone(),
        };
        let reply = self.run(&self.primary(), &op)?;
        Ok(parse_integer("count-failure-reports", &reply)?)
    }

    pub fn cluster_slaves(&self, node_id: &NodeId) -> Result<Vec<Node>, TopologyError> {
        let op = Operation::ClusterSlaves {
            node_id: node_id.clone(),
        };
        let reply = self.run(&self.primary(), &op)?;
        Ok(parse_cluster_slaves(&reply)?)
    }

    /// CLUSTER FAILOVER on `target`, which must be a replica.
    pub fn failover(&self, target: &NodeTarget) -> Result<String, TopologyError> {
        self.run(target, &Operation::ClusterFailover)
    }
}
