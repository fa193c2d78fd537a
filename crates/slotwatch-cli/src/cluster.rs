//! Cluster subcommands.
//!
//! `slots`, `nodes` and `info` print one introspection reply. `check`
//! combines them into a health report. `wait` and `failover` are
//! multi-step orchestrations built on the polling loop in [`crate::wait`].

use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use slotwatch_cluster::{
    check_coverage, check_slot_shape, diff_topology, format_ranges, probe_shards, probe_slots,
    verify_failover, AddressingMode, ClusterClient, ClusterConfig, ClusterInfo, ClusterSlot,
    ConfigError, Convergence, ExpectedShape, Node, RemoteExecutor, ShardTopology, SlotCoverage,
    SlotRange, TopologyError, VerificationError, OK,
};
use tracing::info;

use crate::error::CliError;
use crate::executor::ProcessExecutor;
use crate::format::{
    emit, render_check, render_failover, render_info, render_nodes, render_slots, CheckReport,
    FailoverReport, OutputFormat,
};
use crate::wait::{blocking, immediate, snapshot, wait_until_converged};

/// Cluster inspection and orchestration actions.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the slot map (CLUSTER SLOTS).
    Slots,

    /// List every node as seen by shard 0 (CLUSTER NODES).
    Nodes,

    /// Show cluster state and counters (CLUSTER INFO).
    Info,

    /// Check slot coverage, shape and node health once.
    Check,

    /// Poll until the cluster matches the configured shape.
    Wait {
        /// Also query every member and check shard membership.
        #[arg(long)]
        shards: bool,

        /// Skip the settling delay before the first probe.
        #[arg(long)]
        no_settle: bool,
    },

    /// Promote the first replica of a shard and verify the result.
    Failover {
        /// Shard index, starting at 0.
        #[arg(long)]
        shard: usize,
    },

    /// Print the default configuration as TOML and exit.
    ConfigTemplate,
}

/// Runs `cmd` against the configured cluster through `kubectl`-style
/// process execution.
pub fn run(cmd: &Command, config: ClusterConfig, output: OutputFormat) -> ExitCode {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}", format!("failed to create runtime: {e}").red());
            return ExitCode::FAILURE;
        }
    };

    let executor = ProcessExecutor::new(config.executor.launcher.clone());
    let outcome = rt.block_on(async {
        let client = Arc::new(ClusterClient::new(config, executor)?);
        dispatch(cmd, &client, output).await
    });

    match outcome {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("error: {e}").red());
            ExitCode::FAILURE
        }
    }
}

/// Runs one subcommand on an already built client.
pub async fn dispatch<E>(
    cmd: &Command,
    client: &Arc<ClusterClient<E>>,
    output: OutputFormat,
) -> Result<ExitCode, CliError>
where
    E: RemoteExecutor + 'static,
{
    let needs_cluster = !matches!(cmd, Command::ConfigTemplate);
    if needs_cluster && client.config().mode != AddressingMode::Cluster {
        return Err(ConfigError::Invalid("cluster commands need mode = \"cluster\"".into()).into());
    }
    let port = client.config().data_port;

    match cmd {
        Command::Slots => {
            let slots = blocking(client, "CLUSTER SLOTS", |c| c.cluster_slots()).await?;
            emit(output, slots.as_slice(), render_slots)?;
        }
        Command::Nodes => {
            let primary = client.config().target(0, 0);
            let nodes = blocking(client, "CLUSTER NODES", move |c| c.cluster_nodes(&primary)).await?;
            emit(output, nodes.as_slice(), |n| render_nodes(n, port))?;
        }
        Command::Info => {
            let info = blocking(client, "CLUSTER INFO", |c| c.cluster_info()).await?;
            emit(output, &info, render_info)?;
        }
        Command::Check => return run_check(client, output).await,
        Command::Wait { shards, no_settle } => {
            let policy = if *no_settle {
                immediate(&client.config().retry)
            } else {
                client.config().retry
            };
            let attempts = wait_until_converged(&policy, || probe(client, *shards)).await?;
            emit(output, &WaitReport { attempts }, |r| {
                format!(
                    "  {} cluster converged after {} attempt(s)",
                    "✓".green(),
                    r.attempts
                )
            })?;
        }
        Command::Failover { shard } => {
            let report = run_failover(client, *shard).await?;
            emit(output, &report, render_failover)?;
        }
        Command::ConfigTemplate => println!("{}", ClusterConfig::default().to_toml()?),
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Serialize)]
struct WaitReport {
    attempts: u32,
}

/// One convergence probe: the slot map, then optionally every member.
async fn probe<E>(client: &Arc<ClusterClient<E>>, shards: bool) -> Result<Convergence, CliError>
where
    E: RemoteExecutor + 'static,
{
    let shape = client.config().shape;
    let slots = blocking(client, "CLUSTER SLOTS", |c| c.cluster_slots()).await?;
    let state = probe_slots(&slots, &shape);
    if !state.is_converged() || !shards {
        return Ok(state);
    }
    let topology = snapshot(client).await?;
    Ok(probe_shards(&topology, &shape))
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

async fn run_check<E>(
    client: &Arc<ClusterClient<E>>,
    output: OutputFormat,
) -> Result<ExitCode, CliError>
where
    E: RemoteExecutor + 'static,
{
    let primary = client.config().target(0, 0);
    let target = primary.to_string();
    let info = blocking(client, "CLUSTER INFO", |c| c.cluster_info()).await?;
    let nodes = blocking(client, "CLUSTER NODES", move |c| c.cluster_nodes(&primary)).await?;
    let slots = blocking(client, "CLUSTER SLOTS", |c| c.cluster_slots()).await?;

    let report = check_report(target, &info, &nodes, &slots, &client.config().shape);
    emit(output, &report, render_check)?;
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Combines the three introspection replies into one report.
///
/// Errors are failed nodes, a non-ok cluster state and any slot-map
/// mismatch. Suspected failures and nodes still handshaking are
/// warnings.
pub fn check_report(
    target: String,
    info: &ClusterInfo,
    nodes: &[Node],
    slots: &[ClusterSlot],
    shape: &ExpectedShape,
) -> CheckReport {
    let ranges: Vec<SlotRange> = slots.iter().map(ClusterSlot::range).collect();
    let coverage = SlotCoverage::from_ranges(&ranges);

    let mut report = CheckReport {
        target,
        state: info.state.clone().unwrap_or_else(|| "unknown".into()),
        nodes: nodes.len(),
        masters: nodes.iter().filter(|n| n.is_master()).count(),
        covered: coverage.covered(),
        ..CheckReport::default()
    };

    if !info.is_ok() {
        report
            .errors
            .push(format!("cluster state is {}", report.state));
    }

    for node in nodes {
        if node.flags.fail {
            report.errors.push(format!(
                "node {} ({}) is in FAIL state",
                node.id, node.host
            ));
        } else if node.flags.pfail {
            report.warnings.push(format!(
                "node {} ({}) is in PFAIL state (possible failure)",
                node.id, node.host
            ));
        }
        if node.flags.handshake {
            report
                .warnings
                .push(format!("node {} ({}) is still handshaking", node.id, node.host));
        }
    }

    let gaps = coverage.gaps();
    if !gaps.is_empty() {
        let missing: u32 = gaps.iter().map(SlotRange::len).sum();
        report.errors.push(format!(
            "{missing} slots not covered: {}",
            format_ranges(&gaps)
        ));
    }
    if let Err(e) = check_coverage(slots) {
        if coverage.gaps().is_empty() {
            report.errors.push(e.to_string());
        }
    }
    if let Err(e) = check_slot_shape(slots, shape) {
        if !matches!(e, VerificationError::Coverage { .. }) {
            report.errors.push(e.to_string());
        }
    }

    if nodes.len() != shape.node_count() {
        report.warnings.push(format!(
            "expected {} nodes, {} known",
            shape.node_count(),
            nodes.len()
        ));
    }
    report
}

// ---------------------------------------------------------------------------
// failover
// ---------------------------------------------------------------------------

/// Fails over `shard` and checks that exactly that shard changed master.
///
/// Steps:
/// 1. Snapshot every member
/// 2. CLUSTER FAILOVER on the first slave of the shard's master
/// 3. Poll until the slot map and every member show the new master
async fn run_failover<E>(
    client: &Arc<ClusterClient<E>>,
    shard: usize,
) -> Result<FailoverReport, CliError>
where
    E: RemoteExecutor + 'static,
{
    let before = snapshot(client).await?;
    let master = before.master_of(shard).map_err(TopologyError::from)?;
    let replica = before
        .shard(shard)
        .unwrap_or_default()
        .iter()
        .position(|n| n.replica_of() == Some(&master.id))
        .ok_or_else(|| {
            TopologyError::from(VerificationError::InvalidFailover {
                shard,
                detail: format!("master {} has no slave in the shard", master.id),
            })
        })?;

    let target = client.config().target(shard, replica);
    info!(%target, master = %master.id, "requesting failover");
    let label = target.to_string();
    let reply = blocking(client, &label, move |c| c.failover(&target)).await?;
    if reply != OK {
        return Err(CliError::UnexpectedReply {
            command: "CLUSTER FAILOVER".into(),
            reply,
        });
    }

    let observed = Mutex::new(None);
    let attempts = wait_until_converged(&client.config().retry, || {
        failover_probe(client, &before, shard, &observed)
    })
    .await?;
    let after = match observed.into_inner().unwrap_or_else(PoisonError::into_inner) {
        Some(after) => after,
        None => snapshot(client).await?,
    };
    let outcome = verify_failover(&before, &after, shard).map_err(TopologyError::from)?;
    info!(promoted = %outcome.promoted, shard, "failover verified");

    Ok(FailoverReport {
        outcome,
        attempts,
        diff: diff_topology(&before, &after),
    })
}

/// One failover probe: slot map, then member shape, then the role swap.
///
/// A promotion that is not visible yet is pending, not fatal. The
/// snapshot that passed is left in `observed`.
async fn failover_probe<E>(
    client: &Arc<ClusterClient<E>>,
    before: &ShardTopology,
    shard: usize,
    observed: &Mutex<Option<ShardTopology>>,
) -> Result<Convergence, CliError>
where
    E: RemoteExecutor + 'static,
{
    let shape = client.config().shape;
    let slots = blocking(client, "CLUSTER SLOTS", |c| c.cluster_slots()).await?;
    let state = probe_slots(&slots, &shape);
    if !state.is_converged() {
        return Ok(state);
    }
    let after = snapshot(client).await?;
    let state = probe_shards(&after, &shape);
    if !state.is_converged() {
        return Ok(state);
    }
    match verify_failover(before, &after, shard) {
        Ok(_) => {
            *observed.lock().unwrap_or_else(PoisonError::into_inner) = Some(after);
            Ok(Convergence::Converged)
        }
        Err(e) => Ok(Convergence::Pending(e)),
    }
}
