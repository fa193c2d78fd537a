//! Human and machine output for CLI reports.
//!
//! Text output is colorized for terminals; `--output json` prints the
//! same data through serde.

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use slotwatch_cluster::{
    format_ranges, ClusterInfo, ClusterSlot, FailoverOutcome, Node, Role, TopologyDiff, SLOT_COUNT,
};

use crate::error::CliError;

/// How reports are printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Prints `value` as pretty JSON, or the text rendering otherwise.
pub fn emit<T, F>(format: OutputFormat, value: &T, text: F) -> Result<(), CliError>
where
    T: Serialize + ?Sized,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text(value)),
    }
    Ok(())
}

/// Drops ANSI escapes and control characters from remote text.
fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' {
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if c.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else if ch == '\t' || !ch.is_control() {
            out.push(ch);
        }
    }
    out
}

/// One line per range: slots, master address, then replica addresses.
pub fn render_slots(slots: &[ClusterSlot]) -> String {
    if slots.is_empty() {
        return "(no slots assigned)".dimmed().to_string();
    }
    let mut sorted: Vec<&ClusterSlot> = slots.iter().collect();
    sorted.sort_by_key(|s| s.start);

    let mut lines = Vec::with_capacity(sorted.len() + 1);
    for slot in sorted {
        let range = format!("{:>5}-{:<5}", slot.start, slot.end);
        let master = slot
            .master()
            .map(|m| sanitize(&m.addr).green().to_string())
            .unwrap_or_else(|| "(none)".red().to_string());
        let replicas: Vec<String> = slot.replicas().iter().map(|r| sanitize(&r.addr)).collect();
        let replicas = if replicas.is_empty() {
            String::new()
        } else {
            format!("  {} {}", "replicas:".dimmed(), replicas.join(" "))
        };
        lines.push(format!("{} {master}{replicas}", range.bold()));
    }
    let total: u32 = slots.iter().map(ClusterSlot::len).sum();
    lines.push(format!("{total}/{SLOT_COUNT} slots listed").dimmed().to_string());
    lines.join("\n")
}

/// CLUSTER NODES as a table; `port` is appended to each host.
pub fn render_nodes(nodes: &[Node], port: u16) -> String {
    if nodes.is_empty() {
        return "(no nodes)".dimmed().to_string();
    }
    let mut lines = Vec::with_capacity(nodes.len());
    for node in nodes {
        let addr = sanitize(&node.addr(port));
        let role = match &node.role {
            Role::Master { slots } => {
                let owned = if slots.is_empty() {
                    "no slots".to_string()
                } else {
                    format_ranges(slots)
                };
                format!("{} {owned}", "master".green())
            }
            Role::Slave { master } => format!("{} of {master}", "slave".cyan()),
        };
        let flags = node.flags.to_string();
        let flags = if node.flags.is_healthy() {
            flags.dimmed().to_string()
        } else {
            flags.red().to_string()
        };
        lines.push(format!("{} {addr:<22} {role}  {flags}", node.id));
    }
    lines.join("\n")
}

/// Key fields first, then the rest of CLUSTER INFO.
pub fn render_info(info: &ClusterInfo) -> String {
    let state = match info.state.as_deref() {
        Some("ok") => "ok".green().to_string(),
        Some(other) => sanitize(other).red().to_string(),
        None => "unknown".yellow().to_string(),
    };
    let mut lines = vec![format!("cluster state: {state}")];
    let mut known = |label: &str, value: Option<u32>| {
        if let Some(v) = value {
            lines.push(format!("{label}: {v}"));
        }
    };
    known("slots assigned", info.slots_assigned);
    known("slots ok", info.slots_ok);
    known("known nodes", info.known_nodes);
    known("size", info.size);

    let shown = [
        "cluster_state",
        "cluster_slots_assigned",
        "cluster_slots_ok",
        "cluster_known_nodes",
        "cluster_size",
    ];
    for (key, value) in &info.fields {
        if !shown.contains(&key.as_str()) {
            lines.push(format!("{}", format!("{key}: {}", sanitize(value)).dimmed()));
        }
    }
    lines.join("\n")
}

/// Result of a one-off health check.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub target: String,
    pub state: String,
    pub nodes: usize,
    pub masters: usize,
    pub covered: u32,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn render_check(report: &CheckReport) -> String {
    let mut lines = vec![
        "=== cluster check ===".bold().to_string(),
        format!("queried: {}", report.target),
    ];
    let state = if report.state == "ok" {
        report.state.green().to_string()
    } else {
        report.state.red().to_string()
    };
    lines.push(format!("cluster state: {state}"));
    lines.push(format!(
        "nodes: {} ({} masters)",
        report.nodes, report.masters
    ));
    lines.push(format!(
        "slot coverage: {}/{SLOT_COUNT} ({:.1}%)",
        report.covered,
        f64::from(report.covered) / f64::from(SLOT_COUNT) * 100.0
    ));

    if !report.warnings.is_empty() {
        lines.push(String::new());
        for w in &report.warnings {
            lines.push(format!("{} {w}", "[WARN]".yellow()));
        }
    }
    if !report.errors.is_empty() {
        lines.push(String::new());
        for e in &report.errors {
            lines.push(format!("{} {e}", "[ERR]".red()));
        }
    } else if report.warnings.is_empty() {
        lines.push(String::new());
        lines.push("all checks passed".green().to_string());
    }
    lines.join("\n")
}

/// What a completed failover did, for JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct FailoverReport {
    pub outcome: FailoverOutcome,
    pub attempts: u32,
    pub diff: TopologyDiff,
}

pub fn render_failover(report: &FailoverReport) -> String {
    let outcome = &report.outcome;
    let mut lines = vec![format!(
        "  {} shard {} converged after {} attempt(s)",
        "✓".green(),
        outcome.shard,
        report.attempts
    )];
    lines.push(format!("  promoted: {}", outcome.promoted.as_str().green()));
    match &outcome.demoted {
        Some(id) => lines.push(format!("  demoted:  {}", id.as_str().yellow())),
        None => lines.push(format!("  demoted:  {}", "(left the shard)".dimmed())),
    }
    for change in &report.diff.role_changes {
        lines.push(format!(
            "  {} {} {} -> {} (shard {})",
            "~".dimmed(),
            change.id,
            change.from,
            change.to,
            change.shard
        ));
    }
    lines.join("\n")
}
