//! slotwatch: topology checks for Redis-style clusters.
//!
//! Runs `redis-cli` (or `redis-trib` for 4.x) on cluster members through a
//! launcher such as `kubectl exec`, parses the introspection replies and
//! checks them against the expected shape.

mod cluster;
mod error;
mod executor;
mod format;
mod wait;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use slotwatch_cluster::ClusterConfig;

use crate::cluster::Command;
use crate::format::OutputFormat;

/// Topology checks for Redis-style clusters.
#[derive(Debug, Parser)]
#[command(name = "slotwatch", about)]
struct Args {
    /// path to TOML configuration file
    #[arg(short = 'c', long, global = true, env = "SLOTWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// database name; members are named <name>-shard<i>-<j>
    #[arg(long, global = true, env = "SLOTWATCH_NAME")]
    name: Option<String>,

    /// server version, e.g. 6.0.6. selects redis-trib for 4.x
    #[arg(long, global = true, env = "SLOTWATCH_VERSION")]
    version: Option<String>,

    /// pass the TLS client certificate flags to every command
    #[arg(long, global = true, env = "SLOTWATCH_TLS")]
    tls: bool,

    /// expected number of masters
    #[arg(long, global = true, env = "SLOTWATCH_MASTERS")]
    masters: Option<usize>,

    /// expected number of replicas per master
    #[arg(long, global = true, env = "SLOTWATCH_REPLICAS")]
    replicas: Option<usize>,

    /// report format
    #[arg(
        long,
        global = true,
        value_enum,
        env = "SLOTWATCH_OUTPUT",
        default_value_t = OutputFormat::Text
    )]
    output: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

/// Applies flag and env overrides on top of the file config.
fn apply_args(cfg: &mut ClusterConfig, args: &Args) {
    if let Some(ref name) = args.name {
        cfg.name = name.clone();
    }
    if let Some(ref version) = args.version {
        cfg.version = version.clone();
    }
    if args.tls {
        cfg.tls = true;
    }
    if let Some(masters) = args.masters {
        cfg.shape.masters = masters;
    }
    if let Some(replicas) = args.replicas {
        cfg.shape.replicas = replicas;
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotwatch=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // config-template: dump defaults without reading anything
    if let Command::ConfigTemplate = args.command {
        return match ClusterConfig::default().to_toml() {
            Ok(toml) => {
                println!("{toml}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", format!("failed to generate config template: {e}").red());
                ExitCode::FAILURE
            }
        };
    }

    // defaults → TOML file → CLI/env overrides
    let mut cfg = match &args.config {
        Some(path) => match ClusterConfig::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{}", format!("error: {e}").red());
                return ExitCode::FAILURE;
            }
        },
        None => ClusterConfig::default(),
    };
    apply_args(&mut cfg, &args);

    if let Err(e) = cfg.validate() {
        eprintln!("{}", format!("error: {e}").red());
        return ExitCode::FAILURE;
    }

    cluster::run(&args.command, cfg, args.output)
}
