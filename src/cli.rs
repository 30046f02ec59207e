// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::types::RunId;

/// Command-line arguments for `vectorfarm`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vectorfarm",
    version,
    about = "Schedule versioned pipeline components across remote workers.",
    long_about = None
)]
pub struct CliArgs {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `VECTORFARM_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Plan a run, serve workers, and exit once every plan is terminal.
    Run(RunArgs),
    /// Connect to a coordinator and execute jobs.
    Worker(WorkerArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Path to the pipeline file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: PathBuf,

    #[arg(long, value_name = "N")]
    pub run_id: RunId,

    /// Target to plan; repeat for several targets.
    #[arg(long = "target", value_name = "T", required = true)]
    pub targets: Vec<String>,

    /// Restrict the run to these nodes (`factory.component`) and their
    /// dependents.
    #[arg(long = "node", value_name = "F.C")]
    pub nodes: Vec<String>,

    /// Recompute nodes even when their persisted version is current.
    #[arg(long)]
    pub force: bool,

    /// Parse + validate, print the graph, but don't execute anything.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Args)]
pub struct WorkerArgs {
    #[arg(long, value_name = "HOST", default_value = "127.0.0.1")]
    pub hostname: String,

    #[arg(long, value_name = "PORT", default_value_t = 8081)]
    pub port: u16,

    /// Must match the coordinator's `[config].incarnation`.
    #[arg(long, value_name = "N")]
    pub incarnation: u64,

    /// Number of jobs run concurrently.
    #[arg(long, value_name = "K", default_value_t = 1)]
    pub pool_size: usize,

    /// Process-size hint announced on registration.
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub ps_hint: u32,

    /// Seconds between status messages for a running job.
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub status_interval: u64,

    /// Register as a cloud-provisioned worker.
    #[arg(long)]
    pub cloud: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_accepts_repeated_targets_and_nodes() {
        let args = CliArgs::try_parse_from([
            "vectorfarm",
            "run",
            "--run-id",
            "5",
            "--target",
            "HD209458b",
            "--target",
            "WASP-12b",
            "--node",
            "transit.whitelight",
            "--force",
        ])
        .unwrap();
        let Command::Run(run) = args.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(run.run_id, 5);
        assert_eq!(run.targets, vec!["HD209458b", "WASP-12b"]);
        assert_eq!(run.nodes, vec!["transit.whitelight"]);
        assert!(run.force);
        assert_eq!(run.config, PathBuf::from("Pipeline.toml"));
    }

    #[test]
    fn worker_requires_incarnation() {
        assert!(CliArgs::try_parse_from(["vectorfarm", "worker", "--port", "9000"]).is_err());
        let args = CliArgs::try_parse_from([
            "vectorfarm",
            "worker",
            "--incarnation",
            "3",
            "--pool-size",
            "2",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        let Command::Worker(worker) = args.command else {
            panic!("expected worker subcommand");
        };
        assert_eq!(worker.pool_size, 2);
        assert_eq!(worker.port, 8081);
    }
}
