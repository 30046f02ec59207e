// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod storage;
pub mod tasklock;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, RunArgs, WorkerArgs};
use crate::config::loader::load_and_validate;
use crate::config::model::PipelineConfig;
use crate::dag::{AbortScope, PlanOutcome, Scheduler};
use crate::engine::{CoreRuntime, RunReport, RunRequest, Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::{CommandRunner, CoordinatorHandle, CoordinatorOptions, RemoteExecutorBackend, WorkerOptions};
use crate::fs::RealFileSystem;
use crate::storage::{FileStorage, InMemoryStorage, Storage};
use crate::types::{NodeId, StorageKind};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    match args.command {
        Command::Run(run_args) => {
            let Some(report) = run_pipeline(&run_args).await? else {
                return Ok(());
            };
            print_summary(&report);
            if !report.succeeded() {
                let failed = report
                    .plans
                    .iter()
                    .filter(|p| p.outcome == PlanOutcome::Failed)
                    .count();
                bail!("{failed} plan(s) did not succeed");
            }
            Ok(())
        }
        Command::Worker(worker_args) => run_worker(worker_args).await,
    }
}

/// Load the pipeline, serve workers, and drive one run request to
/// completion. Returns `None` for `--dry-run`.
///
/// This wires together:
/// - config loading
/// - storage
/// - scheduler / queue / runtime
/// - the worker coordinator
/// - Ctrl-C handling
pub async fn run_pipeline(args: &RunArgs) -> Result<Option<RunReport>> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading pipeline {}", args.config.display()))?;
    let nodes = resolve_nodes(&cfg, &args.nodes)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(None);
    }

    let storage = open_storage(&cfg, &config_root_dir(&args.config))?;
    let scheduler = Scheduler::new(Arc::clone(&cfg.graph), cfg.config.incarnation);

    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let coordinator = CoordinatorHandle::new(
        CoordinatorOptions {
            incarnation: cfg.config.incarnation,
            job_timeout: Duration::from_secs(cfg.config.job_timeout_secs),
        },
        rt_tx.clone(),
    );
    let listener = TcpListener::bind((cfg.config.listen.as_str(), cfg.config.port))
        .await
        .with_context(|| format!("binding coordinator to {}:{}", cfg.config.listen, cfg.config.port))?;
    {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.serve(listener).await {
                warn!(error = %e, "coordinator stopped");
            }
        });
    }

    spawn_ctrl_c_handler(rt_tx.clone());

    rt_tx
        .send(RuntimeEvent::RunRequested(RunRequest {
            run_id: args.run_id,
            targets: args.targets.clone(),
            nodes,
            force: args.force,
        }))
        .await?;

    let options = RuntimeOptions {
        exit_when_idle: true,
        pool_size: cfg.config.pool_size,
    };

    // Construct the pure core runtime (single source of truth for semantics).
    let core = CoreRuntime::new(
        scheduler,
        storage,
        cfg.revision.clone(),
        cfg.config.resubmit_behaviour,
        cfg.config.queue_length,
        options,
    );

    // Construct the async IO shell around the core.
    let runtime = Runtime::new(core, rt_rx, RemoteExecutorBackend::new(coordinator.clone()));
    let report = runtime.run().await;
    coordinator.shutdown();
    Ok(Some(report?))
}

/// Connect `pool_size` slots to the coordinator and run jobs until Ctrl-C
/// or until the coordinator closes the connections.
pub async fn run_worker(args: WorkerArgs) -> Result<()> {
    let options = WorkerOptions {
        hostname: args.hostname,
        port: args.port,
        incarnation: args.incarnation,
        pool_size: args.pool_size,
        ps_hint: args.ps_hint,
        status_interval: Duration::from_secs(args.status_interval.max(1)),
        cloud: args.cloud,
        max_jobs: None,
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; stopping worker");
            cancel.cancel();
        });
    }

    exec::run_worker(options, Arc::new(CommandRunner::new()), cancel).await?;
    Ok(())
}

/// First Ctrl-C aborts all work; the second stops immediately.
fn spawn_ctrl_c_handler(tx: mpsc::Sender<RuntimeEvent>) {
    tokio::spawn(async move {
        let mut presses = 0;
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            presses += 1;
            let event = if presses == 1 {
                info!("Ctrl+C received; aborting all work (press again to exit now)");
                RuntimeEvent::AbortRequested(AbortScope::All)
            } else {
                info!("second Ctrl+C; shutting down");
                RuntimeEvent::ShutdownRequested
            };
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });
}

fn resolve_nodes(cfg: &PipelineConfig, names: &[String]) -> Result<Option<Vec<NodeId>>> {
    if names.is_empty() {
        return Ok(None);
    }
    names
        .iter()
        .map(|name| match cfg.graph.find(name) {
            Some(id) => Ok(id.clone()),
            None => bail!("--node {name}: no such component in the pipeline"),
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn open_storage(cfg: &PipelineConfig, root_dir: &Path) -> Result<Arc<dyn Storage>> {
    match cfg.storage.kind {
        StorageKind::Memory => {
            warn!("using in-memory storage; results are lost on exit");
            Ok(Arc::new(InMemoryStorage::new()))
        }
        StorageKind::File => {
            let root = if cfg.storage.path.is_absolute() {
                cfg.storage.path.clone()
            } else {
                root_dir.join(&cfg.storage.path)
            };
            let storage = FileStorage::open(RealFileSystem, &root)
                .with_context(|| format!("opening storage at {}", root.display()))?;
            Ok(Arc::new(storage))
        }
    }
}

/// Directory relative storage paths are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "pipelines/Pipeline.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Pipeline.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn print_summary(report: &RunReport) {
    for plan in &report.plans {
        println!(
            "{}: {:?} (succeeded {}, skipped {}, failed {}, aborted {})",
            plan.key,
            plan.outcome,
            plan.succeeded.len(),
            plan.skipped.len(),
            plan.failed.len(),
            plan.aborted.len()
        );
        for (node, reason) in &plan.failed {
            println!("  failed {node}: {reason}");
        }
    }
}

/// Simple dry-run output: settings, then every node in topological order
/// with its command and producers.
fn print_dry_run(cfg: &PipelineConfig) {
    println!("vectorfarm dry-run");
    println!("  revision = {}", cfg.revision);
    println!("  listen = {}:{}", cfg.config.listen, cfg.config.port);
    println!("  incarnation = {}", cfg.config.incarnation);
    println!("  pool_size = {}", cfg.config.pool_size);
    println!(
        "  resubmit_behaviour = {:?} (queue_length {})",
        cfg.config.resubmit_behaviour, cfg.config.queue_length
    );
    println!("  storage = {:?} at {}", cfg.storage.kind, cfg.storage.path.display());
    println!();

    let graph = &cfg.graph;
    println!("nodes ({}):", graph.len());
    for id in graph.topological_order() {
        println!("  - {id} [{}]", id.kind);
        if let Some(node) = graph.node(id) {
            println!("      version: {}", node.spec.version);
            println!("      cmd: {}", node.spec.cmd);
            if !node.inputs.is_empty() {
                println!("      inputs: {}", node.inputs.len());
            }
        }
        let deps = graph.dependencies_of(id);
        if !deps.is_empty() {
            let names: Vec<String> = deps.iter().map(NodeId::to_string).collect();
            println!("      after: {}", names.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
}
