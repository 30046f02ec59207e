// tests/runtime_fake_executor.rs

mod common;
use crate::common::{TARGET, chain_pipeline, core_for, init_tracing, persist_node, task_node, with_timeout};

use std::error::Error;
use std::sync::Arc;

use tokio::sync::mpsc;

use vectorfarm::dag::{AbortScope, PlanOutcome};
use vectorfarm::engine::{RunRequest, Runtime, RuntimeEvent};
use vectorfarm::model::NamePath;
use vectorfarm::storage::{InMemoryStorage, Storage};
use vectorfarm_test_utils::fake_executor::{FakeExecutor, Scripted};

type TestResult = Result<(), Box<dyn Error>>;

fn run_request(targets: &[&str]) -> RuntimeEvent {
    RuntimeEvent::RunRequested(RunRequest {
        run_id: 5,
        targets: targets.iter().map(|t| t.to_string()).collect(),
        nodes: None,
        force: false,
    })
}

#[tokio::test]
async fn stale_root_runs_and_current_dependents_skip() -> TestResult {
    init_tracing();

    let cfg = chain_pipeline();
    let storage = Arc::new(InMemoryStorage::new());
    persist_node(&storage, 5, TARGET, "t2");
    persist_node(&storage, 5, TARGET, "t3");

    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::new(tx.clone());
    let log = executor.log();
    let runtime = Runtime::new(core_for(&cfg, Arc::clone(&storage), 4), rx, executor);

    tx.send(run_request(&[TARGET])).await?;
    let report = with_timeout(runtime.run()).await?;

    assert_eq!(log.dispatched_nodes(), vec!["t1.fit"]);
    assert_eq!(report.plans.len(), 1);
    let plan = &report.plans[0];
    assert_eq!(plan.outcome, PlanOutcome::Succeeded);
    assert_eq!(plan.succeeded, vec![task_node("t1")]);
    assert_eq!(plan.skipped, vec![task_node("t2"), task_node("t3")]);
    assert!(report.succeeded());

    // The dispatched node's value and record were persisted.
    let value = NamePath::value(5, &task_node("t1"), "result", "depth")?;
    let (_, data) = storage.get(TARGET, &value)?;
    assert_eq!(data, b"1");
    assert!(storage.get_version(TARGET, &NamePath::node(5, &task_node("t1")))?.is_some());

    // A compute and a persist lock for the dispatched job, all released.
    let actions: Vec<_> = report.locks.entries().iter().map(|l| l.action.as_str()).collect();
    assert_eq!(actions, vec!["compute", "persist"]);
    assert!(report.locks.busy().next().is_none());
    Ok(())
}

#[tokio::test]
async fn failure_stops_the_chain() -> TestResult {
    init_tracing();

    let cfg = chain_pipeline();
    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::new(tx.clone()).with("t1.fit", Scripted::Fail("exit code 2".to_string()));
    let log = executor.log();
    let runtime = Runtime::new(core_for(&cfg, Arc::new(InMemoryStorage::new()), 4), rx, executor);

    tx.send(run_request(&[TARGET])).await?;
    let report = with_timeout(runtime.run()).await?;

    assert_eq!(log.dispatched_nodes(), vec!["t1.fit"]);
    let plan = &report.plans[0];
    assert_eq!(plan.outcome, PlanOutcome::Failed);
    let failed: Vec<_> = plan.failed.iter().map(|(n, _)| n.to_string()).collect();
    assert_eq!(failed, vec!["t1.fit", "t2.fit", "t3.fit"]);
    assert_eq!(plan.failed[0].1, "exit code 2");
    assert!(plan.failed[1].1.contains("upstream t1.fit"));
    assert!(!report.succeeded());
    Ok(())
}

#[tokio::test]
async fn abort_all_stops_running_and_pending_work() -> TestResult {
    init_tracing();

    let cfg = chain_pipeline();
    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::new(tx.clone()).with("t1.fit", Scripted::Hang);
    let log = executor.log();
    let runtime = Runtime::new(core_for(&cfg, Arc::new(InMemoryStorage::new()), 4), rx, executor);

    tx.send(run_request(&[TARGET])).await?;
    tx.send(RuntimeEvent::AbortRequested(AbortScope::All)).await?;
    let report = with_timeout(runtime.run()).await?;

    assert_eq!(log.dispatched_nodes(), vec!["t1.fit"]);
    assert_eq!(log.aborted_jobs().len(), 1);
    let plan = &report.plans[0];
    assert_eq!(plan.outcome, PlanOutcome::Failed);
    assert_eq!(plan.aborted, vec![task_node("t1"), task_node("t2"), task_node("t3")]);
    assert!(plan.failed.is_empty());
    Ok(())
}

#[tokio::test]
async fn each_target_gets_its_own_plan() -> TestResult {
    init_tracing();

    let cfg = chain_pipeline();
    let storage = Arc::new(InMemoryStorage::new());
    for factory in ["t1", "t2", "t3"] {
        persist_node(&storage, 5, TARGET, factory);
    }

    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::new(tx.clone());
    let log = executor.log();
    let runtime = Runtime::new(core_for(&cfg, storage, 1), rx, executor);

    tx.send(run_request(&[TARGET, "WASP-12b"])).await?;
    let report = with_timeout(runtime.run()).await?;

    // Everything is current for HD209458b; WASP-12b computes the chain in
    // order even with a pool of one.
    assert_eq!(log.dispatched_nodes(), vec!["t1.fit", "t2.fit", "t3.fit"]);
    assert_eq!(report.plans.len(), 2);
    assert!(report.succeeded());
    let current = report.plans.iter().find(|p| p.key.target == TARGET).unwrap();
    assert_eq!(current.skipped.len(), 3);
    Ok(())
}

#[tokio::test]
async fn forced_partial_run_covers_dependents_only() -> TestResult {
    init_tracing();

    let cfg = chain_pipeline();
    let storage = Arc::new(InMemoryStorage::new());
    for factory in ["t1", "t2", "t3"] {
        persist_node(&storage, 5, TARGET, factory);
    }

    let (tx, rx) = mpsc::channel(16);
    let executor = FakeExecutor::new(tx.clone());
    let log = executor.log();
    let runtime = Runtime::new(core_for(&cfg, storage, 4), rx, executor);

    tx.send(RuntimeEvent::RunRequested(RunRequest {
        run_id: 5,
        targets: vec![TARGET.to_string()],
        nodes: Some(vec![task_node("t2")]),
        force: true,
    }))
    .await?;
    let report = with_timeout(runtime.run()).await?;

    assert_eq!(log.dispatched_nodes(), vec!["t2.fit", "t3.fit"]);
    assert_eq!(report.plans[0].succeeded, vec![task_node("t2"), task_node("t3")]);
    Ok(())
}
