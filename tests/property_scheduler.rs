// tests/property_scheduler.rs

mod common;

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use proptest::prelude::*;

use vectorfarm::config::PipelineConfig;
use vectorfarm::dag::{PlanOutcome, PlanReport, PlanRequest, ScheduledJob, Scheduler};
use vectorfarm::engine::JobOutcome;
use vectorfarm::types::{NodeId, PlanKey};
use vectorfarm_test_utils::builders::{ComponentBuilder, PipelineBuilder};

/// Node `i` may only depend on nodes with a lower index, so every generated
/// pipeline is acyclic.
fn pipeline(deps: &[BTreeSet<usize>]) -> PipelineConfig {
    let mut builder = PipelineBuilder::new();
    for (i, producers) in deps.iter().enumerate() {
        let mut component = ComponentBuilder::new("c").output("r", "v");
        for p in producers {
            component = component.depends(&format!("n{p}.c"));
        }
        builder = builder.task(&format!("n{i}"), component);
    }
    builder.build()
}

fn dag_strategy() -> impl Strategy<Value = Vec<BTreeSet<usize>>> {
    (1usize..9).prop_flat_map(|n| {
        (0..n)
            .map(|i| {
                if i == 0 {
                    Just(BTreeSet::new()).boxed()
                } else {
                    proptest::collection::btree_set(0..i, 0..=i.min(3)).boxed()
                }
            })
            .collect::<Vec<_>>()
    })
}

struct Drive {
    dispatched: Vec<NodeId>,
    report: PlanReport,
}

/// Run one plan to completion, failing every job whose node index is in
/// `failing`.
fn drive(cfg: &PipelineConfig, failing: &HashSet<usize>) -> Drive {
    let graph = Arc::clone(&cfg.graph);
    let mut scheduler = Scheduler::new(Arc::clone(&graph), 1);
    let key = PlanKey::new(1, "T");

    let mut ready: VecDeque<ScheduledJob> = VecDeque::new();
    let mut reports = Vec::new();
    let mut dispatched = Vec::new();
    let mut succeeded: HashSet<NodeId> = HashSet::new();

    let step = scheduler.start_plan(PlanRequest::new(key));
    ready.extend(step.newly_ready);
    reports.extend(step.finished_plans);

    while let Some(job) = ready.pop_front() {
        let node = job.label.node.clone();
        for producer in graph.dependencies_of(&node) {
            assert!(
                succeeded.contains(&producer),
                "{node} dispatched before {producer} succeeded"
            );
        }
        assert!(scheduler.mark_dispatched(job.id));
        dispatched.push(node.clone());

        let index: usize = node.factory[1..].parse().unwrap();
        let outcome = if failing.contains(&index) {
            JobOutcome::Failed("boom".to_string())
        } else {
            succeeded.insert(node);
            JobOutcome::Success
        };
        let step = scheduler.step_completion(job.id, outcome);
        ready.extend(step.newly_ready);
        reports.extend(step.finished_plans);
    }

    assert!(scheduler.is_idle());
    assert_eq!(reports.len(), 1, "exactly one report per plan");
    Drive {
        dispatched,
        report: reports.remove(0),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_node_lands_in_exactly_one_bucket(
        deps in dag_strategy(),
        failing in proptest::collection::hash_set(0usize..9, 0..3),
    ) {
        let cfg = pipeline(&deps);
        let Drive { dispatched, report } = drive(&cfg, &failing);

        let mut seen = HashSet::new();
        let buckets = report
            .succeeded
            .iter()
            .chain(&report.skipped)
            .chain(report.failed.iter().map(|(n, _)| n))
            .chain(&report.aborted);
        for node in buckets {
            prop_assert!(seen.insert(node.clone()), "{} reported twice", node);
        }
        prop_assert_eq!(seen.len(), cfg.graph.len());

        // Nothing is persisted, so nothing can be skipped or run twice.
        prop_assert!(report.skipped.is_empty());
        let unique: HashSet<_> = dispatched.iter().collect();
        prop_assert_eq!(unique.len(), dispatched.len());

        let any_failed = dispatched
            .iter()
            .any(|n| failing.contains(&n.factory[1..].parse::<usize>().unwrap()));
        prop_assert_eq!(report.outcome == PlanOutcome::Failed, any_failed);
    }

    #[test]
    fn dependents_of_a_failed_node_never_run(deps in dag_strategy(), seed in 0usize..9) {
        let cfg = pipeline(&deps);
        let failing_index = seed % deps.len();
        let failing: HashSet<usize> = [failing_index].into_iter().collect();
        let Drive { dispatched, report } = drive(&cfg, &failing);

        let failed_node = cfg.graph.find(&format!("n{failing_index}.c")).unwrap().clone();
        let mut downstream = HashSet::new();
        let mut stack = cfg.graph.dependents_of(&failed_node);
        while let Some(id) = stack.pop() {
            if downstream.insert(id.clone()) {
                stack.extend(cfg.graph.dependents_of(&id));
            }
        }

        for node in &dispatched {
            prop_assert!(!downstream.contains(node), "{} ran after its upstream failed", node);
        }
        let failed: HashSet<_> = report.failed.iter().map(|(n, _)| n.clone()).collect();
        prop_assert!(failed.contains(&failed_node));
        prop_assert!(downstream.is_subset(&failed));
    }
}
