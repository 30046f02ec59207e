// src/dag/scheduler.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::node_info::{
    AbortScope, NodeState, PlanOutcome, PlanReport, PlanRequest, PlanState, ScheduledJob,
};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::engine::JobOutcome;
use crate::types::{JobId, JobLabel, NodeId, PlanKey, Timing};

/// Scheduler holds the immutable graph plus one mutable plan per active
/// (run, target).
///
/// It is responsible for:
/// - deciding per node whether the persisted result is current or stale
/// - handing out job ids for ready nodes
/// - marking nodes dispatched, succeeded, failed or aborted
/// - failing dependents when a producer fails or is aborted
/// - reporting plans that reached a terminal outcome
///
/// All transitions go through `&mut self`; the owning core runtime
/// serializes them.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<DependencyGraph>,
    incarnation: u64,
    plans: BTreeMap<PlanKey, PlanState>,
    /// Jobs handed out and not yet terminal.
    jobs: HashMap<JobId, JobLabel>,
    next_job: u64,
}

impl Scheduler {
    pub fn new(graph: Arc<DependencyGraph>, incarnation: u64) -> Self {
        Self {
            graph,
            incarnation,
            plans: BTreeMap::new(),
            jobs: HashMap::new(),
            next_job: 0,
        }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation
    }

    /// Returns `true` if no plan is active.
    pub fn is_idle(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn is_active(&self, key: &PlanKey) -> bool {
        self.plans.contains_key(key)
    }

    pub fn active_plans(&self) -> impl Iterator<Item = &PlanKey> {
        self.plans.keys()
    }

    /// State of `node` in the active plan `key`, if both exist.
    pub fn node_state(&self, key: &PlanKey, node: &NodeId) -> Option<NodeState> {
        self.plans.get(key)?.records.get(node).map(|r| r.state)
    }

    pub fn job_label(&self, job: JobId) -> Option<&JobLabel> {
        self.jobs.get(&job)
    }

    /// Start planning one (run, target).
    ///
    /// Returns the nodes that are immediately ready or skipped. An already
    /// active plan is left untouched; the caller queues such requests.
    pub fn start_plan(&mut self, request: PlanRequest) -> SchedulerStep {
        let key = request.key.clone();
        if self.plans.contains_key(&key) {
            warn!(plan = %key, "start_plan for an active plan; ignoring");
            return SchedulerStep::default();
        }

        let records = StateManager::scope(&self.graph, request.nodes.as_deref());
        info!(
            plan = %key,
            nodes = records.len(),
            force = request.force,
            persisted = request.persisted.len(),
            "scheduler: starting plan"
        );

        self.plans.insert(
            key.clone(),
            PlanState {
                key: key.clone(),
                records,
                persisted: request.persisted,
                force: request.force,
                aborting: false,
            },
        );

        self.evaluate(&key)
    }

    /// Record that the coordinator accepted a ready job.
    ///
    /// Returns `false` when the job is no longer ready (aborted while it was
    /// waiting for capacity, or unknown); the caller must not send it.
    pub fn mark_dispatched(&mut self, job: JobId) -> bool {
        let Some(label) = self.jobs.get(&job) else {
            return false;
        };
        let Some(rec) = self
            .plans
            .get_mut(&label.plan())
            .and_then(|p| p.records.get_mut(&label.node))
        else {
            return false;
        };

        if rec.state != NodeState::Ready {
            return false;
        }
        rec.state = NodeState::Dispatched;
        debug!(job_id = %job, %label, "job dispatched");
        true
    }

    /// Apply a terminal worker result.
    ///
    /// The first terminal result for a job id wins; anything later (or for
    /// an unknown id) is ignored.
    pub fn step_completion(&mut self, job: JobId, outcome: JobOutcome) -> SchedulerStep {
        let Some(label) = self.jobs.remove(&job) else {
            debug!(job_id = %job, ?outcome, "completion for unknown or finished job; ignoring");
            return SchedulerStep::default();
        };
        let key = label.plan();

        let Some(rec) = self
            .plans
            .get_mut(&key)
            .and_then(|p| p.records.get_mut(&label.node))
        else {
            warn!(job_id = %job, %label, "completion for a node outside any active plan");
            return SchedulerStep::default();
        };

        let mut step = SchedulerStep::default();
        if rec.state.is_terminal() {
            return step;
        }

        match outcome {
            JobOutcome::Success => {
                rec.state = NodeState::Succeeded;
                info!(job_id = %job, %label, "job succeeded");
            }
            JobOutcome::Failed(reason) if rec.abort_requested => {
                rec.state = NodeState::Aborted;
                rec.detail = Some(reason.clone());
                info!(job_id = %job, %label, %reason, "job aborted");
                step.newly_aborted.push(label);
            }
            JobOutcome::Failed(reason) => {
                rec.state = NodeState::Failed;
                rec.detail = Some(reason.clone());
                warn!(job_id = %job, %label, %reason, "job failed; failing dependents in this plan");
                step.newly_failed.push((label, reason));
            }
        }

        step.merge(self.evaluate(&key));
        step
    }

    /// Abort outstanding work.
    ///
    /// Nodes not yet handed to the coordinator are aborted immediately.
    /// Dispatched nodes are flagged and reported in `abort_signals`; their
    /// eventual failure response is recorded as an abort. A success that
    /// still arrives wins.
    pub fn request_abort(&mut self, scope: &AbortScope) -> SchedulerStep {
        let keys: Vec<PlanKey> = self
            .plans
            .keys()
            .filter(|k| scope.covers_plan(k))
            .cloned()
            .collect();

        let mut step = SchedulerStep::default();

        for key in keys {
            let Some(plan) = self.plans.get_mut(&key) else {
                continue;
            };
            if !matches!(scope, AbortScope::Node(_)) {
                plan.aborting = true;
            }

            for node in self.graph.topological_order() {
                if !scope.covers_node(&key, node) {
                    continue;
                }
                let Some(rec) = plan.records.get_mut(node) else {
                    continue;
                };

                match rec.state {
                    NodeState::Idle | NodeState::Ready => {
                        rec.state = NodeState::Aborted;
                        rec.detail = Some("abort requested".to_string());
                        if let Some(job) = rec.job {
                            self.jobs.remove(&job);
                        }
                        step.newly_aborted.push(JobLabel::new(&key, node));
                    }
                    NodeState::Dispatched if !rec.abort_requested => {
                        rec.abort_requested = true;
                        if let Some(job) = rec.job {
                            step.abort_signals.push(job);
                        }
                    }
                    _ => {}
                }
            }

            info!(
                plan = %key,
                aborted = step.newly_aborted.len(),
                signalled = step.abort_signals.len(),
                "abort requested"
            );
            step.merge(self.evaluate(&key));
        }

        step
    }

    /// Run one evaluation pass over `key`, hand out job ids for newly
    /// ready nodes and retire the plan if it is done.
    fn evaluate(&mut self, key: &PlanKey) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let Some(plan) = self.plans.get_mut(key) else {
            return step;
        };

        let eval = StateManager::new(&self.graph, plan).evaluate();

        for id in eval.ready {
            self.next_job += 1;
            let job = JobId(self.next_job);
            if let Some(rec) = plan.records.get_mut(&id) {
                rec.job = Some(job);
            }
            let label = JobLabel::new(key, &id);
            self.jobs.insert(job, label.clone());

            let mut timing = Timing::new();
            timing.insert("queued".to_string(), Utc::now());
            step.newly_ready.push(ScheduledJob {
                id: job,
                label,
                incarnation: self.incarnation,
                ps_hint: self.graph.node(&id).map(|n| n.spec.ps_hint).unwrap_or(0),
                timing,
            });
        }

        step.newly_skipped
            .extend(eval.skipped.iter().map(|id| JobLabel::new(key, id)));
        step.newly_failed.extend(
            eval.failed
                .into_iter()
                .map(|(id, reason)| (JobLabel::new(key, &id), reason)),
        );
        step.newly_aborted
            .extend(eval.aborted.iter().map(|id| JobLabel::new(key, id)));

        if let Some(report) = self.finish_if_terminal(key) {
            step.finished_plans.push(report);
        }
        step
    }

    fn finish_if_terminal(&mut self, key: &PlanKey) -> Option<PlanReport> {
        let plan = self.plans.get(key)?;
        if !plan.records.values().all(|r| r.state.is_terminal()) {
            return None;
        }
        let plan = self.plans.remove(key)?;

        let mut report = PlanReport {
            key: key.clone(),
            outcome: PlanOutcome::Succeeded,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            aborted: Vec::new(),
        };

        for id in self.graph.topological_order() {
            let Some(rec) = plan.records.get(id) else {
                continue;
            };
            match rec.state {
                NodeState::Succeeded if rec.skipped => report.skipped.push(id.clone()),
                NodeState::Succeeded => report.succeeded.push(id.clone()),
                NodeState::Failed => report
                    .failed
                    .push((id.clone(), rec.detail.clone().unwrap_or_default())),
                NodeState::Aborted => report.aborted.push(id.clone()),
                NodeState::Idle | NodeState::Ready | NodeState::Dispatched => {}
            }
        }

        if !report.failed.is_empty() || !report.aborted.is_empty() {
            report.outcome = PlanOutcome::Failed;
        }

        info!(
            plan = %key,
            outcome = ?report.outcome,
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            aborted = report.aborted.len(),
            "scheduler: plan finished"
        );
        Some(report)
    }
}
