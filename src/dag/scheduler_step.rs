// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::node_info::{PlanReport, ScheduledJob};
use crate::types::{JobId, JobLabel};

/// Structured result of a single scheduler "step".
///
/// Tests use it to drive plans by hand and assert on what changed; the core
/// runtime turns it into dispatch and abort commands.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Nodes that became ready, in the order they became ready.
    pub newly_ready: Vec<ScheduledJob>,
    /// Nodes that succeeded without dispatch because they were current.
    pub newly_skipped: Vec<JobLabel>,
    /// Nodes newly marked failed, with the reason (including dependents
    /// failed by propagation).
    pub newly_failed: Vec<(JobLabel, String)>,
    pub newly_aborted: Vec<JobLabel>,
    /// Dispatched jobs whose workers should be told to abort.
    pub abort_signals: Vec<JobId>,
    /// Plans that reached a terminal outcome in this step.
    pub finished_plans: Vec<PlanReport>,
}

impl SchedulerStep {
    pub fn merge(&mut self, other: SchedulerStep) {
        self.newly_ready.extend(other.newly_ready);
        self.newly_skipped.extend(other.newly_skipped);
        self.newly_failed.extend(other.newly_failed);
        self.newly_aborted.extend(other.newly_aborted);
        self.abort_signals.extend(other.abort_signals);
        self.finished_plans.extend(other.finished_plans);
    }

    pub fn is_empty(&self) -> bool {
        self.newly_ready.is_empty()
            && self.newly_skipped.is_empty()
            && self.newly_failed.is_empty()
            && self.newly_aborted.is_empty()
            && self.abort_signals.is_empty()
            && self.finished_plans.is_empty()
    }
}
