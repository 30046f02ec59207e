// src/dag/node_info.rs

//! Per-(run, target, node) scheduling state and the job descriptors the
//! scheduler hands out.

use std::collections::HashMap;

use crate::model::version::Version;
use crate::types::{JobId, JobLabel, NodeId, PlanKey, Timing};

/// Lifecycle of one node within one (run, target) plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// In the plan, waiting on producers.
    Idle,
    /// Stale and unblocked; waiting for pool capacity.
    Ready,
    /// Handed to the coordinator.
    Dispatched,
    Succeeded,
    Failed,
    Aborted,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Aborted
        )
    }
}

/// Mutable record for one node in one plan.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub state: NodeState,
    /// Succeeded without dispatch because the persisted version was current.
    pub skipped: bool,
    /// Job id once the node became ready.
    pub job: Option<JobId>,
    /// Failure or abort reason.
    pub detail: Option<String>,
    pub abort_requested: bool,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            state: NodeState::Idle,
            skipped: false,
            job: None,
            detail: None,
            abort_requested: false,
        }
    }
}

/// Everything needed to start a plan.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub key: PlanKey,
    /// Restrict the plan to these nodes and their transitive dependents.
    /// `None` plans every node.
    pub nodes: Option<Vec<NodeId>>,
    /// Recompute every planned node regardless of persisted versions.
    pub force: bool,
    /// Persisted node versions for this (run, target).
    pub persisted: HashMap<NodeId, Version>,
}

impl PlanRequest {
    pub fn new(key: PlanKey) -> Self {
        Self {
            key,
            nodes: None,
            force: false,
            persisted: HashMap::new(),
        }
    }
}

/// Active state of one (run, target) plan.
#[derive(Debug, Clone)]
pub struct PlanState {
    pub key: PlanKey,
    pub records: HashMap<NodeId, NodeRecord>,
    pub persisted: HashMap<NodeId, Version>,
    pub force: bool,
    /// Set by a plan-wide abort: nothing else in this plan may start.
    pub aborting: bool,
}

/// Description of a node the scheduler wants dispatched now.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledJob {
    pub id: JobId,
    pub label: JobLabel,
    pub incarnation: u64,
    pub ps_hint: u32,
    pub timing: Timing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Succeeded,
    Failed,
}

/// Summary of a finished plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanReport {
    pub key: PlanKey,
    pub outcome: PlanOutcome,
    pub succeeded: Vec<NodeId>,
    pub skipped: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
    pub aborted: Vec<NodeId>,
}

/// Which outstanding work an abort request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortScope {
    All,
    Plan(PlanKey),
    Node(JobLabel),
}

impl AbortScope {
    pub fn covers_plan(&self, key: &PlanKey) -> bool {
        match self {
            AbortScope::All => true,
            AbortScope::Plan(k) => k == key,
            AbortScope::Node(label) => label.run_id == key.run_id && label.target == key.target,
        }
    }

    pub fn covers_node(&self, key: &PlanKey, node: &NodeId) -> bool {
        match self {
            AbortScope::Node(label) => self.covers_plan(key) && &label.node == node,
            _ => self.covers_plan(key),
        }
    }
}
