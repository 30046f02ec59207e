// src/dag/state_manager.rs

//! Per-plan state transitions for nodes in the scheduler.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::node_info::{NodeRecord, NodeState, PlanState};
use crate::model::version::is_stale;
use crate::types::NodeId;

/// Nodes whose state changed during one evaluation pass.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub ready: Vec<NodeId>,
    pub skipped: Vec<NodeId>,
    pub failed: Vec<(NodeId, String)>,
    pub aborted: Vec<NodeId>,
}

enum Producers {
    Satisfied,
    Waiting,
    Blocked(String),
}

/// Applies transitions to a single plan against the static graph.
pub struct StateManager<'a> {
    graph: &'a DependencyGraph,
    plan: &'a mut PlanState,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DependencyGraph, plan: &'a mut PlanState) -> Self {
        Self { graph, plan }
    }

    /// Nodes a plan covers: every root plus all of its transitive
    /// dependents. `None` covers the whole graph.
    pub fn scope(graph: &DependencyGraph, roots: Option<&[NodeId]>) -> HashMap<NodeId, NodeRecord> {
        let Some(roots) = roots else {
            return graph
                .topological_order()
                .iter()
                .map(|id| (id.clone(), NodeRecord::default()))
                .collect();
        };

        let mut stack: Vec<NodeId> = roots.to_vec();
        let mut visited: HashSet<NodeId> = HashSet::new();

        while let Some(id) = stack.pop() {
            if !graph.contains(&id) {
                warn!(node = %id, "plan names a node the graph does not contain; ignoring");
                continue;
            }
            if !visited.insert(id.clone()) {
                continue;
            }
            stack.extend(graph.dependents_of(&id));
        }

        visited
            .into_iter()
            .map(|id| (id, NodeRecord::default()))
            .collect()
    }

    /// One pass in topological order: idle nodes whose producers are
    /// satisfied become ready (stale) or succeed without dispatch (current);
    /// idle nodes behind a failed or aborted producer fail.
    ///
    /// Because producers precede consumers, a skip or failure propagates all
    /// the way down in a single pass.
    pub fn evaluate(&mut self) -> Evaluation {
        let mut out = Evaluation::default();

        for id in self.graph.topological_order() {
            let Some(state) = self.plan.records.get(id).map(|r| r.state) else {
                continue;
            };
            if state != NodeState::Idle {
                continue;
            }

            match self.producers(id) {
                Producers::Waiting => {}
                Producers::Blocked(reason) => {
                    debug!(node = %id, plan = %self.plan.key, %reason, "failing node without dispatch");
                    self.set(id, NodeState::Failed, Some(reason.clone()));
                    out.failed.push((id.clone(), reason));
                }
                Producers::Satisfied => {
                    if self.plan.aborting {
                        self.set(id, NodeState::Aborted, Some("abort requested".to_string()));
                        out.aborted.push(id.clone());
                        continue;
                    }

                    let declared = self.graph.node(id).map(|n| n.spec.version);
                    let persisted = self.plan.persisted.get(id).copied();
                    let stale = match declared {
                        Some(declared) => is_stale(persisted, declared),
                        None => true,
                    };

                    if self.plan.force || stale {
                        info!(
                            node = %id,
                            plan = %self.plan.key,
                            persisted = ?persisted.map(|v| v.to_string()),
                            force = self.plan.force,
                            "node is stale; marking ready"
                        );
                        self.set(id, NodeState::Ready, None);
                        out.ready.push(id.clone());
                    } else {
                        debug!(node = %id, plan = %self.plan.key, "persisted version current; skipping");
                        if let Some(rec) = self.plan.records.get_mut(id) {
                            rec.state = NodeState::Succeeded;
                            rec.skipped = true;
                        }
                        out.skipped.push(id.clone());
                    }
                }
            }
        }

        out
    }

    fn producers(&self, id: &NodeId) -> Producers {
        let mut waiting = false;

        for producer in self.graph.dependencies_of(id) {
            match self.plan.records.get(&producer).map(|r| r.state) {
                Some(NodeState::Succeeded) => {}
                Some(NodeState::Failed) => {
                    return Producers::Blocked(format!("upstream {producer} failed"));
                }
                Some(NodeState::Aborted) => {
                    return Producers::Blocked(format!("upstream {producer} aborted"));
                }
                Some(NodeState::Idle | NodeState::Ready | NodeState::Dispatched) => {
                    waiting = true;
                }
                None => {
                    // Outside the plan: rely on what is already persisted.
                    if !self.plan.persisted.contains_key(&producer) {
                        return Producers::Blocked(format!(
                            "missing upstream record for {producer}"
                        ));
                    }
                }
            }
        }

        if waiting {
            Producers::Waiting
        } else {
            Producers::Satisfied
        }
    }

    fn set(&mut self, id: &NodeId, state: NodeState, detail: Option<String>) {
        if let Some(rec) = self.plan.records.get_mut(id) {
            rec.state = state;
            if detail.is_some() {
                rec.detail = detail;
            }
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.plan.records.values().all(|r| r.state.is_terminal())
    }
}
