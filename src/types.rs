use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numbered execution context under which versioned results accumulate.
pub type RunId = u64;

/// Named timestamps recorded as a job moves through the system
/// (`"queued"`, `"dispatched"`, `"started"`, `"finished"`, ...).
pub type Timing = BTreeMap<String, DateTime<Utc>>;

/// Identifier of a single dispatch. Unique for the lifetime of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// The kind of graph node, which decides how it declares its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A task algorithm (dependencies come from `previous`).
    Task,
    /// An analysis analyzer (dependencies come from `traits`).
    Analysis,
    /// A regress regression (dependencies come from `variables`).
    Regress,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Task => "task",
            NodeKind::Analysis => "analysis",
            NodeKind::Regress => "regress",
        };
        f.write_str(s)
    }
}

/// Identity of a node in the dependency graph: `factory.component`.
///
/// Factory names are unique across node kinds, so `factory.component` alone
/// identifies a node; the kind rides along for dispatch and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub factory: String,
    pub component: String,
    pub kind: NodeKind,
}

impl NodeId {
    pub fn new(kind: NodeKind, factory: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            component: component.into(),
            kind,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.factory, self.component)
    }
}

/// A (run, target) pair: the unit the scheduler plans and finishes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey {
    pub run_id: RunId,
    pub target: String,
}

impl PlanKey {
    pub fn new(run_id: RunId, target: impl Into<String>) -> Self {
        Self {
            run_id,
            target: target.into(),
        }
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} target {}", self.run_id, self.target)
    }
}

/// The (run, target, node) triple used in logs and operator-facing errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobLabel {
    pub run_id: RunId,
    pub target: String,
    pub node: NodeId,
}

impl JobLabel {
    pub fn new(plan: &PlanKey, node: &NodeId) -> Self {
        Self {
            run_id: plan.run_id,
            target: plan.target.clone(),
            node: node.clone(),
        }
    }

    pub fn plan(&self) -> PlanKey {
        PlanKey::new(self.run_id, self.target.clone())
    }
}

impl fmt::Display for JobLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "run {} target {} node {}",
            self.run_id, self.target, self.node
        )
    }
}

/// Behaviour when a run request arrives for a (run, target) plan that is
/// still active.
///
/// - `Queue`: remember the request and start it when the active plan
///   finishes (default behaviour).
/// - `Replace`: drop anything already queued for that plan and keep only the
///   latest request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResubmitBehaviour {
    #[default]
    Queue,
    Replace,
}

/// Which storage backend persists versions and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Content-addressed blobs plus a JSON index under `storage.path`.
    #[default]
    File,
    /// Process-local map; lost on exit.
    Memory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_render_the_full_triple() {
        let node = NodeId::new(NodeKind::Task, "transit", "whitelight");
        let label = JobLabel::new(&PlanKey::new(5, "HD209458b"), &node);
        assert_eq!(
            label.to_string(),
            "run 5 target HD209458b node transit.whitelight"
        );
        assert_eq!(label.plan(), PlanKey::new(5, "HD209458b"));
    }
}
