// src/dag/mod.rs

//! Dependency graph and scheduling.
//!
//! - [`graph`] holds the static consumer -> producer graph.
//! - [`builder`] assembles it from factories and rejects cycles.
//! - [`scheduler`] contains the per-(run, target) state machine that
//!   decides which nodes are stale, ready, skipped or failed.
//! - [`node_info`] provides node states and scheduled job types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-plan state transitions.

pub mod builder;
pub mod graph;
pub mod node_info;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::{DependencyGraph, NodeSpec};
pub use node_info::{
    AbortScope, NodeState, PlanOutcome, PlanReport, PlanRequest, ScheduledJob,
};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use indexmap::IndexMap;

    use crate::dag::DependencyGraph;
    use crate::model::component::{ComponentSpec, Outputs, StateVector};
    use crate::model::factory::{DeclaredComponent, DeclaredFactory, Factory, FactoryKind};
    use crate::model::reference::Catalog;
    use crate::model::version::Version;
    use crate::types::{NodeId, NodeKind};

    fn outputs() -> Arc<Outputs> {
        let mut values = IndexMap::new();
        values.insert("x".to_string(), Version::new(1, 0, 0));
        let mut state_vectors = IndexMap::new();
        state_vectors.insert(
            "sv".to_string(),
            StateVector {
                name: "sv".to_string(),
                version: Version::new(1, 0, 0),
                values,
            },
        );
        Arc::new(Outputs { state_vectors })
    }

    /// Task factories `names[i]` with one component `c` at version 1.0.0,
    /// each reading the previous one.
    pub fn chain(names: &[&str]) -> DependencyGraph {
        let mut catalog = Catalog::new();
        for n in names {
            catalog.insert(NodeId::new(NodeKind::Task, *n, "c"), outputs());
        }
        let factories: Vec<Arc<dyn Factory>> = names
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let depends = match i {
                    0 => Vec::new(),
                    _ => vec![catalog.resolve(&format!("{}.c", names[i - 1])).unwrap()],
                };
                let spec = ComponentSpec {
                    name: "c".to_string(),
                    version: Version::new(1, 0, 0),
                    cmd: format!("run-{n}"),
                    ps_hint: 1,
                    outputs: outputs(),
                };
                DeclaredFactory::new(FactoryKind::Task, *n, vec![DeclaredComponent { spec, depends }])
                    .into_shared()
            })
            .collect();
        DependencyGraph::build(&factories).unwrap()
    }
}
