// src/dag/builder.rs

//! Build the dependency graph from factory declarations.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info};

use crate::dag::graph::{DependencyGraph, NodeSpec};
use crate::errors::{PipelineError, Result};
use crate::model::factory::Factory;
use crate::model::reference::{ValueRef, widen};
use crate::types::NodeId;

impl DependencyGraph {
    /// Instantiate every factory, widen each component's declared
    /// dependencies and assemble the graph.
    ///
    /// Fails with [`PipelineError::DependencyCycle`] carrying the full cycle
    /// path when the declarations are cyclic (a component reading its own
    /// outputs counts).
    pub fn build(factories: &[Arc<dyn Factory>]) -> Result<Self> {
        let mut graph: DiGraph<NodeId, ()> = DiGraph::new();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        let mut nodes: HashMap<NodeId, NodeSpec> = HashMap::new();

        // First pass: one node per component.
        for factory in factories {
            let bundle = factory.instantiate(0, 0, None);
            for component in &bundle.components {
                let id = bundle.node_id(component);
                if index.contains_key(&id) {
                    return Err(PipelineError::Configuration(format!(
                        "component '{id}' is declared more than once"
                    )));
                }

                let mut seen = HashSet::new();
                let inputs: Vec<ValueRef> = widen(component.declare_dependencies())
                    .filter(|v| seen.insert(v.clone()))
                    .collect();

                let ix = graph.add_node(id.clone());
                index.insert(id.clone(), ix);
                nodes.insert(
                    id.clone(),
                    NodeSpec {
                        id,
                        spec: component.spec().clone(),
                        inputs,
                    },
                );
            }
        }

        // Second pass: consumer -> producer edges.
        for spec in nodes.values() {
            let from = index[&spec.id];
            for input in &spec.inputs {
                let to = index.get(&input.producer).copied().ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "component '{}' depends on '{}', which no factory declares",
                        spec.id, input.producer
                    ))
                })?;
                graph.update_edge(from, to, ());
            }
        }

        let sorted = match toposort(&graph, None) {
            Ok(sorted) => sorted,
            Err(cycle) => {
                let path = cycle_path(&graph, cycle.node_id())
                    .into_iter()
                    .map(|ix| graph[ix].to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(PipelineError::DependencyCycle { path });
            }
        };

        // toposort puts consumers first; scheduling wants producers first.
        let order: Vec<NodeId> = sorted.into_iter().rev().map(|ix| graph[ix].clone()).collect();

        info!(
            nodes = order.len(),
            edges = graph.edge_count(),
            "dependency graph built"
        );
        debug!(order = ?order.iter().map(|n| n.to_string()).collect::<Vec<_>>(), "topological order");

        Ok(Self {
            graph,
            index,
            nodes,
            order,
        })
    }
}

/// Shortest cycle through `start`, as `start -> ... -> start`.
fn cycle_path(graph: &DiGraph<NodeId, ()>, start: NodeIndex) -> Vec<NodeIndex> {
    let members: HashSet<NodeIndex> = tarjan_scc(graph)
        .into_iter()
        .find(|scc| scc.contains(&start))
        .unwrap_or_default()
        .into_iter()
        .collect();

    let mut prev: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut queue = VecDeque::from([start]);

    while let Some(n) = queue.pop_front() {
        for next in graph.neighbors(n) {
            if next == start {
                let mut chain = vec![n];
                let mut cur = n;
                while cur != start {
                    let Some(&p) = prev.get(&cur) else { break };
                    chain.push(p);
                    cur = p;
                }
                chain.reverse();
                if chain.first() != Some(&start) {
                    chain.insert(0, start);
                }
                chain.push(start);
                return chain;
            }
            if members.contains(&next) && !prev.contains_key(&next) {
                prev.insert(next, n);
                queue.push_back(next);
            }
        }
    }

    vec![start, start]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::component::{ComponentSpec, Outputs, StateVector};
    use crate::model::factory::{DeclaredComponent, DeclaredFactory, FactoryKind};
    use crate::model::reference::{Catalog, Reference};
    use crate::model::version::Version;
    use crate::types::NodeKind;
    use indexmap::IndexMap;

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

    /// Factories `names[i]` with one component `c`, depending on `edges`.
    fn factories(names: &[&str], edges: &[(&str, &str)]) -> Vec<Arc<dyn Factory>> {
        let mut catalog = Catalog::new();
        for n in names {
            catalog.insert(NodeId::new(NodeKind::Task, *n, "c"), outputs());
        }
        names
            .iter()
            .map(|n| {
                let depends: Vec<Reference> = edges
                    .iter()
                    .filter(|(from, _)| from == n)
                    .map(|(_, to)| catalog.resolve(&format!("{to}.c")).unwrap())
                    .collect();
                let spec = ComponentSpec {
                    name: "c".to_string(),
                    version: Version::new(1, 0, 0),
                    cmd: "true".to_string(),
                    ps_hint: 0,
                    outputs: outputs(),
                };
                DeclaredFactory::new(FactoryKind::Task, *n, vec![DeclaredComponent { spec, depends }])
                    .into_shared()
            })
            .collect()
    }

    fn id(name: &str) -> NodeId {
        NodeId::new(NodeKind::Task, name, "c")
    }

    #[test]
    fn producers_come_first() {
        let g = DependencyGraph::build(&factories(
            &["t3", "t2", "t1"],
            &[("t2", "t1"), ("t3", "t2")],
        ))
        .unwrap();
        let order: Vec<String> = g.topological_order().iter().map(|n| n.to_string()).collect();
        assert_eq!(order, vec!["t1.c", "t2.c", "t3.c"]);
        assert_eq!(g.dependencies_of(&id("t2")), vec![id("t1")]);
        assert_eq!(g.dependents_of(&id("t2")), vec![id("t3")]);
        assert_eq!(g.node(&id("t2")).unwrap().inputs.len(), 1);
    }

    #[test]
    fn cycles_report_the_full_path() {
        let err = DependencyGraph::build(&factories(
            &["a", "b", "c"],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        ))
        .unwrap_err();
        let PipelineError::DependencyCycle { path } = err else {
            panic!("expected cycle error, got {err:?}");
        };
        let hops: Vec<&str> = path.split(" -> ").collect();
        assert_eq!(hops.len(), 4);
        assert_eq!(hops.first(), hops.last());
        for n in ["a.c", "b.c", "c.c"] {
            assert!(hops.contains(&n), "{path}");
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let err = DependencyGraph::build(&factories(&["a"], &[("a", "a")])).unwrap_err();
        assert!(
            matches!(&err, PipelineError::DependencyCycle { path } if path == "a.c -> a.c"),
            "{err}"
        );
    }

    #[test]
    fn duplicate_edges_collapse() {
        let g = DependencyGraph::build(&factories(&["a", "b"], &[("b", "a"), ("b", "a")])).unwrap();
        assert_eq!(g.graph.edge_count(), 1);
        assert_eq!(g.node(&id("b")).unwrap().inputs.len(), 1);
    }
}
