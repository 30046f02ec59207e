// src/dag/graph.rs

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::model::component::ComponentSpec;
use crate::model::reference::ValueRef;
use crate::types::NodeId;

/// Static description of one node: what it runs and which values it reads.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub spec: ComponentSpec,
    /// Widened dependency declaration, deduplicated, in declaration order.
    pub inputs: Vec<ValueRef>,
}

/// The pipeline's static dependency graph.
///
/// Edges run consumer -> producer. The graph is acyclic by construction
/// (see [`DependencyGraph::build`]), and `order` lists producers before their
/// consumers.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    pub(crate) graph: DiGraph<NodeId, ()>,
    pub(crate) index: HashMap<NodeId, NodeIndex>,
    pub(crate) nodes: HashMap<NodeId, NodeSpec>,
    pub(crate) order: Vec<NodeId>,
}

impl DependencyGraph {
    /// All nodes, producers first.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Look a node up by its `factory.component` text.
    pub fn find(&self, name: &str) -> Option<&NodeId> {
        self.order.iter().find(|id| id.to_string() == name)
    }

    /// Producers `id` reads from directly.
    pub fn dependencies_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Consumers that read `id` directly.
    pub fn dependents_of(&self, id: &NodeId) -> Vec<NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &NodeId, dir: Direction) -> Vec<NodeId> {
        let Some(&ix) = self.index.get(id) else {
            return Vec::new();
        };
        let mut out: Vec<NodeId> = self
            .graph
            .neighbors_directed(ix, dir)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out
    }
}
