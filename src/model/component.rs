// src/model/component.rs

//! Components are the schedulable units inside a factory: task algorithms,
//! analysis analyzers and regress regressions.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::model::reference::Reference;
use crate::model::version::Version;
use crate::types::NodeKind;

/// A named, versioned collection of values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVector {
    pub name: String,
    pub version: Version,
    /// Value name to value version, in declaration order.
    pub values: IndexMap<String, Version>,
}

/// Everything a component produces, in declaration order.
///
/// Shared behind an `Arc` so references can point at a producer's outputs
/// without owning the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outputs {
    pub state_vectors: IndexMap<String, StateVector>,
}

impl Outputs {
    pub fn state_vector(&self, name: &str) -> Option<&StateVector> {
        self.state_vectors.get(name)
    }

    /// `(state_vector, value, version)` for every declared value.
    pub fn values(&self) -> impl Iterator<Item = (&str, &str, Version)> {
        self.state_vectors.values().flat_map(|sv| {
            sv.values
                .iter()
                .map(move |(name, version)| (sv.name.as_str(), name.as_str(), *version))
        })
    }
}

/// Static description shared by every component kind.
#[derive(Debug, Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub version: Version,
    /// Command line the worker runs for this component.
    pub cmd: String,
    /// Process-size hint forwarded to workers.
    pub ps_hint: u32,
    pub outputs: Arc<Outputs>,
}

#[derive(Debug, Clone)]
pub struct Algorithm {
    pub spec: ComponentSpec,
    previous: Vec<Reference>,
}

impl Algorithm {
    pub fn new(spec: ComponentSpec, previous: Vec<Reference>) -> Self {
        Self { spec, previous }
    }

    /// Outputs of earlier algorithms this one consumes.
    pub fn previous(&self) -> &[Reference] {
        &self.previous
    }
}

#[derive(Debug, Clone)]
pub struct Analyzer {
    pub spec: ComponentSpec,
    traits: Vec<Reference>,
}

impl Analyzer {
    pub fn new(spec: ComponentSpec, traits: Vec<Reference>) -> Self {
        Self { spec, traits }
    }

    /// Per-target traits the analysis aggregates.
    pub fn traits(&self) -> &[Reference] {
        &self.traits
    }
}

#[derive(Debug, Clone)]
pub struct Regression {
    pub spec: ComponentSpec,
    variables: Vec<Reference>,
}

impl Regression {
    pub fn new(spec: ComponentSpec, variables: Vec<Reference>) -> Self {
        Self { spec, variables }
    }

    /// Variables tracked across runs.
    pub fn variables(&self) -> &[Reference] {
        &self.variables
    }
}

/// One schedulable component, tagged by the kind of factory that owns it.
#[derive(Debug, Clone)]
pub enum Component {
    Algorithm(Algorithm),
    Analyzer(Analyzer),
    Regression(Regression),
}

impl Component {
    /// Build the variant matching a node kind.
    pub fn for_kind(kind: NodeKind, spec: ComponentSpec, deps: Vec<Reference>) -> Self {
        match kind {
            NodeKind::Task => Component::Algorithm(Algorithm::new(spec, deps)),
            NodeKind::Analysis => Component::Analyzer(Analyzer::new(spec, deps)),
            NodeKind::Regress => Component::Regression(Regression::new(spec, deps)),
        }
    }

    pub fn spec(&self) -> &ComponentSpec {
        match self {
            Component::Algorithm(a) => &a.spec,
            Component::Analyzer(a) => &a.spec,
            Component::Regression(r) => &r.spec,
        }
    }

    pub fn spec_mut(&mut self) -> &mut ComponentSpec {
        match self {
            Component::Algorithm(a) => &mut a.spec,
            Component::Analyzer(a) => &mut a.spec,
            Component::Regression(r) => &mut r.spec,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec().name
    }

    /// The references this component consumes, whatever its kind calls them.
    pub fn declare_dependencies(&self) -> &[Reference] {
        match self {
            Component::Algorithm(a) => a.previous(),
            Component::Analyzer(a) => a.traits(),
            Component::Regression(r) => r.variables(),
        }
    }
}
