// src/model/factory.rs

//! Factories own a named group of components and hand out fresh instances
//! of them per (run, target).

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::model::component::{Component, ComponentSpec};
use crate::model::reference::Reference;
use crate::types::{NodeId, NodeKind, RunId};

/// The configuration section a factory was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FactoryKind {
    Task,
    Analysis,
    Regress,
    /// Event factories behave like tasks once instantiated.
    Event,
}

impl FactoryKind {
    pub fn node_kind(self) -> NodeKind {
        match self {
            FactoryKind::Task | FactoryKind::Event => NodeKind::Task,
            FactoryKind::Analysis => NodeKind::Analysis,
            FactoryKind::Regress => NodeKind::Regress,
        }
    }

    /// Name of the per-component table inside this factory's section.
    pub fn component_table(self) -> &'static str {
        match self {
            FactoryKind::Task | FactoryKind::Event => "algorithm",
            FactoryKind::Analysis => "analyzer",
            FactoryKind::Regress => "regression",
        }
    }
}

impl fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FactoryKind::Task => "task",
            FactoryKind::Analysis => "analysis",
            FactoryKind::Regress => "regress",
            FactoryKind::Event => "event",
        };
        f.write_str(s)
    }
}

/// One instantiation of a factory.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub factory: String,
    pub kind: FactoryKind,
    pub ps_hint: u32,
    pub run_id: RunId,
    pub target: Option<String>,
    pub components: Vec<Component>,
}

impl Bundle {
    pub fn node_id(&self, component: &Component) -> NodeId {
        NodeId::new(self.kind.node_kind(), &self.factory, component.name())
    }
}

/// Source of components for the dependency graph and the scheduler.
pub trait Factory: Send + Sync + fmt::Debug {
    fn kind(&self) -> FactoryKind;

    fn name(&self) -> &str;

    /// Produce a fresh set of components for `(run_id, target)`.
    ///
    /// A non-zero `ps_hint` overrides the declared process-size hints.
    fn instantiate(&self, ps_hint: u32, run_id: RunId, target: Option<&str>) -> Bundle;
}

/// A component as declared in the pipeline file, with its references
/// already resolved.
#[derive(Debug, Clone)]
pub struct DeclaredComponent {
    pub spec: ComponentSpec,
    pub depends: Vec<Reference>,
}

/// Factory backed by the pipeline configuration.
#[derive(Debug, Clone)]
pub struct DeclaredFactory {
    kind: FactoryKind,
    name: String,
    components: Vec<DeclaredComponent>,
}

impl DeclaredFactory {
    pub fn new(kind: FactoryKind, name: impl Into<String>, components: Vec<DeclaredComponent>) -> Self {
        Self {
            kind,
            name: name.into(),
            components,
        }
    }

    pub fn components(&self) -> &[DeclaredComponent] {
        &self.components
    }

    pub fn into_shared(self) -> Arc<dyn Factory> {
        Arc::new(self)
    }
}

impl Factory for DeclaredFactory {
    fn kind(&self) -> FactoryKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self, ps_hint: u32, run_id: RunId, target: Option<&str>) -> Bundle {
        let node_kind = self.kind.node_kind();
        let components = self
            .components
            .iter()
            .map(|declared| {
                let mut component =
                    Component::for_kind(node_kind, declared.spec.clone(), declared.depends.clone());
                if ps_hint > 0 {
                    component.spec_mut().ps_hint = ps_hint;
                }
                component
            })
            .collect();

        Bundle {
            factory: self.name.clone(),
            kind: self.kind,
            ps_hint,
            run_id,
            target: target.map(str::to_string),
            components,
        }
    }
}
