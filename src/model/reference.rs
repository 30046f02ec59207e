// src/model/reference.rs

//! Declared pointers from a consuming component to a producer's outputs.
//!
//! References come in three narrowing granularities. Widening flattens any
//! of them to the [`ValueRef`]s they cover, in declaration order.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::model::component::Outputs;
use crate::model::names::{NamePath, NameError};
use crate::model::version::Version;
use crate::types::{NodeId, RunId};

/// Every output of a producing component.
#[derive(Debug, Clone)]
pub struct AlgorithmRef {
    pub producer: NodeId,
    pub outputs: Arc<Outputs>,
}

/// Every value of one state vector of a producing component.
#[derive(Debug, Clone)]
pub struct StateVectorRef {
    pub producer: NodeId,
    pub outputs: Arc<Outputs>,
    pub state_vector: String,
}

/// A single value of a producing component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValueRef {
    pub producer: NodeId,
    pub state_vector: String,
    pub value: String,
    pub version: Version,
}

impl ValueRef {
    /// Persisted address of this value within a run.
    pub fn name_path(&self, run_id: RunId) -> Result<NamePath, NameError> {
        NamePath::value(run_id, &self.producer, &self.state_vector, &self.value)
    }
}

#[derive(Debug, Clone)]
pub enum Reference {
    Algorithm(AlgorithmRef),
    StateVector(StateVectorRef),
    Value(ValueRef),
}

impl Reference {
    pub fn producer(&self) -> &NodeId {
        match self {
            Reference::Algorithm(r) => &r.producer,
            Reference::StateVector(r) => &r.producer,
            Reference::Value(r) => &r.producer,
        }
    }

    /// Lazily expand this reference to the values it covers.
    pub fn widen(&self) -> Box<dyn Iterator<Item = ValueRef> + '_> {
        match self {
            Reference::Algorithm(r) => Box::new(
                r.outputs
                    .values()
                    .map(|(sv, value, version)| value_ref(&r.producer, sv, value, version)),
            ),
            Reference::StateVector(r) => {
                let values = r
                    .outputs
                    .state_vector(&r.state_vector)
                    .into_iter()
                    .flat_map(|sv| sv.values.iter());
                Box::new(values.map(|(value, version)| {
                    value_ref(&r.producer, &r.state_vector, value, *version)
                }))
            }
            Reference::Value(r) => Box::new(std::iter::once(r.clone())),
        }
    }
}

fn value_ref(producer: &NodeId, state_vector: &str, value: &str, version: Version) -> ValueRef {
    ValueRef {
        producer: producer.clone(),
        state_vector: state_vector.to_string(),
        value: value.to_string(),
        version,
    }
}

/// Widen a list of references. Restartable: call again for a fresh pass.
pub fn widen(refs: &[Reference]) -> impl Iterator<Item = ValueRef> + '_ {
    refs.iter().flat_map(Reference::widen)
}

/// Re-wrap widened values as references.
pub fn as_references(values: impl IntoIterator<Item = ValueRef>) -> Vec<Reference> {
    values.into_iter().map(Reference::Value).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("reference '{0}' must have 2 to 4 dot-separated parts: factory.component[.state_vector[.value]]")]
    Malformed(String),

    #[error("reference '{reference}' names unknown component '{component}'")]
    UnknownComponent { reference: String, component: String },

    #[error("reference '{reference}' names unknown state vector '{state_vector}'")]
    UnknownStateVector {
        reference: String,
        state_vector: String,
    },

    #[error("reference '{reference}' names unknown value '{value}'")]
    UnknownValue { reference: String, value: String },
}

/// Every component the pipeline declares, addressable by `factory.component`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: HashMap<(String, String), (NodeId, Arc<Outputs>)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: NodeId, outputs: Arc<Outputs>) {
        let key = (node.factory.clone(), node.component.clone());
        self.entries.insert(key, (node, outputs));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve `factory.component[.state_vector[.value]]` into a typed
    /// reference.
    pub fn resolve(&self, text: &str) -> Result<Reference, ReferenceError> {
        let parts: Vec<&str> = text.split('.').collect();
        if !(2..=4).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(ReferenceError::Malformed(text.to_string()));
        }

        let key = (parts[0].to_string(), parts[1].to_string());
        let (producer, outputs) =
            self.entries
                .get(&key)
                .ok_or_else(|| ReferenceError::UnknownComponent {
                    reference: text.to_string(),
                    component: format!("{}.{}", parts[0], parts[1]),
                })?;

        if parts.len() == 2 {
            return Ok(Reference::Algorithm(AlgorithmRef {
                producer: producer.clone(),
                outputs: Arc::clone(outputs),
            }));
        }

        let sv_name = parts[2];
        let sv = outputs
            .state_vector(sv_name)
            .ok_or_else(|| ReferenceError::UnknownStateVector {
                reference: text.to_string(),
                state_vector: sv_name.to_string(),
            })?;

        if parts.len() == 3 {
            return Ok(Reference::StateVector(StateVectorRef {
                producer: producer.clone(),
                outputs: Arc::clone(outputs),
                state_vector: sv_name.to_string(),
            }));
        }

        let value_name = parts[3];
        let version = sv
            .values
            .get(value_name)
            .copied()
            .ok_or_else(|| ReferenceError::UnknownValue {
                reference: text.to_string(),
                value: value_name.to_string(),
            })?;

        Ok(Reference::Value(value_ref(producer, sv_name, value_name, version)))
    }
}
