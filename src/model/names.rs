// src/model/names.rs

//! Dot-joined addresses of persisted data:
//! `run_id.task.algorithm.state_vector.value`.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{NodeId, RunId};

/// Separator between levels of a [`NamePath`].
pub const SEPARATOR: char = '.';

/// Printable ASCII without the separator.
static COMPONENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x21-\x7E&&[^.]]+$").expect("component regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("invalid {level} name '{name}': must be non-empty printable ASCII without '.'")]
    InvalidComponent { level: &'static str, name: String },

    #[error("invalid name path '{0}': expected run_id.task.algorithm[.state_vector[.value]]")]
    InvalidPath(String),
}

/// Check a single name component (task, algorithm, state vector, value).
pub fn validate_component(level: &'static str, name: &str) -> Result<(), NameError> {
    if COMPONENT_RE.is_match(name) {
        Ok(())
    } else {
        Err(NameError::InvalidComponent {
            level,
            name: name.to_string(),
        })
    }
}

/// Address of a persisted record.
///
/// A path names either a node's own record (`run.task.algorithm`), a state
/// vector (`run.task.algorithm.sv`) or a single value
/// (`run.task.algorithm.sv.value`). Paths are case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamePath {
    run_id: RunId,
    task: String,
    algorithm: String,
    state_vector: Option<String>,
    value: Option<String>,
}

impl NamePath {
    /// Path of a node's own record.
    pub fn node(run_id: RunId, node: &NodeId) -> Self {
        Self {
            run_id,
            task: node.factory.clone(),
            algorithm: node.component.clone(),
            state_vector: None,
            value: None,
        }
    }

    /// Path of a single value produced by `node`.
    pub fn value(
        run_id: RunId,
        node: &NodeId,
        state_vector: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, NameError> {
        let state_vector = state_vector.into();
        let value = value.into();
        validate_component("state vector", &state_vector)?;
        validate_component("value", &value)?;
        Ok(Self {
            state_vector: Some(state_vector),
            value: Some(value),
            ..Self::node(run_id, node)
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn state_vector(&self) -> Option<&str> {
        self.state_vector.as_deref()
    }

    pub fn value_name(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Whether this path addresses something produced by `node`.
    pub fn belongs_to(&self, node: &NodeId) -> bool {
        self.task == node.factory && self.algorithm == node.component
    }
}

impl fmt::Display for NamePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.run_id, self.task, self.algorithm)?;
        if let Some(sv) = &self.state_vector {
            write!(f, ".{sv}")?;
        }
        if let Some(v) = &self.value {
            write!(f, ".{v}")?;
        }
        Ok(())
    }
}

impl FromStr for NamePath {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if !(3..=5).contains(&parts.len()) {
            return Err(NameError::InvalidPath(s.to_string()));
        }
        let run_id = parts[0]
            .parse::<RunId>()
            .map_err(|_| NameError::InvalidPath(s.to_string()))?;

        const LEVELS: [&str; 4] = ["task", "algorithm", "state vector", "value"];
        for (level, part) in LEVELS.iter().copied().zip(&parts[1..]) {
            validate_component(level, part)?;
        }

        Ok(Self {
            run_id,
            task: parts[1].to_string(),
            algorithm: parts[2].to_string(),
            state_vector: parts.get(3).map(|s| s.to_string()),
            value: parts.get(4).map(|s| s.to_string()),
        })
    }
}

impl TryFrom<String> for NamePath {
    type Error = NameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NamePath> for String {
    fn from(p: NamePath) -> Self {
        p.to_string()
    }
}
