// src/storage/mod.rs

//! Persistence of versions and values, keyed per target by
//! [`NamePath`].
//!
//! The scheduler reads a node's own record (`run.task.algorithm`) to decide
//! staleness; workers' values are stored under the full five-level path.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::model::names::NamePath;
use crate::model::version::Version;
use crate::types::{NodeId, RunId};

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

/// Handle returned by a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(pub String);

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no record for {name} (target {target})")]
    NotFound { target: String, name: String },

    #[error("corrupt record for {name}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("storage index error: {0}")]
    Index(#[from] serde_json::Error),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Storage engine the scheduler and core runtime talk to.
///
/// Implementations own their per-key write atomicity.
pub trait Storage: Send + Sync + fmt::Debug {
    /// Version persisted at `name`, if any.
    fn get_version(&self, target: &str, name: &NamePath) -> Result<Option<Version>, StorageError>;

    fn put(
        &self,
        target: &str,
        name: &NamePath,
        version: Version,
        data: &[u8],
    ) -> Result<StorageKey, StorageError>;

    /// Version and bytes at `name`, or [`StorageError::NotFound`].
    fn get(&self, target: &str, name: &NamePath) -> Result<(Version, Vec<u8>), StorageError>;
}

/// Persisted node versions for one (run, target).
///
/// Read failures are logged and treated as absent, which makes the node
/// stale.
pub fn node_versions<'a>(
    storage: &dyn Storage,
    run_id: RunId,
    target: &str,
    nodes: impl IntoIterator<Item = &'a NodeId>,
) -> HashMap<NodeId, Version> {
    let mut out = HashMap::new();
    for node in nodes {
        let name = NamePath::node(run_id, node);
        match storage.get_version(target, &name) {
            Ok(Some(version)) => {
                out.insert(node.clone(), version);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(%name, target, error = %e, "failed to read persisted version; treating as absent");
            }
        }
    }
    out
}
