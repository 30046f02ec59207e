// src/storage/memory.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::model::names::NamePath;
use crate::model::version::Version;
use crate::storage::{Storage, StorageError, StorageKey};

type Records = HashMap<(String, NamePath), (Version, Vec<u8>)>;

/// Process-local storage. Lost on exit.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    records: Mutex<Records>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for InMemoryStorage {
    fn get_version(&self, target: &str, name: &NamePath) -> Result<Option<Version>, StorageError> {
        Ok(self
            .records()
            .get(&(target.to_string(), name.clone()))
            .map(|(v, _)| *v))
    }

    fn put(
        &self,
        target: &str,
        name: &NamePath,
        version: Version,
        data: &[u8],
    ) -> Result<StorageKey, StorageError> {
        self.records()
            .insert((target.to_string(), name.clone()), (version, data.to_vec()));
        Ok(StorageKey(format!("{target}/{name}")))
    }

    fn get(&self, target: &str, name: &NamePath) -> Result<(Version, Vec<u8>), StorageError> {
        self.records()
            .get(&(target.to_string(), name.clone()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                target: target.to_string(),
                name: name.to_string(),
            })
    }
}
