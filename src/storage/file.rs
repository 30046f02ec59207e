// src/storage/file.rs

//! Content-addressed file storage.
//!
//! Layout under the root directory:
//!
//! ```text
//! blobs/<blake3 hex>   value bytes, written once per distinct content
//! index.json           target -> name path -> { version, blob }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fs::FileSystem;
use crate::model::names::NamePath;
use crate::model::version::Version;
use crate::storage::{Storage, StorageError, StorageKey};

const INDEX_FILE: &str = "index.json";
const BLOB_DIR: &str = "blobs";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct IndexEntry {
    version: Version,
    blob: String,
}

type Index = BTreeMap<String, BTreeMap<String, IndexEntry>>;

#[derive(Debug)]
pub struct FileStorage<F: FileSystem> {
    fs: F,
    root: PathBuf,
    index: Mutex<Index>,
}

impl<F: FileSystem> FileStorage<F> {
    /// Open (or start) a store rooted at `root`.
    pub fn open(fs: F, root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let index_path = root.join(INDEX_FILE);
        let index = if fs.exists(&index_path) {
            let text = fs.read_to_string(&index_path)?;
            serde_json::from_str(&text)?
        } else {
            Index::new()
        };

        info!(
            root = %root.display(),
            targets = index.len(),
            "opened file storage"
        );
        Ok(Self {
            fs,
            root,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.root.join(BLOB_DIR).join(hash)
    }

    /// Make sure `blobs/<hash>` holds `data`, replacing a damaged copy.
    fn write_blob(&self, hash: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.blob_path(hash);
        if self.fs.exists(&path) {
            match self.fs.read(&path) {
                Ok(existing) if blake3::hash(&existing).to_hex().as_str() == hash => return Ok(()),
                _ => warn!(blob = hash, "stored blob does not match its hash; rewriting"),
            }
        }
        let tmp = path.with_extension("tmp");
        self.fs.write(&tmp, data)?;
        self.fs.rename(&tmp, &path)?;
        Ok(())
    }

    /// Write the index to a temporary file and move it into place.
    fn flush_index(&self, index: &Index) -> Result<(), StorageError> {
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(index)?;
        self.fs.write(&tmp, &bytes)?;
        self.fs.rename(&tmp, &path)?;
        Ok(())
    }
}

impl<F: FileSystem> Storage for FileStorage<F> {
    fn get_version(&self, target: &str, name: &NamePath) -> Result<Option<Version>, StorageError> {
        Ok(self
            .index()
            .get(target)
            .and_then(|names| names.get(&name.to_string()))
            .map(|e| e.version))
    }

    fn put(
        &self,
        target: &str,
        name: &NamePath,
        version: Version,
        data: &[u8],
    ) -> Result<StorageKey, StorageError> {
        let hash = blake3::hash(data).to_hex().to_string();
        self.write_blob(&hash, data)?;

        // Hold the lock across the index write so concurrent puts serialize.
        let mut index = self.index();
        let key = name.to_string();
        let previous = index.entry(target.to_string()).or_default().insert(
            key.clone(),
            IndexEntry {
                version,
                blob: hash.clone(),
            },
        );
        if let Err(e) = self.flush_index(&index) {
            // Memory must keep matching disk.
            if let Some(names) = index.get_mut(target) {
                match previous {
                    Some(entry) => {
                        names.insert(key, entry);
                    }
                    None => {
                        names.remove(&key);
                    }
                }
                if names.is_empty() {
                    index.remove(target);
                }
            }
            return Err(e);
        }

        debug!(target, %name, %version, blob = %hash, "stored record");
        Ok(StorageKey(hash))
    }

    fn get(&self, target: &str, name: &NamePath) -> Result<(Version, Vec<u8>), StorageError> {
        let entry = self
            .index()
            .get(target)
            .and_then(|names| names.get(&name.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                target: target.to_string(),
                name: name.to_string(),
            })?;

        let data = self.fs.read(&self.blob_path(&entry.blob))?;
        let actual = blake3::hash(&data).to_hex().to_string();
        if actual != entry.blob {
            return Err(StorageError::Corrupt {
                name: name.to_string(),
                reason: format!("blob hash {actual} does not match index {}", entry.blob),
            });
        }
        Ok((entry.version, data))
    }
}
