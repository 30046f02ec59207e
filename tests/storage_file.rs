// tests/storage_file.rs

mod common;
use crate::common::{TARGET, task_node};

use std::error::Error;
use std::fs;

use tempfile::tempdir;

use vectorfarm::fs::RealFileSystem;
use vectorfarm::model::{NamePath, Version};
use vectorfarm::storage::{FileStorage, Storage, StorageError, node_versions};

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn records_survive_reopening_on_disk() -> TestResult {
    let dir = tempdir()?;
    let root = dir.path().join("store");
    let value = NamePath::value(5, &task_node("t1"), "result", "depth")?;
    let node = NamePath::node(5, &task_node("t1"));

    {
        let store = FileStorage::open(RealFileSystem, &root)?;
        store.put(TARGET, &value, Version::new(1, 0, 0), b"0.0146")?;
        store.put(TARGET, &node, Version::new(1, 2, 0), b"{}")?;
    }

    assert!(root.join("index.json").is_file());
    assert!(!root.join("index.json.tmp").exists());

    let store = FileStorage::open(RealFileSystem, &root)?;
    assert_eq!(store.get(TARGET, &value)?, (Version::new(1, 0, 0), b"0.0146".to_vec()));
    assert_eq!(store.get_version(TARGET, &node)?, Some(Version::new(1, 2, 0)));
    Ok(())
}

#[test]
fn targets_are_kept_apart() -> TestResult {
    let dir = tempdir()?;
    let store = FileStorage::open(RealFileSystem, dir.path())?;
    let node = NamePath::node(5, &task_node("t1"));

    store.put(TARGET, &node, Version::new(1, 0, 0), b"{}")?;

    assert!(store.get_version("WASP-12b", &node)?.is_none());
    assert!(matches!(
        store.get("WASP-12b", &node),
        Err(StorageError::NotFound { .. })
    ));
    Ok(())
}

#[test]
fn overwriting_replaces_version_and_data() -> TestResult {
    let dir = tempdir()?;
    let store = FileStorage::open(RealFileSystem, dir.path())?;
    let value = NamePath::value(5, &task_node("t1"), "result", "depth")?;

    store.put(TARGET, &value, Version::new(1, 0, 0), b"old")?;
    store.put(TARGET, &value, Version::new(2, 0, 0), b"new")?;

    assert_eq!(store.get(TARGET, &value)?, (Version::new(2, 0, 0), b"new".to_vec()));
    Ok(())
}

#[test]
fn node_versions_reads_only_persisted_nodes() -> TestResult {
    let dir = tempdir()?;
    let store = FileStorage::open(RealFileSystem, dir.path())?;
    store.put(TARGET, &NamePath::node(5, &task_node("t2")), Version::new(3, 1, 4), b"{}")?;

    let nodes = [task_node("t1"), task_node("t2")];
    let versions = node_versions(&store, 5, TARGET, &nodes);

    assert_eq!(versions.len(), 1);
    assert_eq!(versions.get(&task_node("t2")), Some(&Version::new(3, 1, 4)));
    // Another run id has its own records.
    assert!(node_versions(&store, 6, TARGET, &nodes).is_empty());
    Ok(())
}

#[test]
fn unreadable_index_fails_to_open() -> TestResult {
    let dir = tempdir()?;
    fs::write(dir.path().join("index.json"), "{ not json")?;

    let err = FileStorage::open(RealFileSystem, dir.path()).unwrap_err();
    assert!(matches!(err, StorageError::Index(_)), "{err}");
    Ok(())
}

#[test]
fn missing_blob_is_an_error_not_a_panic() -> TestResult {
    let dir = tempdir()?;
    let store = FileStorage::open(RealFileSystem, dir.path())?;
    let value = NamePath::value(5, &task_node("t1"), "result", "depth")?;
    let key = store.put(TARGET, &value, Version::new(1, 0, 0), b"0.0146")?;

    fs::remove_file(dir.path().join("blobs").join(&key.0))?;

    assert!(matches!(store.get(TARGET, &value), Err(StorageError::Backend(_))));
    Ok(())
}
