// src/config/model.rs

use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::dag::DependencyGraph;
use crate::model::factory::Factory;
use crate::model::version::Version;
use crate::types::{ResubmitBehaviour, StorageKind};

/// Top-level pipeline file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// port = 8081
/// pool_size = 4
///
/// [storage]
/// kind = "file"
/// path = ".vectorfarm/store"
///
/// [task.transit.algorithm.whitelight]
/// version = "1.0.0"
/// cmd = "python -m transit.whitelight"
/// depends = ["system.finalize"]
///
/// [task.transit.algorithm.whitelight.state_vector.result]
/// version = "1.0.0"
/// values = { depth = "1.0.0" }
/// ```
///
/// Factory tables keep their file order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPipelineConfig {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub storage: StorageSection,

    #[serde(default)]
    pub task: IndexMap<String, FactorySection>,

    #[serde(default)]
    pub event: IndexMap<String, FactorySection>,

    #[serde(default)]
    pub analysis: IndexMap<String, FactorySection>,

    #[serde(default)]
    pub regress: IndexMap<String, FactorySection>,
}

/// `[config]` section: coordinator and runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Address the coordinator listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of jobs in flight.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Workers must register with this incarnation.
    #[serde(default = "default_incarnation")]
    pub incarnation: u64,

    /// Longest silence tolerated from a worker holding a job.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// How often workers report on a running job.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// `"queue"` (default) or `"replace"`.
    #[serde(default)]
    pub resubmit_behaviour: ResubmitBehaviour,

    /// Maximum number of queued run requests per (run, target).
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_pool_size() -> usize {
    4
}

fn default_incarnation() -> u64 {
    1
}

fn default_job_timeout_secs() -> u64 {
    3600
}

fn default_status_interval_secs() -> u64 {
    10
}

fn default_queue_length() -> usize {
    1
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            port: default_port(),
            pool_size: default_pool_size(),
            incarnation: default_incarnation(),
            job_timeout_secs: default_job_timeout_secs(),
            status_interval_secs: default_status_interval_secs(),
            resubmit_behaviour: ResubmitBehaviour::default(),
            queue_length: default_queue_length(),
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageSection {
    #[serde(default)]
    pub kind: StorageKind,

    /// Root directory of file storage, relative to the pipeline file.
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".vectorfarm/store")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            kind: StorageKind::default(),
            path: default_storage_path(),
        }
    }
}

/// `[<kind>.<factory>]` section.
///
/// Only the component table matching the section kind may be used:
/// `algorithm` under `task`/`event`, `analyzer` under `analysis`,
/// `regression` under `regress`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorySection {
    #[serde(default)]
    pub algorithm: IndexMap<String, ComponentSection>,

    #[serde(default)]
    pub analyzer: IndexMap<String, ComponentSection>,

    #[serde(default)]
    pub regression: IndexMap<String, ComponentSection>,
}

/// `[<kind>.<factory>.<table>.<component>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSection {
    pub version: Version,

    pub cmd: String,

    #[serde(default)]
    pub ps_hint: u32,

    /// `factory.component[.state_vector[.value]]` references.
    #[serde(default)]
    pub depends: Vec<String>,

    #[serde(default)]
    pub state_vector: IndexMap<String, StateVectorSection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateVectorSection {
    pub version: Version,

    /// Value name to value version.
    #[serde(default)]
    pub values: IndexMap<String, Version>,
}

/// A validated pipeline, ready to schedule.
///
/// Constructed from [`RawPipelineConfig`] via `TryFrom`, which resolves
/// every reference and rejects cycles.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub config: ConfigSection,
    pub storage: StorageSection,
    pub factories: Vec<Arc<dyn Factory>>,
    pub graph: Arc<DependencyGraph>,
    /// blake3 hash of the pipeline file. Empty when the configuration was
    /// not built from text.
    pub revision: String,
}
