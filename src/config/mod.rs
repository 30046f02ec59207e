// src/config/mod.rs

//! Pipeline configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a pipeline file from disk (`loader.rs`).
//! - Validate it into factories and a dependency graph (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_pipeline, revision_of};
pub use model::{
    ComponentSection, ConfigSection, FactorySection, PipelineConfig, RawPipelineConfig, StateVectorSection,
    StorageSection,
};
pub use validate::validate_config;
