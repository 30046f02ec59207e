// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{PipelineConfig, RawPipelineConfig};
use crate::errors::Result;

/// Load a pipeline file from a given path and return the raw
/// `RawPipelineConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation (references, cycles, etc.). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    let config: RawPipelineConfig = toml::from_str(&contents)?;
    Ok(config)
}

/// Parse and validate pipeline text, stamping it with its revision.
pub fn parse_pipeline(contents: &str) -> Result<PipelineConfig> {
    let raw: RawPipelineConfig = toml::from_str(contents)?;
    let mut config = PipelineConfig::try_from(raw)?;
    config.revision = revision_of(contents);
    Ok(config)
}

/// Load a pipeline file from path and validate it.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Resolves every `depends` reference and rejects cycles.
/// - Records the blake3 revision of the file text.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_pipeline(&contents)
}

/// Hex blake3 hash of the pipeline text.
pub fn revision_of(contents: &str) -> String {
    blake3::hash(contents.as_bytes()).to_hex().to_string()
}

/// Helper to resolve a default pipeline path: `Pipeline.toml` in the
/// current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Pipeline.toml")
}
