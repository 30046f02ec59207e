// src/config/validate.rs

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::model::{ComponentSection, FactorySection, PipelineConfig, RawPipelineConfig};
use crate::dag::DependencyGraph;
use crate::errors::{PipelineError, Result};
use crate::model::component::{ComponentSpec, Outputs, StateVector};
use crate::model::factory::{DeclaredComponent, DeclaredFactory, Factory, FactoryKind};
use crate::model::names::validate_component;
use crate::model::reference::Catalog;
use crate::types::{NodeId, StorageKind};

impl TryFrom<RawPipelineConfig> for PipelineConfig {
    type Error = PipelineError;

    fn try_from(raw: RawPipelineConfig) -> std::result::Result<Self, Self::Error> {
        validate_global_config(&raw)?;
        let factories = build_factories(&raw)?;
        let graph = DependencyGraph::build(&factories)?;

        Ok(PipelineConfig {
            config: raw.config,
            storage: raw.storage,
            factories,
            graph: Arc::new(graph),
            revision: String::new(),
        })
    }
}

/// Validate a raw configuration without keeping the result.
pub fn validate_config(raw: &RawPipelineConfig) -> Result<()> {
    PipelineConfig::try_from(raw.clone()).map(|_| ())
}

fn config_error(msg: impl Into<String>) -> PipelineError {
    PipelineError::Configuration(msg.into())
}

fn validate_global_config(cfg: &RawPipelineConfig) -> Result<()> {
    let c = &cfg.config;

    if c.pool_size == 0 {
        return Err(config_error("[config].pool_size must be >= 1 (got 0)"));
    }
    if c.queue_length == 0 {
        return Err(config_error("[config].queue_length must be >= 1 (got 0)"));
    }
    if c.job_timeout_secs == 0 {
        return Err(config_error("[config].job_timeout_secs must be > 0"));
    }
    if c.status_interval_secs == 0 {
        return Err(config_error("[config].status_interval_secs must be > 0"));
    }
    if c.status_interval_secs >= c.job_timeout_secs {
        return Err(config_error(format!(
            "[config].status_interval_secs ({}) must be shorter than job_timeout_secs ({})",
            c.status_interval_secs, c.job_timeout_secs
        )));
    }
    if cfg.storage.kind == StorageKind::File && cfg.storage.path.as_os_str().is_empty() {
        return Err(config_error("[storage].path must not be empty for file storage"));
    }

    Ok(())
}

/// Sections in declaration order, tagged with their kind.
fn sections(cfg: &RawPipelineConfig) -> impl Iterator<Item = (FactoryKind, &String, &FactorySection)> {
    fn tagged(
        kind: FactoryKind,
        map: &IndexMap<String, FactorySection>,
    ) -> impl Iterator<Item = (FactoryKind, &String, &FactorySection)> {
        map.iter().map(move |(name, section)| (kind, name, section))
    }
    tagged(FactoryKind::Task, &cfg.task)
        .chain(tagged(FactoryKind::Event, &cfg.event))
        .chain(tagged(FactoryKind::Analysis, &cfg.analysis))
        .chain(tagged(FactoryKind::Regress, &cfg.regress))
}

/// The component table a section uses, rejecting tables of other kinds.
fn component_table<'a>(
    kind: FactoryKind,
    name: &str,
    section: &'a FactorySection,
) -> Result<&'a IndexMap<String, ComponentSection>> {
    let tables = [
        ("algorithm", &section.algorithm),
        ("analyzer", &section.analyzer),
        ("regression", &section.regression),
    ];

    let expected = kind.component_table();
    for (table, entries) in tables {
        if table != expected && !entries.is_empty() {
            return Err(config_error(format!(
                "{kind} factory '{name}' declares a '{table}' table; {kind} factories use '{expected}'"
            )));
        }
    }

    let components = match kind {
        FactoryKind::Task | FactoryKind::Event => &section.algorithm,
        FactoryKind::Analysis => &section.analyzer,
        FactoryKind::Regress => &section.regression,
    };
    if components.is_empty() {
        return Err(config_error(format!(
            "{kind} factory '{name}' declares no [{kind}.{name}.{expected}.<name>] sections"
        )));
    }
    Ok(components)
}

fn outputs_of(kind: FactoryKind, factory: &str, name: &str, component: &ComponentSection) -> Result<Outputs> {
    let at = |what: String| config_error(format!("{kind}.{factory}.{}.{name}: {what}", kind.component_table()));

    let mut outputs = Outputs::default();
    for (sv_name, sv) in &component.state_vector {
        validate_component("state vector", sv_name).map_err(|e| at(e.to_string()))?;
        for value in sv.values.keys() {
            validate_component("value", value).map_err(|e| at(e.to_string()))?;
        }
        outputs.state_vectors.insert(
            sv_name.clone(),
            StateVector {
                name: sv_name.clone(),
                version: sv.version,
                values: sv.values.clone(),
            },
        );
    }
    Ok(outputs)
}

fn build_factories(cfg: &RawPipelineConfig) -> Result<Vec<Arc<dyn Factory>>> {
    // Pass 1: names and outputs, so references can point anywhere.
    let mut seen: HashMap<&str, FactoryKind> = HashMap::new();
    let mut catalog = Catalog::new();
    let mut declared = Vec::new();

    for (kind, name, section) in sections(cfg) {
        validate_component("factory", name).map_err(|e| config_error(e.to_string()))?;
        if let Some(previous) = seen.insert(name.as_str(), kind) {
            return Err(config_error(format!(
                "factory '{name}' is declared both as {previous} and as {kind}; factory names must be unique"
            )));
        }

        let components = component_table(kind, name, section)?;
        let mut specs = Vec::with_capacity(components.len());
        for (component_name, component) in components {
            validate_component(kind.component_table(), component_name).map_err(|e| config_error(e.to_string()))?;
            let outputs = Arc::new(outputs_of(kind, name, component_name, component)?);
            catalog.insert(
                NodeId::new(kind.node_kind(), name.as_str(), component_name.as_str()),
                Arc::clone(&outputs),
            );
            specs.push((
                ComponentSpec {
                    name: component_name.clone(),
                    version: component.version,
                    cmd: component.cmd.clone(),
                    ps_hint: component.ps_hint,
                    outputs,
                },
                &component.depends,
            ));
        }
        declared.push((kind, name, specs));
    }

    if declared.is_empty() {
        return Err(config_error(
            "pipeline must declare at least one [task|event|analysis|regress.<name>] factory",
        ));
    }

    // Pass 2: resolve references against the full catalog.
    let mut factories = Vec::with_capacity(declared.len());
    for (kind, name, specs) in declared {
        let mut components = Vec::with_capacity(specs.len());
        for (spec, depends) in specs {
            let depends = depends
                .iter()
                .map(|text| catalog.resolve(text))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    config_error(format!("{kind}.{name}.{}.{}: {e}", kind.component_table(), spec.name))
                })?;
            components.push(DeclaredComponent { spec, depends });
        }
        factories.push(DeclaredFactory::new(kind, name.as_str(), components).into_shared());
    }

    Ok(factories)
}
