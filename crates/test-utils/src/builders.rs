#![allow(dead_code)]

use vectorfarm::config::{PipelineConfig, parse_pipeline};

/// Builder for pipeline files to simplify test setup.
///
/// Renders TOML and runs it through the real loader, so tests exercise the
/// same validation as `vectorfarm run`.
pub struct PipelineBuilder {
    settings: Vec<(String, String)>,
    storage_kind: String,
    components: Vec<(String, String, ComponentBuilder)>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            settings: Vec::new(),
            storage_kind: "memory".to_string(),
            components: Vec::new(),
        }
    }

    /// Set a `[config]` key; `value` is raw TOML (`"4"`, `"\"replace\""`).
    pub fn setting(mut self, key: &str, value: &str) -> Self {
        self.settings.push((key.to_string(), value.to_string()));
        self
    }

    pub fn task(self, factory: &str, component: ComponentBuilder) -> Self {
        self.component("task", factory, component)
    }

    pub fn event(self, factory: &str, component: ComponentBuilder) -> Self {
        self.component("event", factory, component)
    }

    pub fn analysis(self, factory: &str, component: ComponentBuilder) -> Self {
        self.component("analysis", factory, component)
    }

    pub fn regress(self, factory: &str, component: ComponentBuilder) -> Self {
        self.component("regress", factory, component)
    }

    fn component(mut self, section: &str, factory: &str, component: ComponentBuilder) -> Self {
        self.components
            .push((section.to_string(), factory.to_string(), component));
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = String::from("[config]\n");
        for (key, value) in &self.settings {
            out.push_str(&format!("{key} = {value}\n"));
        }
        out.push_str(&format!("\n[storage]\nkind = {:?}\n", self.storage_kind));

        for (section, factory, c) in &self.components {
            let table = match section.as_str() {
                "analysis" => "analyzer",
                "regress" => "regression",
                _ => "algorithm",
            };
            let header = format!("{section}.{factory}.{table}.{}", c.name);
            out.push_str(&format!("\n[{header}]\n"));
            out.push_str(&format!("version = {:?}\n", c.version));
            out.push_str(&format!("cmd = {:?}\n", c.cmd));
            if c.ps_hint > 0 {
                out.push_str(&format!("ps_hint = {}\n", c.ps_hint));
            }
            if !c.depends.is_empty() {
                let deps: Vec<String> = c.depends.iter().map(|d| format!("{d:?}")).collect();
                out.push_str(&format!("depends = [{}]\n", deps.join(", ")));
            }

            let mut state_vectors: Vec<&str> = Vec::new();
            for (sv, _, _) in &c.outputs {
                if !state_vectors.contains(&sv.as_str()) {
                    state_vectors.push(sv);
                }
            }
            for sv in state_vectors {
                let values: Vec<String> = c
                    .outputs
                    .iter()
                    .filter(|(s, _, _)| s == sv)
                    .map(|(_, value, version)| format!("{value} = {version:?}"))
                    .collect();
                out.push_str(&format!(
                    "\n[{header}.state_vector.{sv}]\nversion = \"1.0.0\"\nvalues = {{ {} }}\n",
                    values.join(", ")
                ));
            }
        }
        out
    }

    pub fn build(self) -> PipelineConfig {
        let text = self.to_toml();
        parse_pipeline(&text).unwrap_or_else(|e| panic!("Failed to build valid pipeline from builder: {e}\n{text}"))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one component section.
pub struct ComponentBuilder {
    name: String,
    version: String,
    cmd: String,
    ps_hint: u32,
    depends: Vec<String>,
    outputs: Vec<(String, String, String)>,
}

impl ComponentBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            cmd: format!("echo {name}"),
            ps_hint: 0,
            depends: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.cmd = cmd.to_string();
        self
    }

    pub fn ps_hint(mut self, ps_hint: u32) -> Self {
        self.ps_hint = ps_hint;
        self
    }

    /// `factory.component[.state_vector[.value]]`.
    pub fn depends(mut self, reference: &str) -> Self {
        self.depends.push(reference.to_string());
        self
    }

    /// Declare an output value at version `1.0.0`.
    pub fn output(self, state_vector: &str, value: &str) -> Self {
        self.output_versioned(state_vector, value, "1.0.0")
    }

    pub fn output_versioned(mut self, state_vector: &str, value: &str, version: &str) -> Self {
        self.outputs
            .push((state_vector.to_string(), value.to_string(), version.to_string()));
        self
    }
}
