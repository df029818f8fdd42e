//! Fully resolved per-run configuration.

use crate::error::ConfigResult;
use crate::node::{scalar_to_string, ConfigNode};
use serde::Serialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

/// Top-level key holding the runtime (launcher) subtree.
pub const HYDRA_KEY: &str = "hydra";

/// One resolved run. Immutable once built; handed by value to the launcher.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunConfig {
    index: usize,
    overrides: Vec<String>,
    choices: BTreeMap<String, Option<String>>,
    config: ConfigNode,
    hydra: ConfigNode,
}

impl RunConfig {
    pub(crate) fn new(
        index: usize,
        overrides: Vec<String>,
        choices: BTreeMap<String, Option<String>>,
        config: ConfigNode,
        hydra: ConfigNode,
    ) -> Self {
        Self { index, overrides, choices, config, hydra }
    }

    /// Position in the sweep.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The overrides that produced this run, as written.
    #[must_use]
    pub fn overrides(&self) -> &[String] {
        &self.overrides
    }

    /// Final group choices, `None` for disabled groups.
    #[must_use]
    pub fn choices(&self) -> &BTreeMap<String, Option<String>> {
        &self.choices
    }

    /// The job config, without the runtime subtree.
    #[must_use]
    pub fn config(&self) -> &ConfigNode {
        &self.config
    }

    /// The runtime subtree (`hydra:` in the composed tree).
    #[must_use]
    pub fn hydra(&self) -> &ConfigNode {
        &self.hydra
    }

    /// Value of the top-level `save_dir` key, when set to a non-empty string.
    #[must_use]
    pub fn save_dir(&self) -> Option<String> {
        match self.config.get("save_dir")? {
            Value::Null => None,
            value => Some(scalar_to_string(value)).filter(|s| !s.is_empty()),
        }
    }

    /// `key=value` pairs of this run's overrides, sorted by key, joined by
    /// commas. Runtime and `save_dir` overrides are left out.
    #[must_use]
    pub fn override_dirname(&self) -> String {
        let mut parts: Vec<&str> = self
            .overrides
            .iter()
            .map(String::as_str)
            .filter(|o| {
                let key = o.trim_start_matches(['+', '~']).split('=').next().unwrap_or_default();
                !(key == "save_dir" || key.starts_with(HYDRA_KEY))
            })
            .collect();
        parts.sort_by(|a, b| a.trim_start_matches(['+', '~']).cmp(b.trim_start_matches(['+', '~'])));
        parts.join(",")
    }

    /// The job config plus the runtime subtree, as one tree.
    pub fn full_config(&self) -> ConfigResult<ConfigNode> {
        let mut full = self.config.clone();
        if !self.hydra.is_empty() {
            full.merge_at(HYDRA_KEY, self.hydra.clone())?;
        }
        Ok(full)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        self.config.to_yaml_string()
    }
}
