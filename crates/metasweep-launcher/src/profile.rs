//! Launcher profiles, read from the `hydra.launcher` subtree of a run.

use crate::error::{LaunchError, LaunchResult};
use metasweep_core::RunConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Key of the profile inside the runtime subtree.
pub const LAUNCHER_KEY: &str = "launcher";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// Run the entry point as a child process.
    Local,
    /// Render a submission script and hand it to a batch scheduler.
    Batch,
    /// Materialise the job only.
    DryRun,
}

impl std::fmt::Display for LauncherKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Batch => f.write_str("batch"),
            Self::DryRun => f.write_str("dry_run"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LauncherProfile {
    #[serde(rename = "_target_", default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: LauncherKind,
    /// Command line of the training entry point.
    #[serde(default = "default_entry_point")]
    pub entry_point: Vec<String>,
    /// Scheduler command; the script path is appended.
    #[serde(default)]
    pub submit_command: Vec<String>,
    /// Prefix of directive lines, e.g. `#SBATCH`.
    #[serde(default)]
    pub directive_prefix: Option<String>,
    #[serde(default)]
    pub directives: BTreeMap<String, Value>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

fn default_kind() -> LauncherKind {
    LauncherKind::Local
}

fn default_entry_point() -> Vec<String> {
    ["python", "train.py", "--config-dir", "{config_dir}", "--config-name", "{config_name}"]
        .map(str::to_string)
        .to_vec()
}

fn default_concurrency() -> usize {
    1
}

fn default_timeout_secs() -> u64 {
    3600
}

impl Default for LauncherProfile {
    fn default() -> Self {
        Self {
            target: None,
            kind: default_kind(),
            entry_point: default_entry_point(),
            submit_command: Vec::new(),
            directive_prefix: None,
            directives: BTreeMap::new(),
            env: BTreeMap::new(),
            concurrency: default_concurrency(),
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

impl LauncherProfile {
    /// The profile of a run; the default local profile when the run has none.
    pub fn from_run(run: &RunConfig) -> LaunchResult<Self> {
        let profile = match run.hydra().get(LAUNCHER_KEY) {
            None | Some(Value::Null) => Self::default(),
            Some(value) => serde_yaml::from_value(value.clone())
                .map_err(|e| LaunchError::Profile(format!("hydra.{LAUNCHER_KEY}: {e}")))?,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> LaunchResult<()> {
        if self.entry_point.is_empty() && self.kind != LauncherKind::DryRun {
            return Err(LaunchError::Profile("'entry_point' must not be empty".to_string()));
        }
        if self.kind == LauncherKind::Batch && self.submit_command.is_empty() {
            return Err(LaunchError::Profile("batch profiles need a 'submit_command'".to_string()));
        }
        if self.concurrency == 0 {
            return Err(LaunchError::Profile("'concurrency' must be at least 1".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(LaunchError::Profile("'timeout_secs' must be at least 1".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Directive lines for a batch script, in key order.
    #[must_use]
    pub fn directive_lines(&self) -> Vec<String> {
        let prefix = self.directive_prefix.as_deref().unwrap_or("#SBATCH");
        self.directives
            .iter()
            .map(|(key, value)| match value {
                Value::Null | Value::Bool(true) => format!("{prefix} --{key}"),
                other => format!("{prefix} --{key}={}", metasweep_core::node::scalar_to_string(other)),
            })
            .collect()
    }
}

/// Values substituted into `{name}` placeholders of argv items.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    values: BTreeMap<&'static str, String>,
}

impl Placeholders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    #[must_use]
    pub fn render(&self, text: &str) -> String {
        self.values
            .iter()
            .fold(text.to_string(), |acc, (name, value)| acc.replace(&format!("{{{name}}}"), value))
    }

    #[must_use]
    pub fn render_all(&self, items: &[String]) -> Vec<String> {
        items.iter().map(|item| self.render(item)).collect()
    }
}
