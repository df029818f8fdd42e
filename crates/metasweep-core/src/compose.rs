//! Composition of one run: defaults, group choices, value overrides,
//! interpolation, and the runtime subtree split.

use crate::defaults::{self, GroupChoices};
use crate::error::{ConfigError, ConfigResult};
use crate::interpolation::Resolvers;
use crate::node::{kind_of, ConfigNode};
use crate::overrides::{OverrideAssignment, OverrideKind};
use crate::run::{RunConfig, HYDRA_KEY};
use crate::source::ConfigSource;
use crate::sweep::SweepPlan;
use serde_yaml::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A combination that could not be composed or validated.
#[derive(Debug)]
pub struct RunFailure {
    pub index: usize,
    pub overrides: Vec<String>,
    pub error: ConfigError,
}

/// Every combination of a sweep, split into resolved runs and failures.
#[derive(Debug, Default)]
pub struct ComposedSweep {
    pub runs: Vec<RunConfig>,
    pub failures: Vec<RunFailure>,
}

impl ComposedSweep {
    #[must_use]
    pub fn total(&self) -> usize {
        self.runs.len() + self.failures.len()
    }
}

/// Builds [`RunConfig`]s from a config source and a primary config name.
#[derive(Clone)]
pub struct Composer {
    source: Arc<dyn ConfigSource>,
    primary: String,
    resolvers: Resolvers,
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer").field("primary", &self.primary).field("resolvers", &self.resolvers).finish()
    }
}

impl Composer {
    #[must_use]
    pub fn new(source: Arc<dyn ConfigSource>, primary: impl Into<String>) -> Self {
        Self { source, primary: primary.into(), resolvers: Resolvers::new() }
    }

    #[must_use]
    pub fn with_resolvers(mut self, resolvers: Resolvers) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Whether an override key names a config group rather than a value.
    #[must_use]
    pub fn is_group_key(&self, key: &str) -> bool {
        let group = key.split('@').next().unwrap_or_default();
        self.source.is_group(group.trim_start_matches('/'))
    }

    /// Compose a single run from its concrete assignments.
    pub fn compose(&self, index: usize, assignments: &[OverrideAssignment]) -> ConfigResult<RunConfig> {
        let mut choices = GroupChoices::new();
        let mut values = Vec::new();
        for assignment in assignments {
            if self.is_group_key(&assignment.key) {
                let key = assignment.key.trim_start_matches('/');
                let option = assignment.group_option();
                match assignment.kind {
                    OverrideKind::Change => choices.select(key, option),
                    OverrideKind::Add => choices.append(key, option),
                    OverrideKind::Force => choices.force(key, option),
                    OverrideKind::Delete => choices.select(key, None),
                }
            } else if assignment.key.contains('@') {
                return Err(ConfigError::InvalidOverride {
                    text: assignment.to_string(),
                    message: "'@package' is only valid on config groups".to_string(),
                });
            } else {
                values.push(assignment);
            }
        }

        let plan = defaults::expand(self.source.as_ref(), &self.primary, &choices)?;
        let mut config = plan.merge()?;
        for assignment in values {
            debug!(job_index = index, assignment = %assignment, "applying override");
            assignment.apply(&mut config)?;
        }

        let mut config = self.resolvers.resolve(&config)?;
        let hydra = match config.remove(HYDRA_KEY) {
            None | Some(Value::Null) => ConfigNode::new(),
            Some(Value::Mapping(map)) => ConfigNode::from(map),
            Some(other) => {
                return Err(ConfigError::TypeMismatch {
                    path: HYDRA_KEY.to_string(),
                    existing: "mapping",
                    incoming: kind_of(&other),
                })
            }
        };

        Ok(RunConfig::new(
            index,
            assignments.iter().map(ToString::to_string).collect(),
            plan.choices,
            config,
            hydra,
        ))
    }

    /// Compose every combination of `plan`, running `validate` on each.
    ///
    /// A failing combination is recorded and the rest still compose. When
    /// every combination fails with the same error the whole sweep fails
    /// with that error.
    pub fn compose_sweep<F>(&self, plan: &SweepPlan, validate: F) -> ConfigResult<ComposedSweep>
    where
        F: Fn(&RunConfig) -> ConfigResult<()>,
    {
        let mut sweep = ComposedSweep::default();
        for (index, assignments) in plan.combinations().enumerate() {
            let composed = self.compose(index, &assignments).and_then(|run| validate(&run).map(|()| run));
            match composed {
                Ok(run) => sweep.runs.push(run),
                Err(error) => {
                    warn!(job_index = index, error = %error, "combination failed");
                    sweep.failures.push(RunFailure {
                        index,
                        overrides: assignments.iter().map(ToString::to_string).collect(),
                        error,
                    });
                }
            }
        }

        if sweep.runs.is_empty() && !sweep.failures.is_empty() {
            let first = sweep.failures[0].error.to_string();
            if sweep.failures.iter().all(|f| f.error.to_string() == first) {
                return Err(sweep.failures.swap_remove(0).error);
            }
        }

        info!(runs = sweep.runs.len(), failed = sweep.failures.len(), "composed sweep");
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::Override;
    use crate::source::MemoryConfigSource;

    fn composer() -> Composer {
        let source = MemoryConfigSource::new()
            .with("train", "defaults:\n  - dataset: linear\n  - _self_\nseed: 0\nhydra:\n  job:\n    name: train\n")
            .with("dataset/linear", "x_dim: 1\n")
            .with("dataset/sinusoid", "x_dim: 1\namplitude: 1.0\n");
        Composer::new(Arc::new(source), "train")
    }

    fn assignments(args: &[&str]) -> Vec<OverrideAssignment> {
        args.iter().flat_map(|a| Override::parse(a).unwrap().assignments()).collect()
    }

    #[test]
    fn test_group_and_value_overrides() {
        let run = composer().compose(0, &assignments(&["dataset=sinusoid", "seed=3"])).unwrap();
        assert_eq!(run.config().get_path("dataset.amplitude").and_then(Value::as_f64), Some(1.0));
        assert_eq!(run.config().get("seed").and_then(Value::as_u64), Some(3));
        assert_eq!(run.choices().get("dataset"), Some(&Some("sinusoid".to_string())));
    }

    #[test]
    fn test_runtime_subtree_is_split() {
        let run = composer().compose(0, &[]).unwrap();
        assert!(run.config().get(HYDRA_KEY).is_none());
        assert_eq!(run.hydra().get_path("job.name").and_then(Value::as_str), Some("train"));
    }

    #[test]
    fn test_package_on_value_override_rejected() {
        let err = composer().compose(0, &assignments(&["seed@x=1"])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOverride { .. }));
    }

    #[test]
    fn test_partial_failure_keeps_other_runs() {
        let plan = SweepPlan::parse(&["dataset=linear,cubic"], true).unwrap();
        let sweep = composer().compose_sweep(&plan, |_| Ok(())).unwrap();
        assert_eq!(sweep.runs.len(), 1);
        assert_eq!(sweep.failures.len(), 1);
        assert_eq!(sweep.failures[0].index, 1);
    }

    #[test]
    fn test_shared_failure_aborts_sweep() {
        let plan = SweepPlan::parse(&["seed=1,2", "missing.key=3"], true).unwrap();
        let err = composer().compose_sweep(&plan, |_| Ok(())).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { ref path } if path == "missing.key"));
    }
}
