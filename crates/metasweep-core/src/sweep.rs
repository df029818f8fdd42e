//! Multirun sweep expansion.
//!
//! Every override with more than one value is an axis. Runs are the
//! Cartesian product of all axes in the order the overrides were written,
//! with the first axis varying slowest.

use crate::error::{ConfigError, ConfigResult};
use crate::overrides::{Override, OverrideAssignment};
use tracing::debug;

/// A single sweep axis, for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepAxis {
    pub key: String,
    pub len: usize,
}

/// The overrides of one invocation and the runs they expand to.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    overrides: Vec<Override>,
    /// Per-override value counts, `1` for fixed overrides.
    radices: Vec<usize>,
    runs: usize,
}

impl SweepPlan {
    /// Build a plan from parsed overrides.
    ///
    /// Without `multirun`, any sweep fails with `MultirunRequired`.
    pub fn new(overrides: Vec<Override>, multirun: bool) -> ConfigResult<Self> {
        if !multirun {
            if let Some(sweep) = overrides.iter().find(|o| o.is_sweep()) {
                return Err(ConfigError::MultirunRequired { key: sweep.key.clone() });
            }
        }
        let radices: Vec<usize> = overrides.iter().map(|o| o.assignments().len()).collect();
        let mut runs: usize = 1;
        for (o, radix) in overrides.iter().zip(&radices) {
            runs = runs.checked_mul(*radix).ok_or_else(|| ConfigError::InvalidOverride {
                text: o.text.clone(),
                message: "the sweep has too many combinations".to_string(),
            })?;
        }
        let plan = Self { overrides, radices, runs };
        debug!(axes = plan.axes().len(), runs = plan.len(), "built sweep plan");
        Ok(plan)
    }

    /// Parse raw command-line overrides into a plan.
    pub fn parse<S: AsRef<str>>(args: &[S], multirun: bool) -> ConfigResult<Self> {
        let overrides = args.iter().map(|a| Override::parse(a.as_ref())).collect::<ConfigResult<Vec<_>>>()?;
        Self::new(overrides, multirun)
    }

    #[must_use]
    pub fn overrides(&self) -> &[Override] {
        &self.overrides
    }

    #[must_use]
    pub fn axes(&self) -> Vec<SweepAxis> {
        self.overrides
            .iter()
            .zip(&self.radices)
            .filter(|(o, _)| o.is_sweep())
            .map(|(o, len)| SweepAxis { key: o.key.clone(), len: *len })
            .collect()
    }

    /// Number of runs; an empty axis yields zero.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assignments for run `index`, in override order.
    #[must_use]
    pub fn combination(&self, index: usize) -> Option<Vec<OverrideAssignment>> {
        if index >= self.len() {
            return None;
        }
        let mut picks = vec![0; self.overrides.len()];
        let mut remaining = index;
        for (slot, radix) in picks.iter_mut().zip(&self.radices).rev() {
            *slot = remaining % radix;
            remaining /= radix;
        }
        Some(
            self.overrides
                .iter()
                .zip(picks)
                .filter_map(|(o, pick)| o.assignments().into_iter().nth(pick))
                .collect(),
        )
    }

    /// All runs in job-index order.
    pub fn combinations(&self) -> impl Iterator<Item = Vec<OverrideAssignment>> + '_ {
        (0..self.len()).filter_map(|i| self.combination(i))
    }
}
