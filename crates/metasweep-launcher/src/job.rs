use crate::layout::SweepLayout;
use crate::profile::{LauncherKind, LauncherProfile, Placeholders};
use chrono::{DateTime, Local};
use metasweep_core::RunConfig;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

pub const ENV_JOB_INDEX: &str = "METASWEEP_JOB_INDEX";
pub const ENV_JOB_DIR: &str = "METASWEEP_JOB_DIR";
pub const ENV_CONFIG: &str = "METASWEEP_CONFIG";
pub const ENV_OVERRIDE_DIRNAME: &str = "METASWEEP_OVERRIDE_DIRNAME";
pub const ENV_SWEEP_ID: &str = "METASWEEP_SWEEP_ID";
pub const ENV_FULL_ERROR: &str = "HYDRA_FULL_ERROR";

/// Invocation-wide facts shared by every job of a sweep.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub sweep_id: Uuid,
    pub started_at: DateTime<Local>,
    pub config_name: String,
    pub full_error: bool,
}

impl LaunchContext {
    #[must_use]
    pub fn new(config_name: impl Into<String>, full_error: bool) -> Self {
        Self { sweep_id: Uuid::new_v4(), started_at: Local::now(), config_name: config_name.into(), full_error }
    }
}

/// Everything a launcher needs to start one job. Written to `job.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub index: usize,
    pub sweep_id: Uuid,
    pub job_dir: PathBuf,
    pub config_path: PathBuf,
    pub overrides: Vec<String>,
    pub override_dirname: String,
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub profile: LauncherProfile,
}

impl JobDescriptor {
    #[must_use]
    pub fn build(run: &RunConfig, mut profile: LauncherProfile, layout: &SweepLayout, ctx: &LaunchContext) -> Self {
        let job_dir = layout.job_dir(run);
        let job_dir = std::path::absolute(&job_dir).unwrap_or(job_dir);
        let config_path = SweepLayout::config_path(&job_dir);
        let override_dirname = run.override_dirname();

        let placeholders = Placeholders::new()
            .with("config_dir", SweepLayout::hydra_dir(&job_dir).display().to_string())
            .with("config_name", "config")
            .with("job_dir", job_dir.display().to_string())
            .with("index", run.index().to_string());
        let argv = placeholders.render_all(&profile.entry_point);
        for value in profile.directives.values_mut() {
            if let Value::String(text) = value {
                *text = placeholders.render(text);
            }
        }

        let mut env: BTreeMap<String, String> =
            profile.env.iter().map(|(k, v)| (k.clone(), placeholders.render(v))).collect();
        env.insert(ENV_JOB_INDEX.to_string(), run.index().to_string());
        env.insert(ENV_JOB_DIR.to_string(), job_dir.display().to_string());
        env.insert(ENV_CONFIG.to_string(), config_path.display().to_string());
        env.insert(ENV_OVERRIDE_DIRNAME.to_string(), override_dirname.clone());
        env.insert(ENV_SWEEP_ID.to_string(), ctx.sweep_id.to_string());
        if ctx.full_error {
            env.insert(ENV_FULL_ERROR.to_string(), "1".to_string());
        }

        Self {
            index: run.index(),
            sweep_id: ctx.sweep_id,
            job_dir,
            config_path,
            overrides: run.overrides().to_vec(),
            override_dirname,
            argv,
            env,
            profile,
        }
    }

    #[must_use]
    pub fn kind(&self) -> LauncherKind {
        self.profile.kind
    }

    /// Force this job through the dry-run launcher.
    #[must_use]
    pub fn into_dry_run(mut self) -> Self {
        self.profile.kind = LauncherKind::DryRun;
        self
    }
}
