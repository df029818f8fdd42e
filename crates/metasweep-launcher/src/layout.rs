//! On-disk layout of a (multi)run.
//!
//! ```text
//! <save_dir>/multirun.yaml            multirun only
//! <save_dir>/<index>/                 job dir (`<save_dir>/` for a single run)
//!     .hydra/config.yaml
//!     .hydra/hydra.yaml
//!     .hydra/overrides.yaml
//!     job.json
//! ```

use crate::error::LaunchResult;
use crate::job::JobDescriptor;
use chrono::{DateTime, Local};
use metasweep_core::RunConfig;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const OUTPUTS_DIR: &str = "outputs";
pub const HYDRA_DIR: &str = ".hydra";
pub const CONFIG_FILE: &str = "config.yaml";
pub const HYDRA_FILE: &str = "hydra.yaml";
pub const OVERRIDES_FILE: &str = "overrides.yaml";
pub const DESCRIPTOR_FILE: &str = "job.json";
pub const MULTIRUN_FILE: &str = "multirun.yaml";

#[derive(Debug, Clone)]
pub struct SweepLayout {
    /// Used when a run has no `save_dir`.
    default_root: PathBuf,
    multirun: bool,
}

impl SweepLayout {
    #[must_use]
    pub fn new(default_root: PathBuf, multirun: bool) -> Self {
        Self { default_root, multirun }
    }

    /// Layout whose default root is `<base>/outputs/<YYYY-MM-DD_HH-MM-SS>`.
    #[must_use]
    pub fn timestamped(base: &Path, started_at: DateTime<Local>, multirun: bool) -> Self {
        Self::new(base.join(OUTPUTS_DIR).join(started_at.format("%Y-%m-%d_%H-%M-%S").to_string()), multirun)
    }

    #[must_use]
    pub fn is_multirun(&self) -> bool {
        self.multirun
    }

    /// Root directory of a run: its `save_dir`, else the default root.
    #[must_use]
    pub fn root_for(&self, run: &RunConfig) -> PathBuf {
        run.save_dir().map_or_else(|| self.default_root.clone(), PathBuf::from)
    }

    #[must_use]
    pub fn job_dir(&self, run: &RunConfig) -> PathBuf {
        let root = self.root_for(run);
        if self.multirun {
            root.join(run.index().to_string())
        } else {
            root
        }
    }

    #[must_use]
    pub fn hydra_dir(job_dir: &Path) -> PathBuf {
        job_dir.join(HYDRA_DIR)
    }

    #[must_use]
    pub fn config_path(job_dir: &Path) -> PathBuf {
        Self::hydra_dir(job_dir).join(CONFIG_FILE)
    }

    /// Write a job's config files and descriptor.
    pub fn write_job(&self, run: &RunConfig, descriptor: &JobDescriptor) -> LaunchResult<()> {
        let hydra_dir = Self::hydra_dir(&descriptor.job_dir);
        std::fs::create_dir_all(&hydra_dir)?;
        std::fs::write(hydra_dir.join(CONFIG_FILE), run.to_yaml()?)?;
        std::fs::write(hydra_dir.join(HYDRA_FILE), run.hydra().to_yaml_string()?)?;
        std::fs::write(hydra_dir.join(OVERRIDES_FILE), serde_yaml::to_string(run.overrides())?)?;
        std::fs::write(descriptor.job_dir.join(DESCRIPTOR_FILE), serde_json::to_string_pretty(descriptor)?)?;
        Ok(())
    }

    /// Write `multirun.yaml` into the root of the first job. Returns its path.
    pub fn write_manifest(&self, manifest: &MultirunManifest) -> LaunchResult<Option<PathBuf>> {
        if !self.multirun {
            return Ok(None);
        }
        let Some(first) = manifest.jobs.first() else {
            return Ok(None);
        };
        let root = first.job_dir.parent().map_or_else(|| self.default_root.clone(), Path::to_path_buf);
        std::fs::create_dir_all(&root)?;
        let path = root.join(MULTIRUN_FILE);
        std::fs::write(&path, serde_yaml::to_string(manifest)?)?;
        Ok(Some(path))
    }
}

/// Contents of `multirun.yaml`.
#[derive(Debug, Clone, Serialize)]
pub struct MultirunManifest {
    pub sweep_id: String,
    pub started_at: String,
    pub config_name: String,
    pub overrides: Vec<String>,
    pub jobs: Vec<ManifestJob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestJob {
    pub index: usize,
    pub job_dir: PathBuf,
    pub overrides: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamped_root() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let layout = SweepLayout::timestamped(Path::new("/work"), started, true);
        assert_eq!(layout.default_root, PathBuf::from("/work/outputs/2024-03-09_14-05-07"));
        assert!(layout.is_multirun());
    }

    #[test]
    fn test_config_path() {
        assert_eq!(SweepLayout::config_path(Path::new("/out/2")), PathBuf::from("/out/2/.hydra/config.yaml"));
    }
}
