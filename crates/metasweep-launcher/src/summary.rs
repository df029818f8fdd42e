//! Per-job outcomes of one invocation.

use crate::error::LaunchError;
use crate::submit::JobResult;
use metasweep_core::RunFailure;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Failed,
    Cancelled,
    /// The combination never became a job: composition, validation, or
    /// its launcher profile failed.
    Invalid,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => f.write_str("submitted"),
            Self::Failed => f.write_str("failed"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Invalid => f.write_str("invalid"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub index: usize,
    pub status: JobStatus,
    pub overrides: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Offending key, for configuration errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    pub attempts: u32,
}

impl JobOutcome {
    /// Outcome of a combination that failed before submission.
    #[must_use]
    pub fn invalid(failure: &RunFailure) -> Self {
        Self {
            index: failure.index,
            status: JobStatus::Invalid,
            overrides: failure.overrides.clone(),
            job_dir: None,
            external_id: None,
            error: Some(failure.error.to_string()),
            key_path: failure.error.key_path().map(str::to_string),
            attempts: 0,
        }
    }

    /// Outcome of a materialised job whose profile or files were rejected.
    #[must_use]
    pub fn rejected(index: usize, overrides: Vec<String>, job_dir: Option<PathBuf>, error: &LaunchError) -> Self {
        let key_path = match error {
            LaunchError::Config(e) => e.key_path().map(str::to_string),
            _ => None,
        };
        Self {
            index,
            status: JobStatus::Invalid,
            overrides,
            job_dir,
            external_id: None,
            error: Some(error.to_string()),
            key_path,
            attempts: 0,
        }
    }

    /// Outcome of a job that went through the submitter.
    #[must_use]
    pub fn from_result(result: JobResult, overrides: Vec<String>, job_dir: PathBuf) -> Self {
        let (status, external_id, error) = match result.outcome {
            Ok(submission) => (JobStatus::Submitted, submission.external_id, None),
            Err(LaunchError::Cancelled { .. }) => (JobStatus::Cancelled, None, None),
            Err(e) => (JobStatus::Failed, None, Some(e.to_string())),
        };
        Self {
            index: result.index,
            status,
            overrides,
            job_dir: Some(job_dir),
            external_id,
            error,
            key_path: None,
            attempts: result.attempts,
        }
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.status == JobStatus::Submitted
    }
}

/// Summary of a (multi)run.
#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub sweep_id: String,
    pub config_name: String,
    pub multirun: bool,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    pub jobs: Vec<JobOutcome>,
    pub duration_ms: u64,
    /// Fraction of jobs submitted (0.0 to 1.0).
    pub success_rate: f64,
}

impl SweepSummary {
    #[must_use]
    pub fn new(
        sweep_id: String,
        config_name: String,
        multirun: bool,
        dry_run: bool,
        manifest: Option<PathBuf>,
        mut jobs: Vec<JobOutcome>,
        duration: Duration,
    ) -> Self {
        jobs.sort_by_key(|j| j.index);
        let submitted = jobs.iter().filter(|j| j.is_submitted()).count();
        let success_rate = if jobs.is_empty() { 0.0 } else { submitted as f64 / jobs.len() as f64 };
        Self {
            sweep_id,
            config_name,
            multirun,
            dry_run,
            manifest,
            jobs,
            duration_ms: duration.as_millis() as u64,
            success_rate,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    /// True when every job was submitted. An empty sweep counts as complete.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.jobs.iter().all(JobOutcome::is_submitted)
    }
}
