//! Turns a composed sweep into materialised, submitted jobs.

use crate::error::LaunchResult;
use crate::job::{JobDescriptor, LaunchContext};
use crate::launcher::LauncherSet;
use crate::layout::{ManifestJob, MultirunManifest, SweepLayout};
use crate::profile::{LauncherKind, LauncherProfile};
use crate::progress::{ProgressSink, StdoutProgressSink};
use crate::submit::{CancelFlag, Submitter};
use crate::summary::{JobOutcome, SweepSummary};
use metasweep_core::{ComposedSweep, RunConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-invocation switches.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    /// Materialise every job but submit through the dry-run launcher.
    pub dry_run: bool,
    /// One limit for every job, replacing each profile's `concurrency`.
    pub concurrency: Option<usize>,
    /// The command-line overrides, recorded in `multirun.yaml`.
    pub overrides: Vec<String>,
}

pub struct SweepRunner {
    layout: SweepLayout,
    ctx: LaunchContext,
    launchers: LauncherSet,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
    retry_delays: Option<(Duration, Duration)>,
}

impl SweepRunner {
    #[must_use]
    pub fn new(layout: SweepLayout, ctx: LaunchContext) -> Self {
        Self {
            layout,
            ctx,
            launchers: LauncherSet::default(),
            progress: Arc::new(StdoutProgressSink),
            cancel: CancelFlag::new(),
            retry_delays: None,
        }
    }

    #[must_use]
    pub fn with_launchers(mut self, launchers: LauncherSet) -> Self {
        self.launchers = launchers;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_delays = Some((initial, max));
        self
    }

    /// Build and write the job of every run. Runs whose profile or files
    /// are rejected come back as outcomes instead of jobs.
    pub fn prepare(&self, runs: &[RunConfig], dry_run: bool) -> (Vec<JobDescriptor>, Vec<JobOutcome>) {
        let mut jobs = Vec::with_capacity(runs.len());
        let mut rejected = Vec::new();
        for run in runs {
            let profile = match LauncherProfile::from_run(run) {
                Ok(profile) => profile,
                Err(e) => {
                    warn!(job_index = run.index(), error = %e, "launcher profile rejected");
                    rejected.push(JobOutcome::rejected(run.index(), run.overrides().to_vec(), None, &e));
                    continue;
                }
            };
            let mut job = JobDescriptor::build(run, profile, &self.layout, &self.ctx);
            if dry_run {
                job = job.into_dry_run();
            }
            if let Err(e) = self.layout.write_job(run, &job) {
                warn!(job_index = run.index(), error = %e, "could not write job files");
                rejected.push(JobOutcome::rejected(run.index(), job.overrides.clone(), Some(job.job_dir.clone()), &e));
                continue;
            }
            jobs.push(job);
        }
        (jobs, rejected)
    }

    /// Materialise and submit every run of `sweep`.
    ///
    /// Combinations that failed to compose are reported as invalid jobs;
    /// a failing submission never stops its siblings.
    pub async fn launch(&self, sweep: ComposedSweep, options: &LaunchOptions) -> LaunchResult<SweepSummary> {
        let start_time = Instant::now();
        let ComposedSweep { runs, failures } = sweep;

        let mut outcomes: Vec<JobOutcome> = failures.iter().map(JobOutcome::invalid).collect();
        let (jobs, rejected) = self.prepare(&runs, options.dry_run);
        outcomes.extend(rejected);

        let manifest = self.layout.write_manifest(&MultirunManifest {
            sweep_id: self.ctx.sweep_id.to_string(),
            started_at: self.ctx.started_at.to_rfc3339(),
            config_name: self.ctx.config_name.clone(),
            overrides: options.overrides.clone(),
            jobs: jobs
                .iter()
                .map(|j| ManifestJob { index: j.index, job_dir: j.job_dir.clone(), overrides: j.overrides.clone() })
                .collect(),
        })?;

        // Without an explicit limit, each launcher kind runs at the
        // concurrency of the first profile of that kind.
        let mut kind_limits: BTreeMap<LauncherKind, usize> = BTreeMap::new();
        if options.concurrency.is_none() {
            for job in &jobs {
                kind_limits.entry(job.kind()).or_insert(job.profile.concurrency);
            }
        }
        info!(
            sweep_id = %self.ctx.sweep_id,
            jobs = jobs.len(),
            invalid = outcomes.len(),
            concurrency = ?options.concurrency,
            kind_limits = ?kind_limits,
            dry_run = options.dry_run,
            "launching"
        );

        let details: BTreeMap<usize, (Vec<String>, PathBuf)> =
            jobs.iter().map(|j| (j.index, (j.overrides.clone(), j.job_dir.clone()))).collect();

        let mut submitter =
            Submitter::new(options.concurrency.unwrap_or(1), self.launchers.clone(), Arc::clone(&self.progress))
                .with_cancel(self.cancel.clone());
        for (kind, limit) in kind_limits {
            submitter = submitter.with_kind_limit(kind, limit);
        }
        if let Some((initial, max)) = self.retry_delays {
            submitter = submitter.with_retry_delays(initial, max);
        }

        for result in submitter.submit_all(jobs).await {
            let (overrides, job_dir) = details.get(&result.index).cloned().unwrap_or_default();
            outcomes.push(JobOutcome::from_result(result, overrides, job_dir));
        }

        let summary = SweepSummary::new(
            self.ctx.sweep_id.to_string(),
            self.ctx.config_name.clone(),
            self.layout.is_multirun(),
            options.dry_run,
            manifest,
            outcomes,
            start_time.elapsed(),
        );
        info!(
            total = summary.total(),
            success_rate = summary.success_rate,
            duration_ms = summary.duration_ms,
            "launch finished"
        );
        Ok(summary)
    }
}
