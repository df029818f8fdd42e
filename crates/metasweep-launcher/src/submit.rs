//! Concurrent job submission.

use crate::error::LaunchError;
use crate::job::JobDescriptor;
use crate::launcher::{LauncherSet, Submission};
use crate::profile::LauncherKind;
use crate::progress::{ProgressEvent, ProgressSink};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error};

/// Retry policy for failed submissions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Backoff multiplier (2.0 doubles the delay each retry).
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    /// `initial_delay * multiplier^retry_count`, capped at `max_delay`.
    #[must_use]
    pub fn calculate_delay(&self, retry_count: u32) -> Duration {
        let delay_ms = (self.initial_delay.as_millis() as f64 * self.multiplier.powi(retry_count as i32))
            .min(self.max_delay.as_millis() as f64) as u64;
        Duration::from_millis(delay_ms)
    }
}

/// Shared cancellation flag. Jobs not yet started when it is raised are
/// reported as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of submitting one job.
#[derive(Debug)]
pub struct JobResult {
    pub index: usize,
    pub attempts: u32,
    pub outcome: Result<Submission, LaunchError>,
}

/// Submits jobs concurrently, with a per-job timeout and retries taken
/// from each job's profile.
///
/// Each launcher kind has its own semaphore; kinds without an explicit
/// limit share the default one.
pub struct Submitter {
    concurrency: usize,
    semaphore: Arc<Semaphore>,
    kind_limits: BTreeMap<LauncherKind, Arc<Semaphore>>,
    launchers: LauncherSet,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
    retry_template: RetryPolicy,
}

impl Submitter {
    #[must_use]
    pub fn new(concurrency: usize, launchers: LauncherSet, progress: Arc<dyn ProgressSink>) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            kind_limits: BTreeMap::new(),
            launchers,
            progress,
            cancel: CancelFlag::new(),
            retry_template: RetryPolicy::default(),
        }
    }

    /// Bound jobs of one launcher kind separately from the default limit.
    #[must_use]
    pub fn with_kind_limit(mut self, kind: LauncherKind, concurrency: usize) -> Self {
        self.kind_limits.insert(kind, Arc::new(Semaphore::new(concurrency.max(1))));
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Delays used between retries; the retry count comes from each job.
    #[must_use]
    pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_template.initial_delay = initial;
        self.retry_template.max_delay = max;
        self
    }

    /// Submit every job. One failure never stops its siblings; results are
    /// returned sorted by job index.
    pub async fn submit_all(&self, jobs: Vec<JobDescriptor>) -> Vec<JobResult> {
        let start_time = Instant::now();
        let total = jobs.len();
        debug!(total_jobs = total, concurrency = self.concurrency, "starting submission");

        let mut handles = Vec::with_capacity(total);
        for job in jobs {
            let index = job.index;
            let semaphore = Arc::clone(self.kind_limits.get(&job.kind()).unwrap_or(&self.semaphore));
            let launchers = self.launchers.clone();
            let progress = Arc::clone(&self.progress);
            let cancel = self.cancel.clone();
            let policy = RetryPolicy { max_retries: job.profile.max_retries, ..self.retry_template.clone() };

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        let error = LaunchError::JobSubmission { index, message: format!("semaphore closed: {e}") };
                        progress.on_event(ProgressEvent::Failed { index, error: error.to_string() });
                        return JobResult { index, attempts: 0, outcome: Err(error) };
                    }
                };
                submit_one(job, &launchers, &policy, &cancel, progress.as_ref()).await
            });
            handles.push((index, handle));
        }

        let mut results = Vec::with_capacity(total);
        for (index, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(job_index = index, "submission task failed: {}", e);
                    results.push(JobResult {
                        index,
                        attempts: 0,
                        outcome: Err(LaunchError::JobSubmission { index, message: format!("task failed: {e}") }),
                    });
                }
            }
        }
        results.sort_by_key(|r| r.index);

        debug!(
            total_jobs = total,
            submitted = results.iter().filter(|r| r.outcome.is_ok()).count(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "submission completed"
        );
        results
    }
}

async fn submit_one(
    job: JobDescriptor,
    launchers: &LauncherSet,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
    progress: &dyn ProgressSink,
) -> JobResult {
    let index = job.index;
    let Some(launcher) = launchers.get(job.kind()) else {
        let error = LaunchError::Profile(format!("no launcher for kind '{}'", job.kind()));
        progress.on_event(ProgressEvent::Failed { index, error: error.to_string() });
        return JobResult { index, attempts: 0, outcome: Err(error) };
    };
    let timeout_duration = job.profile.timeout();

    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            progress.on_event(ProgressEvent::Cancelled { index });
            return JobResult { index, attempts: attempt, outcome: Err(LaunchError::Cancelled { index }) };
        }

        progress.on_event(ProgressEvent::Started { index, attempt });
        let outcome = match timeout(timeout_duration, launcher.submit(&job)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LaunchError::Timeout { index, secs: timeout_duration.as_secs() }),
        };

        match outcome {
            Ok(submission) => {
                progress.on_event(ProgressEvent::Submitted { index, external_id: submission.external_id.clone() });
                return JobResult { index, attempts: attempt + 1, outcome: Ok(submission) };
            }
            Err(error) if error.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.calculate_delay(attempt);
                debug!(
                    job_index = index,
                    retry_count = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after backoff"
                );
                progress.on_event(ProgressEvent::Retrying { index, attempt: attempt + 1, delay_ms: delay.as_millis() as u64 });
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                progress.on_event(ProgressEvent::Failed { index, error: error.to_string() });
                return JobResult { index, attempts: attempt + 1, outcome: Err(error) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_delay_backs_off_and_caps() {
        let policy = RetryPolicy::with_max_retries(5);
        assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
        assert_eq!(policy.calculate_delay(3), Duration::from_millis(800));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }
}
