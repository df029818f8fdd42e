//! Launcher backends.

use crate::error::{LaunchError, LaunchResult};
use crate::job::JobDescriptor;
use crate::profile::LauncherKind;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

pub const SCRIPT_FILE: &str = "submit.sh";
pub const STDOUT_FILE: &str = "stdout.log";
pub const STDERR_FILE: &str = "stderr.log";

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub index: usize,
    /// Scheduler job id, when the launcher reports one.
    pub external_id: Option<String>,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    fn kind(&self) -> LauncherKind;

    async fn submit(&self, job: &JobDescriptor) -> LaunchResult<Submission>;
}

/// Runs the entry point from the launch directory and waits for it.
#[derive(Debug, Default)]
pub struct LocalLauncher;

#[async_trait]
impl Launcher for LocalLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Local
    }

    async fn submit(&self, job: &JobDescriptor) -> LaunchResult<Submission> {
        let (program, args) = job
            .argv
            .split_first()
            .ok_or_else(|| LaunchError::Profile("'entry_point' must not be empty".to_string()))?;
        debug!(job_index = job.index, program = %program, "starting local job");

        let output = Command::new(program)
            .args(args)
            .envs(&job.env)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LaunchError::JobSubmission { index: job.index, message: format!("{program}: {e}") })?;
        write_logs(job, &output).await?;

        if !output.status.success() {
            return Err(LaunchError::JobSubmission {
                index: job.index,
                message: format!("exited with {}{}", output.status, stderr_tail(&output)),
            });
        }
        Ok(Submission { index: job.index, external_id: None })
    }
}

/// Renders a batch script and runs the scheduler's submit command on it.
#[derive(Debug, Default)]
pub struct BatchLauncher;

impl BatchLauncher {
    /// The submission script for a job.
    #[must_use]
    pub fn render_script(job: &JobDescriptor) -> String {
        let mut script = String::from("#!/usr/bin/env bash\n");
        for line in job.profile.directive_lines() {
            script.push_str(&line);
            script.push('\n');
        }
        script.push('\n');
        for (key, value) in &job.env {
            script.push_str(&format!("export {key}={}\n", shell_quote(value)));
        }
        let argv: Vec<String> = job.argv.iter().map(|a| shell_quote(a)).collect();
        script.push_str(&format!("exec {}\n", argv.join(" ")));
        script
    }
}

#[async_trait]
impl Launcher for BatchLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::Batch
    }

    async fn submit(&self, job: &JobDescriptor) -> LaunchResult<Submission> {
        let script_path = job.job_dir.join(SCRIPT_FILE);
        tokio::fs::write(&script_path, Self::render_script(job)).await?;

        let (program, args) = job
            .profile
            .submit_command
            .split_first()
            .ok_or_else(|| LaunchError::Profile("batch profiles need a 'submit_command'".to_string()))?;
        debug!(job_index = job.index, program = %program, script = %script_path.display(), "submitting batch job");

        let output = Command::new(program)
            .args(args)
            .arg(&script_path)
            .output()
            .await
            .map_err(|e| LaunchError::JobSubmission { index: job.index, message: format!("{program}: {e}") })?;
        write_logs(job, &output).await?;

        if !output.status.success() {
            return Err(LaunchError::JobSubmission {
                index: job.index,
                message: format!("{program} exited with {}{}", output.status, stderr_tail(&output)),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(Submission { index: job.index, external_id: parse_job_id(&stdout) })
    }
}

/// Accepts every job without running anything.
#[derive(Debug, Default)]
pub struct DryRunLauncher;

#[async_trait]
impl Launcher for DryRunLauncher {
    fn kind(&self) -> LauncherKind {
        LauncherKind::DryRun
    }

    async fn submit(&self, job: &JobDescriptor) -> LaunchResult<Submission> {
        debug!(job_index = job.index, argv = ?job.argv, "dry run");
        Ok(Submission { index: job.index, external_id: None })
    }
}

/// Launchers by kind.
#[derive(Clone)]
pub struct LauncherSet {
    launchers: BTreeMap<LauncherKind, Arc<dyn Launcher>>,
}

impl Default for LauncherSet {
    fn default() -> Self {
        let mut set = Self { launchers: BTreeMap::new() };
        set.insert(Arc::new(LocalLauncher));
        set.insert(Arc::new(BatchLauncher));
        set.insert(Arc::new(DryRunLauncher));
        set
    }
}

impl LauncherSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a launcher, replacing any other of the same kind.
    pub fn insert(&mut self, launcher: Arc<dyn Launcher>) {
        self.launchers.insert(launcher.kind(), launcher);
    }

    #[must_use]
    pub fn get(&self, kind: LauncherKind) -> Option<Arc<dyn Launcher>> {
        self.launchers.get(&kind).cloned()
    }
}

async fn write_logs(job: &JobDescriptor, output: &Output) -> LaunchResult<()> {
    tokio::fs::write(job.job_dir.join(STDOUT_FILE), &output.stdout).await?;
    tokio::fs::write(job.job_dir.join(STDERR_FILE), &output.stderr).await?;
    Ok(())
}

fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    match stderr.trim().lines().last() {
        Some(line) => format!(": {line}"),
        None => String::new(),
    }
}

/// The job id printed by a scheduler: the last token of the last line
/// (`Submitted batch job 42`, or `42;cluster` with `--parsable`).
fn parse_job_id(stdout: &str) -> Option<String> {
    let token = stdout.trim().lines().last()?.split_whitespace().last()?;
    let id = token.split(';').next().unwrap_or(token);
    (!id.is_empty()).then(|| id.to_string())
}

fn shell_quote(text: &str) -> String {
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+".contains(c)) {
        text.to_string()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}
