//! Human-readable rendering of composed configs and launch summaries.

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use metasweep_core::{ComposedSweep, RunFailure};
use metasweep_launcher::{JobOutcome, JobStatus, SweepSummary};

/// Which part of a resolved run `--cfg` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CfgPart {
    /// The job config
    Job,
    /// The runtime subtree
    Hydra,
    /// Both, as one tree
    All,
}

/// Print the resolved config of every run, then any failed combinations.
pub fn print_cfg(sweep: &ComposedSweep, part: CfgPart) -> Result<()> {
    let many = sweep.total() > 1;
    for run in &sweep.runs {
        if many {
            println!("# job {}: {}", run.index(), run.overrides().join(" "));
        }
        let text = match part {
            CfgPart::Job => run.to_yaml()?,
            CfgPart::Hydra => run.hydra().to_yaml_string()?,
            CfgPart::All => run.full_config()?.to_yaml_string()?,
        };
        print!("{text}");
    }
    print_failures(&sweep.failures);
    Ok(())
}

pub fn print_failures(failures: &[RunFailure]) {
    for failure in failures {
        eprintln!(
            "{} job {} [{}]: {}",
            "✗".red(),
            failure.index,
            failure.overrides.join(" "),
            failure.error
        );
    }
}

pub fn print_summary(summary: &SweepSummary) {
    let mode = if summary.dry_run { " (dry run)" } else { "" };
    println!();
    println!("{}", format!("Sweep {}{} ({} jobs)", summary.config_name, mode, summary.total()).bold().cyan());
    println!();

    println!("{:<6} {:<10} {}", "Job", "Status", "Overrides");
    println!("{}", "─".repeat(72));
    for job in &summary.jobs {
        print_job(job);
    }
    println!("{}", "─".repeat(72));

    let submitted = summary.count(JobStatus::Submitted);
    let line = format!(
        "{} submitted, {} failed, {} invalid, {} cancelled in {}ms",
        submitted,
        summary.count(JobStatus::Failed),
        summary.count(JobStatus::Invalid),
        summary.count(JobStatus::Cancelled),
        summary.duration_ms
    );
    if summary.is_complete_success() {
        println!("{}", line.green());
    } else {
        println!("{}", line.yellow());
    }
    if let Some(manifest) = &summary.manifest {
        println!("  Manifest: {}", manifest.display().to_string().dimmed());
    }
    println!();
}

fn print_job(job: &JobOutcome) {
    let status = match job.status {
        JobStatus::Submitted => job.status.to_string().green(),
        JobStatus::Failed | JobStatus::Invalid => job.status.to_string().red(),
        JobStatus::Cancelled => job.status.to_string().yellow(),
    };
    let overrides = if job.overrides.is_empty() { "(none)".to_string() } else { job.overrides.join(" ") };
    println!("{:<6} {:<10} {}", job.index, status, overrides);

    if let Some(id) = &job.external_id {
        println!("       {}", format!("id: {id}").dimmed());
    }
    if let Some(dir) = &job.job_dir {
        println!("       {}", dir.display().to_string().dimmed());
    }
    if let Some(error) = &job.error {
        match &job.key_path {
            Some(key) => println!("       {} {}", format!("[{key}]").red(), error),
            None => println!("       {}", error.red()),
        }
    }
}
