//! metasweep CLI - compose experiment configs and launch sweeps
//!
//! `metasweep [OPTIONS] [OVERRIDES]...` composes the primary config from a
//! config directory, applies command-line overrides, expands `--multirun`
//! sweeps, and submits one job per combination through the launcher named
//! in `hydra.launcher`.

mod output;
mod settings;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use colored::Colorize;
use metasweep_core::{Composer, ConfigError, FsConfigSource, Resolvers, SweepPlan, TargetRegistry};
use metasweep_launcher::{
    CancelFlag, LaunchContext, LaunchError, LaunchOptions, ProgressSink, SilentProgressSink, StdoutProgressSink, SweepLayout,
    SweepRunner, ENV_FULL_ERROR,
};
use output::CfgPart;
use serde_yaml::Value;
use settings::{Settings, SettingsError};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_CONFIG_DIR: &str = "conf";
const DEFAULT_CONFIG_NAME: &str = "train";
const DEFAULT_LOG_LEVEL: &str = "info";
const NOW_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// metasweep - config composition and sweep launcher
///
/// Composes a primary YAML config with its defaults list, applies
/// overrides (`key=value`, `+key=value`, `++key=value`, `~key`), and launches
/// one job per sweep combination.
#[derive(Parser, Debug)]
#[command(
    name = "metasweep",
    author,
    version,
    about = "Compose experiment configs and launch sweeps",
    long_about = "metasweep composes YAML configs from a config directory, applies command-line overrides,\nexpands multirun sweeps, and submits one job per combination through a launcher profile."
)]
struct Args {
    /// Expand sweep overrides (`key=a,b`, `key=range(0,3)`) into one job per combination
    #[arg(short, long)]
    multirun: bool,

    /// Config directory (default from settings, else `conf`)
    #[arg(short = 'c', long)]
    config_dir: Option<PathBuf>,

    /// Primary config name (default `train`)
    #[arg(short = 'n', long)]
    config_name: Option<String>,

    /// Print the resolved config and exit without launching
    #[arg(long, value_enum)]
    cfg: Option<CfgPart>,

    /// Write job directories and descriptors without submitting
    #[arg(long)]
    dry_run: bool,

    /// Submission concurrency (overrides the launcher profile)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: Option<u64>,

    /// Print the end-of-run summary as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long)]
    log_level: Option<String>,

    /// Overrides: `group=option`, `key=value`, `+key=value`, `++key=value`, `~key`
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let full_error = std::env::var(ENV_FULL_ERROR).is_ok_and(|v| v == "1");

    let settings = match Settings::discover_and_load() {
        Ok(settings) => settings,
        Err(e) => {
            report_error(&anyhow::Error::new(e), full_error);
            return ExitCode::FAILURE;
        }
    };

    let level = args.log_level.clone().or_else(|| settings.log_level.clone());
    if let Err(e) = init_tracing(level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL)) {
        eprintln!("failed to initialise logging: {e}");
    }

    match run(args, settings, full_error).await {
        Ok(code) => code,
        Err(e) => {
            report_error(&e, full_error);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; stdout carries configs and summaries.
fn init_tracing(level: &str) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn report_error(error: &anyhow::Error, full_error: bool) {
    if full_error {
        eprintln!("{} {:?}", "Error:".red().bold(), error);
    } else {
        eprintln!("{} {}", "Error:".red().bold(), summarize(error));
        eprintln!("{}", format!("Set the environment variable {ENV_FULL_ERROR}=1 for the full error chain.").dimmed());
    }
}

/// The outermost metasweep error in the chain, else the root cause.
fn summarize(error: &anyhow::Error) -> String {
    error
        .chain()
        .find_map(|e| {
            e.downcast_ref::<ConfigError>()
                .map(ToString::to_string)
                .or_else(|| e.downcast_ref::<LaunchError>().map(ToString::to_string))
                .or_else(|| e.downcast_ref::<SettingsError>().map(ToString::to_string))
        })
        .unwrap_or_else(|| error.root_cause().to_string())
}

async fn run(args: Args, settings: Settings, full_error: bool) -> Result<ExitCode> {
    let config_dir = args
        .config_dir
        .or(settings.config_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR));
    let config_name = args
        .config_name
        .or(settings.config_name)
        .unwrap_or_else(|| DEFAULT_CONFIG_NAME.to_string());
    if !config_dir.is_dir() {
        anyhow::bail!("config directory '{}' not found", config_dir.display());
    }

    let ctx = LaunchContext::new(config_name.clone(), full_error);
    let composer = Composer::new(Arc::new(FsConfigSource::new(&config_dir)), config_name.clone())
        .with_resolvers(resolvers(ctx.started_at));
    let plan = SweepPlan::parse(&args.overrides, args.multirun).context("invalid overrides")?;
    info!(
        config_dir = %config_dir.display(),
        config_name = %config_name,
        combinations = plan.len(),
        "composing"
    );

    let registry = TargetRegistry::with_builtins().context("failed to build target registry")?;
    let sweep = composer
        .compose_sweep(&plan, |run| registry.validate(run.config()).map(|_| ()))
        .with_context(|| format!("failed to compose '{config_name}'"))?;

    if let Some(part) = args.cfg {
        output::print_cfg(&sweep, part)?;
        return Ok(if sweep.failures.is_empty() { ExitCode::SUCCESS } else { ExitCode::FAILURE });
    }

    let cwd = std::env::current_dir().context("failed to read the working directory")?;
    let layout = SweepLayout::timestamped(&cwd, ctx.started_at, args.multirun);

    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; jobs not yet submitted will be cancelled");
            flag.cancel();
        }
    });

    let progress: Arc<dyn ProgressSink> =
        if args.json { Arc::new(SilentProgressSink) } else { Arc::new(StdoutProgressSink) };
    let runner = SweepRunner::new(layout, ctx).with_progress(progress).with_cancel(cancel);
    let options = LaunchOptions {
        dry_run: args.dry_run,
        concurrency: args.concurrency.map(|n| n as usize).or(settings.concurrency),
        overrides: args.overrides.clone(),
    };
    let summary = runner.launch(sweep, &options).await.context("launch failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        output::print_summary(&summary);
    }
    Ok(if summary.is_complete_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Default resolvers plus `now`, fixed at the launch time so every job of a
/// sweep sees the same value.
fn resolvers(started_at: DateTime<Local>) -> Resolvers {
    let mut resolvers = Resolvers::default();
    resolvers.register("now", move |args: &str| {
        let pattern = if args.trim().is_empty() { NOW_FORMAT } else { args.trim() };
        let mut out = String::new();
        write!(out, "{}", started_at.format(pattern)).map_err(|_| format!("invalid time format '{pattern}'"))?;
        Ok(Value::String(out))
    });
    resolvers
}
