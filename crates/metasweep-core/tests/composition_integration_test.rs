//! Integration tests for composing runs from an on-disk config directory.

use metasweep_core::targets::{MetaObjective, MetaOptimizerExplicit, SgdBaseline};
use metasweep_core::{ConfigError, Composer, FsConfigSource, SweepPlan, TargetRegistry};
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, name: &str, text: &str) {
    let path = root.join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

/// A trimmed-down copy of the shipped harness layout.
fn config_dir() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    write(
        root,
        "train.yaml",
        "defaults:\n  - dataset: regression/linear\n  - task: meta_optimizer\n  - _self_\n  - optional experiment: null\n\nseed: 0\nsave_dir: outputs\nlogger:\n  name: run\n",
    );
    write(
        root,
        "dataset/regression/linear.yaml",
        "_target_: datasets.regression.LinearRegressionDataset\nx_dim: 1\ny_dim: 1\nn_tasks: 1000\nn_samples: 64\n",
    );
    write(
        root,
        "dataset/regression/sinusoid.yaml",
        "_target_: datasets.regression.SinusoidRegressionDataset\nx_dim: 1\ny_dim: 1\nn_tasks: 1000\nn_samples: 64\n",
    );
    write(
        root,
        "task/meta_optimizer.yaml",
        "defaults:\n  - /context_aggregator@context_aggregator: transformer\n  - /predictor@predictor: mlp\n  - _self_\n\n_target_: tasks.meta_optimizer.MetaOptimizerExplicitForRegression\nmeta_objective: train\nlr: 0.001\n",
    );
    write(
        root,
        "task/sgd.yaml",
        "defaults:\n  - /predictor@predictor: mlp\n  - _self_\n\n_target_: tasks.sgd.SGDBaselineForRegression\nlr: 0.01\n",
    );
    write(
        root,
        "context_aggregator/transformer.yaml",
        "_target_: models.context_aggregator.TransformerContextAggregator\nx_dim: ${dataset.x_dim}\ny_dim: ${dataset.y_dim}\nz_dim: 64\n",
    );
    write(
        root,
        "predictor/mlp.yaml",
        "_target_: models.predictor.MLPConcatPredictor\nx_dim: ${dataset.x_dim}\ny_dim: ${dataset.y_dim}\nz_dim: 64\n",
    );
    write(
        root,
        "experiment/sgd_vs_prequential.yaml",
        "# @package _global_\ndefaults:\n  - override /task: sgd\n\nseed: 7\n",
    );
    temp
}

fn composer(temp: &TempDir) -> Composer {
    Composer::new(Arc::new(FsConfigSource::new(temp.path())), "train")
}

fn compose(temp: &TempDir, args: &[&str]) -> metasweep_core::ConfigResult<metasweep_core::RunConfig> {
    let plan = SweepPlan::parse(args, false)?;
    let assignments = plan.combination(0).unwrap();
    composer(temp).compose(0, &assignments)
}

#[test]
fn test_force_set_meta_objective_keeps_task_target() {
    let temp = config_dir();
    let run = compose(&temp, &["++task.meta_objective=prequential"]).unwrap();
    let config = run.config();

    assert_eq!(
        config.get_path("task._target_").and_then(Value::as_str),
        Some("tasks.meta_optimizer.MetaOptimizerExplicitForRegression")
    );
    assert_eq!(config.get_path("task.meta_objective").and_then(Value::as_str), Some("prequential"));
    assert_eq!(config.get_path("task.predictor.x_dim").and_then(Value::as_u64), Some(1));

    let registry = TargetRegistry::with_builtins().unwrap();
    let task = registry.instantiate_path(config, "task").unwrap();
    let task = task.downcast_ref::<MetaOptimizerExplicit>().unwrap();
    assert_eq!(task.meta_objective, MetaObjective::Prequential);
}

#[test]
fn test_plain_override_requires_existing_key() {
    let temp = config_dir();
    assert!(compose(&temp, &["seed=3"]).is_ok());

    let err = compose(&temp, &["task.momentum=0.9"]).unwrap_err();
    assert!(matches!(err, ConfigError::UnknownKey { ref path } if path == "task.momentum"));

    let run = compose(&temp, &["++task.momentum=0.9"]).unwrap();
    assert_eq!(run.config().get_path("task.momentum").and_then(Value::as_f64), Some(0.9));
}

#[test]
fn test_bracket_list_is_a_single_value() {
    let temp = config_dir();
    let run = compose(&temp, &["++logger.tags=[x,y]"]).unwrap();
    let tags = run.config().get_path("logger.tags").and_then(Value::as_sequence).unwrap();
    let tags: Vec<_> = tags.iter().filter_map(Value::as_str).collect();
    assert_eq!(tags, vec!["x", "y"]);
}

#[test]
fn test_self_position_controls_precedence() {
    let temp = config_dir();
    write(
        temp.path(),
        "self_first.yaml",
        "defaults:\n  - _self_\n  - dataset: regression/linear\n\ndataset:\n  n_tasks: 5\n",
    );
    write(
        temp.path(),
        "self_last.yaml",
        "defaults:\n  - dataset: regression/linear\n  - _self_\n\ndataset:\n  n_tasks: 5\n",
    );
    let source = Arc::new(FsConfigSource::new(temp.path()));

    let first = Composer::new(source.clone(), "self_first").compose(0, &[]).unwrap();
    assert_eq!(first.config().get_path("dataset.n_tasks").and_then(Value::as_u64), Some(1000));

    let last = Composer::new(source, "self_last").compose(0, &[]).unwrap();
    assert_eq!(last.config().get_path("dataset.n_tasks").and_then(Value::as_u64), Some(5));
}

#[test]
fn test_null_default_disables_group() {
    let temp = config_dir();
    write(temp.path(), "no_predictor.yaml", "defaults:\n  - predictor: null\n\nseed: 0\n");
    let run = Composer::new(Arc::new(FsConfigSource::new(temp.path())), "no_predictor").compose(0, &[]).unwrap();
    assert!(run.config().get("predictor").is_none());
    assert_eq!(run.choices().get("predictor"), Some(&None));
}

#[test]
fn test_experiment_overrides_task_choice() {
    let temp = config_dir();
    let run = compose(&temp, &["experiment=sgd_vs_prequential"]).unwrap();
    assert_eq!(run.config().get("seed").and_then(Value::as_u64), Some(7));
    assert_eq!(run.choices().get("task"), Some(&Some("sgd".to_string())));

    let registry = TargetRegistry::with_builtins().unwrap();
    let task = registry.instantiate_path(run.config(), "task").unwrap();
    assert!(task.downcast_ref::<SgdBaseline>().is_some());
}

#[test]
fn test_command_line_choice_beats_experiment_override() {
    let temp = config_dir();
    let run = compose(&temp, &["experiment=sgd_vs_prequential", "task=meta_optimizer"]).unwrap();
    assert_eq!(run.choices().get("task"), Some(&Some("meta_optimizer".to_string())));
}

#[test]
fn test_unknown_group_option_lists_choices() {
    let temp = config_dir();
    let err = compose(&temp, &["dataset=regression/cubic"]).unwrap_err();
    match err {
        ConfigError::ConfigNotFound { name, options } => {
            assert_eq!(name, "dataset/regression/cubic");
            assert_eq!(options, vec!["regression/linear", "regression/sinusoid"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_sweep_produces_six_ordered_runs() {
    let temp = config_dir();
    let plan = SweepPlan::parse(&["seed=0,1,2", "dataset=regression/linear,regression/sinusoid"], true).unwrap();
    let registry = TargetRegistry::with_builtins().unwrap();
    let sweep = composer(&temp).compose_sweep(&plan, |run| registry.validate(run.config()).map(|_| ())).unwrap();

    assert_eq!(sweep.runs.len(), 6);
    assert!(sweep.failures.is_empty());
    let pairs: Vec<(u64, String)> = sweep
        .runs
        .iter()
        .map(|run| {
            (
                run.config().get("seed").and_then(Value::as_u64).unwrap(),
                run.choices()["dataset"].clone().unwrap(),
            )
        })
        .collect();
    let expected: Vec<(u64, String)> = [0, 1, 2]
        .into_iter()
        .flat_map(|seed| {
            ["regression/linear", "regression/sinusoid"].map(|d| (seed, d.to_string()))
        })
        .collect();
    assert_eq!(pairs, expected);
    assert!(sweep.runs.iter().enumerate().all(|(i, run)| run.index() == i));
}

#[test]
fn test_validation_failure_is_per_run() {
    let temp = config_dir();
    let plan = SweepPlan::parse(&["task.lr=0.1,-1"], true).unwrap();
    let registry = TargetRegistry::with_builtins().unwrap();
    let sweep = composer(&temp).compose_sweep(&plan, |run| registry.validate(run.config()).map(|_| ())).unwrap();

    assert_eq!(sweep.runs.len(), 1);
    assert_eq!(sweep.failures.len(), 1);
    assert_eq!(sweep.failures[0].index, 1);
    assert!(matches!(sweep.failures[0].error, ConfigError::InvalidArgument { ref path, .. } if path == "task"));
}
