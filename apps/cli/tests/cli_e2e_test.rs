use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn shipped_conf() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../conf")
}

/// `metasweep` run from an empty temp dir against the shipped configs.
fn metasweep(cwd: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("metasweep").unwrap();
    cmd.current_dir(cwd.path())
        .env_remove("RUST_LOG")
        .env_remove("HYDRA_FULL_ERROR")
        .env_remove("METASWEEP_SETTINGS")
        .arg("--config-dir")
        .arg(shipped_conf())
        .args(["--log-level", "error"]);
    cmd
}

#[test]
fn test_version() {
    let mut cmd = Command::cargo_bin("metasweep").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("metasweep 0.1.0"));
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("metasweep").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("metasweep composes YAML configs"));
}

#[test]
fn test_cfg_job_prints_resolved_config() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .args(["--cfg", "job"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_target_: tasks.meta_optimizer.MetaOptimizerExplicitForRegression"))
        .stdout(predicate::str::contains("meta_objective: prequential"))
        .stdout(predicate::str::contains("_target_: datasets.regression.LinearRegressionDataset"))
        .stdout(predicate::str::contains("${").not())
        .stdout(predicate::str::contains("launcher:").not());
}

#[test]
fn test_cfg_hydra_shows_selected_launcher() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .args(["--cfg", "hydra", "hydra/launcher=slurm"])
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: batch"))
        .stdout(predicate::str::contains("- sbatch"));
}

#[test]
fn test_experiment_switches_task() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .args(["--cfg", "job", "experiment=sgd_vs_prequential"])
        .assert()
        .success()
        .stdout(predicate::str::contains("_target_: tasks.sgd.SGDBaselineForRegression"))
        .stdout(predicate::str::contains("_target_: datasets.regression.SinusoidRegressionDataset"))
        .stdout(predicate::str::contains("max_epochs: 200"));
}

#[test]
fn test_force_set_and_list_values() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .args(["--cfg", "job", "++task.meta_objective=train", "++logger.tags=[x,y]", "logger=wandb"])
        .assert()
        .success()
        .stdout(predicate::str::contains("meta_objective: train"))
        .stdout(predicate::str::contains("- x\n"))
        .stdout(predicate::str::contains("- y\n"));
}

#[test]
fn test_unknown_key_is_reported_with_hint() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .args(["--cfg", "job", "does_not_exist=1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("key 'does_not_exist' is not in the config"))
        .stderr(predicate::str::contains("HYDRA_FULL_ERROR=1"));
}

#[test]
fn test_full_error_prints_the_chain() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .env("HYDRA_FULL_ERROR", "1")
        .args(["seed=0,1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid overrides"))
        .stderr(predicate::str::contains("Caused by"))
        .stderr(predicate::str::contains("require --multirun"));
}

#[test]
fn test_unknown_option_lists_choices() {
    let temp_dir = TempDir::new().unwrap();
    metasweep(&temp_dir)
        .args(["--cfg", "job", "task=adam"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("task/adam"))
        .stderr(predicate::str::contains("sgd"));
}

#[test]
fn test_dry_run_multirun_writes_every_job() {
    let temp_dir = TempDir::new().unwrap();
    let save_dir = temp_dir.path().join("sweep");
    let output = metasweep(&temp_dir)
        .args(["--multirun", "--dry-run", "--json", "seed=0,1", "task=sgd,meta_optimizer"])
        .arg(format!("save_dir={}", save_dir.display()))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let jobs = summary["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 4);
    assert!(jobs.iter().all(|j| j["status"] == "submitted"));
    assert_eq!(summary["dry_run"], true);
    assert_eq!(jobs[1]["overrides"][1], "task=meta_optimizer");

    assert!(save_dir.join("multirun.yaml").exists());
    for index in 0..4 {
        let job_dir = save_dir.join(index.to_string());
        assert!(job_dir.join(".hydra/config.yaml").exists());
        assert!(job_dir.join(".hydra/hydra.yaml").exists());
        assert!(job_dir.join(".hydra/overrides.yaml").exists());
        assert!(job_dir.join("job.json").exists());
    }
    let config = std::fs::read_to_string(save_dir.join("2/.hydra/config.yaml")).unwrap();
    assert!(config.contains("seed: 1"));
    assert!(config.contains("tasks.sgd.SGDBaselineForRegression"));
}

#[test]
fn test_settings_file_supplies_config_dir() {
    let temp_dir = TempDir::new().unwrap();
    let settings = format!("config_dir = \"{}\"\nlog_level = \"error\"\n", shipped_conf().display());
    std::fs::write(temp_dir.path().join("metasweep.toml"), settings).unwrap();

    let mut cmd = Command::cargo_bin("metasweep").unwrap();
    cmd.current_dir(temp_dir.path())
        .env_remove("RUST_LOG")
        .env_remove("METASWEEP_SETTINGS")
        .args(["--cfg", "job"])
        .assert()
        .success()
        .stdout(predicate::str::contains("seed: 0"));
}

#[test]
fn test_missing_config_dir() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("metasweep").unwrap();
    cmd.current_dir(temp_dir.path())
        .env_remove("METASWEEP_SETTINGS")
        .args(["--config-dir", "no/such/dir", "--cfg", "job"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config directory 'no/such/dir' not found"));
}

#[test]
fn test_yaml_error_names_the_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let conf = temp_dir.path().join("conf");
    std::fs::create_dir_all(conf.join("task")).unwrap();
    std::fs::write(conf.join("train.yaml"), "defaults:\n  - task: broken\n  - _self_\nseed: 0\n").unwrap();
    std::fs::write(conf.join("task").join("broken.yaml"), "lr: [0.1\n").unwrap();

    Command::cargo_bin("metasweep")
        .unwrap()
        .current_dir(temp_dir.path())
        .env_remove("RUST_LOG")
        .env_remove("HYDRA_FULL_ERROR")
        .env_remove("METASWEEP_SETTINGS")
        .args(["--log-level", "error", "--cfg", "job"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse task/broken.yaml"))
        .stderr(predicate::str::contains("HYDRA_FULL_ERROR=1"));
}

#[cfg(unix)]
#[test]
fn test_partial_failure_exits_non_zero() {
    let temp_dir = TempDir::new().unwrap();
    let conf = temp_dir.path().join("conf");
    std::fs::create_dir_all(&conf).unwrap();
    std::fs::write(
        conf.join("train.yaml"),
        r#"seed: 0
save_dir: null
hydra:
  launcher:
    kind: local
    concurrency: 3
    entry_point: [sh, -c, 'test "$METASWEEP_JOB_INDEX" != 1']
"#,
    )
    .unwrap();

    let output = Command::cargo_bin("metasweep")
        .unwrap()
        .current_dir(temp_dir.path())
        .env_remove("RUST_LOG")
        .env_remove("METASWEEP_SETTINGS")
        .args(["--log-level", "error", "--multirun", "--json", "seed=0,1,2"])
        .assert()
        .failure()
        .get_output()
        .stdout
        .clone();

    let summary: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let statuses: Vec<&str> = summary["jobs"].as_array().unwrap().iter().map(|j| j["status"].as_str().unwrap()).collect();
    assert_eq!(statuses, vec!["submitted", "failed", "submitted"]);
    assert!(temp_dir.path().join("outputs").is_dir());
}
