//! speedgov 命令行测试

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn sample_config() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/governor.toml")
}

fn speedgov() -> Command {
    Command::cargo_bin("speedgov").unwrap()
}

#[test]
fn test_check_sample_config() {
    speedgov()
        .args(["check", "--config"])
        .arg(sample_config())
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("tcp://0.0.0.0:13750"))
        .stdout(predicate::str::contains("0.50 m <= d < 1.00 m -> 25%"))
        .stdout(predicate::str::contains("d >= 3.00 m -> 100%"));
}

#[test]
fn test_check_rejects_missing_recipe_field() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("recipe.toml"),
        "[[inputs]]\nname = \"speed_slider_fraction\"\ntype = \"DOUBLE\"\n",
    )
    .unwrap();
    let config = dir.path().join("governor.toml");
    fs::write(&config, "[robot]\nhost = \"robot\"\nrecipe = \"recipe.toml\"\n").unwrap();

    speedgov()
        .args(["check", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("speed_slider_mask"));
}

#[test]
fn test_check_missing_file() {
    speedgov()
        .args(["check", "--config", "does-not-exist.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does-not-exist.toml"));
}

#[test]
fn test_run_quits_on_operator_command() {
    speedgov()
        .args(["run", "--config"])
        .arg(sample_config())
        .args(["--transport", "udp", "--listen", "127.0.0.1:0", "--simulate"])
        .write_stdin("status\nquit\n")
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .success()
        .stdout(predicate::str::contains("Unknown command 'status'"));
}

#[test]
fn test_run_without_backend_fails() {
    speedgov()
        .args(["run", "--config"])
        .arg(sample_config())
        .args(["--transport", "udp", "--listen", "127.0.0.1:0"])
        .write_stdin("quit\n")
        .timeout(std::time::Duration::from_secs(10))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No native motion-controller backend"))
        .stderr(predicate::str::contains("--simulate"));
}
