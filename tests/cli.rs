use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_help_lists_sampling_options() {
    Command::cargo_bin("statwatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--process-name"))
        .stdout(predicate::str::contains("--window-length"))
        .stdout(predicate::str::contains("--reference-dir"));
}

#[test]
fn test_invalid_config_exits_non_zero() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[sampling]\nwindow_length = 0").unwrap();

    Command::cargo_bin("statwatch")
        .unwrap()
        .args(["--config-file", file.path().to_str().unwrap(), "--pid", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("window_length"));
}

#[test]
fn test_unknown_target_exits_non_zero() {
    Command::cargo_bin("statwatch")
        .unwrap()
        .args(["--process-name", "statwatch-no-such-process-xyz", "--windows", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no running process matches"));
}
