// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::*;
use tempfile::TempDir;

fn indexer() -> Command {
    let mut cmd = cargo_bin_cmd!("forest-indexer");
    cmd.env_remove("NODE_API")
        .env_remove("NODE_TOKEN")
        .env_remove("STORE_PATH")
        .env("LOG_LEVEL", "warn");
    cmd
}

#[test]
fn help_succeeds() {
    indexer()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("walk").and(predicate::str::contains("replay")));
}

#[test]
fn missing_arguments_are_usage_errors() {
    indexer().arg("walk").arg("--from=1").assert().code(2);
}

#[test]
fn unknown_tasks_are_usage_errors() {
    let out = TempDir::new().unwrap();
    indexer()
        .arg("walk")
        .args(["--from=1", "--to=2", "--tasks=miner,rewards"])
        .arg(format!("--out={}", out.path().display()))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("rewards"));
}

#[test]
fn inverted_ranges_are_usage_errors() {
    let out = TempDir::new().unwrap();
    indexer()
        .arg("walk")
        .args(["--from=9", "--to=2"])
        .arg(format!("--out={}", out.path().display()))
        .assert()
        .code(2);
}

#[test]
fn walk_needs_chain_data() {
    let out = TempDir::new().unwrap();
    indexer()
        .arg("walk")
        .args(["--from=1", "--to=2"])
        .arg(format!("--out={}", out.path().display()))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("NODE_API"));
}

#[test]
fn unreadable_snapshot_is_a_runtime_error() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("snapshot.car");
    std::fs::write(&snapshot, b"not a car file").unwrap();
    indexer()
        .env("STORE_PATH", &snapshot)
        .arg("walk")
        .args(["--from=1", "--to=2"])
        .arg(format!("--out={}", dir.path().join("out").display()))
        .assert()
        .code(1);
}

#[test]
fn replay_of_garbage_fails() {
    let dir = TempDir::new().unwrap();
    let car = dir.path().join("1_0.car");
    std::fs::write(&car, [0xff; 16]).unwrap();
    indexer()
        .arg("replay")
        .arg(format!("--from={}", car.display()))
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn invalid_config_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[retry]\nmax_retries = \"many\"\n").unwrap();
    indexer()
        .arg("--config")
        .arg(&config)
        .args(["replay", "--from=x.car"])
        .assert()
        .code(2);
}
