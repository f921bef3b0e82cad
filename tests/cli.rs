//! Binary smoke tests.

use assert_cmd::Command;
use predicates::prelude::*;

fn localchat() -> Command {
    let mut cmd = Command::cargo_bin("localchat").unwrap();
    cmd.env_remove("LOCALCHAT_MODEL")
        .env_remove("LOCALCHAT_URL")
        .env_remove("LOCALCHAT_API_KEY");
    cmd
}

#[test]
fn test_help_lists_options() {
    localchat()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--prompt"))
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--url"));
}

#[test]
fn test_version_flag() {
    localchat()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_invalid_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    localchat()
        .arg("--config")
        .arg(&path)
        .arg("--prompt")
        .arg("hi")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config.json"));
}

#[test]
fn test_unreachable_engine_fails_single_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    localchat()
        .arg("--config")
        .arg(&path)
        .arg("--url")
        .arg("http://127.0.0.1:1")
        .arg("--prompt")
        .arg("hi")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load model registry"));
}
