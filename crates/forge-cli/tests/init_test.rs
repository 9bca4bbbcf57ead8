use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)]
fn forge() -> Command {
    Command::cargo_bin("forge").unwrap()
}

#[test]
fn init_creates_git_directory_and_tools_dir() {
    let dir = TempDir::new().unwrap();
    forge()
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized"));
    assert!(dir.path().join(".git").exists());
    assert!(dir.path().join("tools").exists());
    assert!(dir.path().join("forge.toml").exists());
}

#[test]
fn init_defaults_to_current_directory() {
    let dir = TempDir::new().unwrap();
    forge().arg("init").current_dir(dir.path()).assert().success();
    assert!(dir.path().join(".git").exists());
}

#[test]
fn init_creates_missing_subdirectory() {
    let dir = TempDir::new().unwrap();
    let sub = dir.path().join("my-repo");
    forge().arg("init").arg(&sub).assert().success();
    assert!(sub.join(".git").exists());
}

#[test]
fn reinit_in_existing_repo_succeeds() {
    let dir = TempDir::new().unwrap();
    forge().arg("init").arg(dir.path()).assert().success();
    forge()
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Reinitialized"));
}
