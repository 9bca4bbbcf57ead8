use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[allow(deprecated)]
fn forge() -> Command {
    Command::cargo_bin("forge").unwrap()
}

#[test]
fn spawn_list_and_status_round_trip() {
    let dir = TempDir::new().unwrap();
    forge().arg("init").arg(dir.path()).assert().success();

    let spawn = forge()
        .arg("--repo")
        .arg(dir.path())
        .arg("session")
        .arg("spawn")
        .arg("--intent")
        .arg("add a README")
        .assert()
        .success();
    let stdout = String::from_utf8(spawn.get_output().stdout.clone()).unwrap();
    let branch = stdout
        .split_whitespace()
        .find(|w| w.starts_with("agent/"))
        .expect("spawn output names the new branch")
        .to_string();

    forge()
        .arg("--repo")
        .arg(dir.path())
        .arg("session")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(&branch).and(predicate::str::contains("add a README")));

    forge()
        .arg("--repo")
        .arg(dir.path())
        .arg("session")
        .arg("status")
        .arg(&branch)
        .assert()
        .success()
        .stdout(predicate::str::contains("state:").and(predicate::str::contains("add a README")));
}

#[test]
fn status_on_unknown_branch_fails() {
    let dir = TempDir::new().unwrap();
    forge().arg("init").arg(dir.path()).assert().success();

    forge()
        .arg("--repo")
        .arg(dir.path())
        .arg("session")
        .arg("status")
        .arg("does-not-exist")
        .assert()
        .failure();
}

#[test]
fn tool_list_reports_every_builtin() {
    let dir = TempDir::new().unwrap();
    forge().arg("init").arg(dir.path()).assert().success();

    forge()
        .arg("--repo")
        .arg(dir.path())
        .arg("tool")
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("write_file").and(predicate::str::contains("search_replace")));
}
