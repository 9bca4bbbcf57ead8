use std::path::Path;
use std::time::Duration;

use forge_core::{Error, Result};
use tokio::process::Command;

/// Environment variables forwarded into a sandboxed tool subprocess —
/// ported directly from `dk-runner::executor::process::SAFE_ENV_VARS`.
/// Everything else is stripped via `env_clear()` so a `check`/
/// `run_tests` invocation never inherits the host's credentials or
/// unrelated state.
const SAFE_ENV_VARS: &[&str] = &["PATH", "HOME", "LANG", "TERM", "USER", "SHELL"];

/// The result of a sandboxed command run, analogous to the teacher's
/// `StepOutput`.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ProcessStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Pass,
    Fail,
    Timeout,
}

/// Runs a fixed, reviewed shell command inside `working_dir` with a
/// scrubbed environment and a hard wall-clock timeout.
///
/// This is the only place in the `forge` workspace that spawns a
/// subprocess — generalised from `dk-runner::executor::process::ProcessExecutor`,
/// whose `run_command` did exactly this for the teacher's CI-step
/// runner. `check`/`run_tests` are the only built-in tools that reach
/// this function, and only ever against `WorkInProgressVfs::materialize_to_tempdir`'s
/// output, never the live working directory — `spec.md`'s Non-goals
/// rule out any broader shell-execution surface.
pub async fn run_sandboxed(
    working_dir: &Path,
    command: &str,
    timeout: Duration,
) -> Result<ProcessOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(working_dir)
        .env_clear()
        // Make sure a timed-out child is actually reaped rather than
        // left running unsupervised: dropping the `tokio::time::timeout`
        // future below drops the in-flight `cmd.output()` future, and
        // `kill_on_drop` is what turns that drop into an actual kill.
        .kill_on_drop(true);
    for key in SAFE_ENV_VARS {
        if let Ok(value) = std::env::var(key) {
            cmd.env(key, value);
        }
    }
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let started = std::time::Instant::now();
    let child = cmd.output();
    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => Ok(ProcessOutput {
            status: if output.status.success() {
                ProcessStatus::Pass
            } else {
                ProcessStatus::Fail
            },
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        }),
        Ok(Err(e)) => Err(Error::ToolFailed {
            tool: "sandboxed-command".into(),
            detail: e.to_string(),
        }),
        Err(_) => Ok(ProcessOutput {
            status: ProcessStatus::Timeout,
            stdout: String::new(),
            stderr: String::new(),
            duration: started.elapsed(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_command_passes() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_sandboxed(dir.path(), "echo hi", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Pass);
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_sandboxed(dir.path(), "false", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Fail);
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_sandboxed(dir.path(), "sleep 5", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Timeout);
    }

    #[tokio::test]
    async fn timed_out_process_is_actually_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let command = format!("sleep 0.2 && touch {}", marker.display());
        let out = run_sandboxed(dir.path(), &command, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(out.status, ProcessStatus::Timeout);

        // Give the original sleep's full duration a chance to elapse.
        // If the child were left running past the timeout, the marker
        // file would exist by now.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!marker.exists(), "child process outlived its timeout");
    }

    #[tokio::test]
    async fn env_is_scrubbed_to_the_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("FORGE_TEST_SECRET", "should-not-leak");
        let out = run_sandboxed(dir.path(), "env", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.stdout.contains("FORGE_TEST_SECRET"));
    }
}
