use std::path::Path;

use async_trait::async_trait;
use forge_core::Result;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::exec::{run_sandboxed, ProcessStatus};
use crate::registry::{Tool, ToolOutcome};

const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// Pick a reviewed, fixed command for `purpose` by inspecting what
/// build ecosystem is present — the same "discovery over a fixed
/// allowlist" idiom as `dk-runner::steps::command::run_command_step`'s
/// `validate_command`, just discovering the command itself rather than
/// validating a caller-supplied one, since these two tools never take
/// an arbitrary command argument at all.
fn discover_command(dir: &Path, purpose: Purpose) -> &'static str {
    if dir.join("Makefile").is_file() {
        return match purpose {
            Purpose::Check => "make check",
            Purpose::Test => "make test",
        };
    }
    if dir.join("Cargo.toml").is_file() {
        return match purpose {
            Purpose::Check => "cargo check --all-targets",
            Purpose::Test => "cargo test",
        };
    }
    if dir.join("package.json").is_file() {
        return match purpose {
            Purpose::Check => "npm run lint --if-present",
            Purpose::Test => "npm test --if-present",
        };
    }
    match purpose {
        Purpose::Check => "true",
        Purpose::Test => "true",
    }
}

#[derive(Clone, Copy)]
enum Purpose {
    Check,
    Test,
}

fn truncate(output: &str) -> (String, bool) {
    if output.len() <= MAX_OUTPUT_BYTES {
        (output.to_string(), false)
    } else {
        (output[..MAX_OUTPUT_BYTES].to_string(), true)
    }
}

async fn run(ctx: &dyn ToolContext, purpose: Purpose) -> Result<ToolOutcome> {
    let sandbox = ctx.vfs().materialize_to_tempdir()?;
    let command = discover_command(sandbox.path(), purpose);
    let output = run_sandboxed(sandbox.path(), command, ctx.tool_timeout()).await?;

    let (stdout, stdout_truncated) = truncate(&output.stdout);
    let (stderr, stderr_truncated) = truncate(&output.stderr);
    let passed = output.status == ProcessStatus::Pass;

    Ok(ToolOutcome {
        is_error: !passed,
        content: json!({
            "command": command,
            "status": match output.status {
                ProcessStatus::Pass => "pass",
                ProcessStatus::Fail => "fail",
                ProcessStatus::Timeout => "timeout",
            },
            "stdout": stdout,
            "stdout_truncated": stdout_truncated,
            "stderr": stderr,
            "stderr_truncated": stderr_truncated,
            "duration_ms": output.duration.as_millis() as u64,
        }),
    })
}

/// Run the branch's discovered lint/typecheck step in a materialized
/// sandbox copy of the overlay — never the live working directory.
pub struct Check;

#[async_trait]
impl Tool for Check {
    fn name(&self) -> &'static str {
        "check"
    }

    fn description(&self) -> &'static str {
        "Run the project's static check/lint step against the current uncommitted changes."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &dyn ToolContext, _args: Value) -> Result<ToolOutcome> {
        run(ctx, Purpose::Check).await
    }
}

/// Run the branch's discovered test suite in a materialized sandbox
/// copy of the overlay.
pub struct RunTests;

#[async_trait]
impl Tool for RunTests {
    fn name(&self) -> &'static str {
        "run_tests"
    }

    fn description(&self) -> &'static str {
        "Run the project's test suite against the current uncommitted changes."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &dyn ToolContext, _args: Value) -> Result<ToolOutcome> {
        run(ctx, Purpose::Test).await
    }
}
