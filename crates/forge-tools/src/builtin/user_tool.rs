use std::path::Path;

use async_trait::async_trait;
use forge_core::Result;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::approval::hash_source;
use crate::context::ToolContext;
use crate::exec::{run_sandboxed, ProcessStatus};
use crate::registry::{Tool, ToolOutcome};

#[derive(Deserialize)]
struct Manifest {
    name: String,
    description: String,
    #[serde(default = "default_schema")]
    input_schema: Value,
}

fn default_schema() -> Value {
    json!({ "type": "object" })
}

/// A tool defined outside the binary and discovered from a
/// `tools/<name>/` directory — `spec.md` §4.3's second tool-discovery
/// source, alongside [`crate::builtin::standard_registry`]'s built-ins.
/// Every invocation runs the directory's `run.sh` against a materialized
/// sandbox copy of the branch, the same way `check`/`run_tests` do.
///
/// Unlike a built-in, a `UserTool` always carries a [`Tool::source_hash`]
/// and so is always subject to the approval gate before a turn executor
/// will dispatch it.
pub struct UserTool {
    name: &'static str,
    description: &'static str,
    input_schema: Value,
    script: String,
    source_hash: String,
}

impl UserTool {
    /// Load every `tools/<name>/manifest.json` + `run.sh` pair under
    /// `dir`. A directory missing either file, or whose manifest fails
    /// to parse, is skipped: one malformed user tool should not take
    /// down discovery for the rest.
    pub fn discover(dir: &Path) -> Vec<UserTool> {
        let mut tools = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return tools;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Ok(manifest_bytes) = std::fs::read(path.join("manifest.json")) else {
                continue;
            };
            let Ok(script) = std::fs::read_to_string(path.join("run.sh")) else {
                continue;
            };
            let Ok(manifest) = serde_json::from_slice::<Manifest>(&manifest_bytes) else {
                continue;
            };
            let source_hash = hash_source(script.as_bytes());
            tools.push(UserTool {
                // Leaked once per process per discovered tool: `Tool::name`
                // returns `&'static str` to match the built-ins, and user
                // tools are discovered a handful of times per process
                // lifetime, not per call.
                name: Box::leak(manifest.name.into_boxed_str()),
                description: Box::leak(manifest.description.into_boxed_str()),
                input_schema: manifest.input_schema,
                script,
                source_hash,
            });
        }
        tools
    }
}

#[async_trait]
impl Tool for UserTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        self.description
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    fn source_hash(&self) -> Option<String> {
        Some(self.source_hash.clone())
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let sandbox = ctx.vfs().materialize_to_tempdir()?;
        std::fs::write(sandbox.path().join("run.sh"), &self.script).ok();
        std::fs::write(sandbox.path().join("args.json"), serde_json::to_vec(&args).unwrap_or_default()).ok();

        let output = run_sandboxed(sandbox.path(), "sh ./run.sh < args.json", ctx.tool_timeout()).await?;
        let passed = output.status == ProcessStatus::Pass;
        Ok(ToolOutcome {
            is_error: !passed,
            content: json!({
                "status": match output.status {
                    ProcessStatus::Pass => "pass",
                    ProcessStatus::Fail => "fail",
                    ProcessStatus::Timeout => "timeout",
                },
                "stdout": output.stdout,
                "stderr": output.stderr,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tool(root: &Path, name: &str, script: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("manifest.json"),
            serde_json::to_vec(&json!({ "name": name, "description": "a user tool" })).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.join("run.sh"), script).unwrap();
    }

    #[test]
    fn discovers_well_formed_tools() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "greet", "#!/bin/sh\necho hi\n");
        let tools = UserTool::discover(dir.path());
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "greet");
        assert!(tools[0].source_hash().is_some());
    }

    #[test]
    fn editing_the_script_changes_the_hash() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "greet", "#!/bin/sh\necho hi\n");
        let before = UserTool::discover(dir.path())[0].source_hash();
        write_tool(dir.path(), "greet", "#!/bin/sh\necho bye\n");
        let after = UserTool::discover(dir.path())[0].source_hash();
        assert_ne!(before, after);
    }

    #[test]
    fn malformed_tool_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("broken")).unwrap();
        std::fs::write(dir.path().join("broken").join("manifest.json"), b"not json").unwrap();
        std::fs::write(dir.path().join("broken").join("run.sh"), "echo hi").unwrap();
        let tools = UserTool::discover(dir.path());
        assert!(tools.is_empty());
    }
}
