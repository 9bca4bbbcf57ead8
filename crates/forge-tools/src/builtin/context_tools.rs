use async_trait::async_trait;
use forge_core::{Error, Result};
use forge_vfs::Vfs;
use serde_json::{json, Value};

use crate::builtin::args::str_field;
use crate::context::{SideEffect, ToolContext};
use crate::registry::{Tool, ToolOutcome};

const MAX_GREP_MATCHES: usize = 200;

fn grep(ctx: &dyn ToolContext, pattern: &str, prefix: Option<&str>) -> Result<Vec<Value>> {
    let mut matches = Vec::new();
    'files: for path in ctx.vfs().list(prefix)? {
        let Ok(bytes) = ctx.vfs().read(&path) else { continue };
        let Ok(text) = String::from_utf8(bytes) else { continue };
        for (idx, line) in text.lines().enumerate() {
            if line.contains(pattern) {
                matches.push(json!({ "path": path, "line": idx + 1, "text": line }));
                if matches.len() >= MAX_GREP_MATCHES {
                    break 'files;
                }
            }
        }
    }
    Ok(matches)
}

/// Like [`grep`], but each match carries `before`/`after` lines of
/// surrounding context instead of the bare matching line — the "peek"
/// shape `grep_context` needs so the model can judge relevance without
/// opening the whole file.
fn grep_with_radius(
    ctx: &dyn ToolContext,
    pattern: &str,
    prefix: Option<&str>,
    before: usize,
    after: usize,
) -> Result<Vec<Value>> {
    let mut matches = Vec::new();
    'files: for path in ctx.vfs().list(prefix)? {
        let Ok(bytes) = ctx.vfs().read(&path) else { continue };
        let Ok(text) = String::from_utf8(bytes) else { continue };
        let lines: Vec<&str> = text.lines().collect();
        for (idx, line) in lines.iter().enumerate() {
            if line.contains(pattern) {
                let start = idx.saturating_sub(before);
                let end = (idx + after + 1).min(lines.len());
                matches.push(json!({
                    "path": path,
                    "line": idx + 1,
                    "context": lines[start..end].join("\n"),
                }));
                if matches.len() >= MAX_GREP_MATCHES {
                    break 'files;
                }
            }
        }
    }
    Ok(matches)
}

/// Feed a short durable note into the turn's context — the agent's way
/// of recording something worth remembering (a decision, a constraint
/// discovered mid-turn) without it scrolling out of the prompt window.
/// Applied by the turn executor as a normal (non-ephemeral) content
/// block, unlike `think`'s pure scratch space.
pub struct UpdateContext;

#[async_trait]
impl Tool for UpdateContext {
    fn name(&self) -> &'static str {
        "update_context"
    }

    fn description(&self) -> &'static str {
        "Record a short durable note in the conversation's context."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } },
            "required": ["summary"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let summary = str_field(&args, self.name(), "summary")?;
        ctx.emit(SideEffect::EphemeralResult { content: summary.to_string() });
        Ok(ToolOutcome::ok(json!({ "recorded": true })))
    }
}

/// Search the branch for a literal substring and open every matching
/// file into context.
pub struct GrepOpen;

#[async_trait]
impl Tool for GrepOpen {
    fn name(&self) -> &'static str {
        "grep_open"
    }

    fn description(&self) -> &'static str {
        "Search for a literal substring across the branch and open every matching file."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path_prefix": { "type": "string" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let pattern = str_field(&args, self.name(), "pattern")?;
        let prefix = args.get("path_prefix").and_then(Value::as_str);
        let matches = grep(ctx, pattern, prefix)?;

        let mut opened = std::collections::BTreeSet::new();
        for m in &matches {
            if let Some(path) = m.get("path").and_then(Value::as_str) {
                if opened.insert(path.to_string()) {
                    ctx.emit(SideEffect::OpenFile { path: path.to_string() });
                }
            }
        }
        Ok(ToolOutcome::ok(json!({ "matches": matches, "files_opened": opened.len() })))
    }
}

/// Search for a literal substring without opening anything — an
/// ephemeral reconnaissance peek, unlike `grep_open`'s durable file
/// opens. The result carries `before`/`after` lines of surrounding
/// context per match and is tagged ephemeral so the turn executor
/// (`spec.md` §4.4's "bounded ephemerality") drops it from the prompt
/// stream's cacheable prefix at the start of the next turn rather than
/// letting it linger the way an opened file would.
pub struct GrepContext;

#[async_trait]
impl Tool for GrepContext {
    fn name(&self) -> &'static str {
        "grep_context"
    }

    fn description(&self) -> &'static str {
        "Search for a literal substring across the branch and return surrounding context, without opening the matched files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path_prefix": { "type": "string" },
                "before": { "type": "integer", "minimum": 0, "description": "Lines of context before each match (default 0)." },
                "after": { "type": "integer", "minimum": 0, "description": "Lines of context after each match (default 0)." }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let pattern = str_field(&args, self.name(), "pattern")?;
        let prefix = args.get("path_prefix").and_then(Value::as_str);
        let before = args.get("before").and_then(Value::as_u64).unwrap_or(0) as usize;
        let after = args.get("after").and_then(Value::as_u64).unwrap_or(0) as usize;
        let matches = grep_with_radius(ctx, pattern, prefix, before, after)?;

        ctx.emit(SideEffect::EphemeralResult {
            content: format!("grep_context('{pattern}'): {} match(es)", matches.len()),
        });
        Ok(ToolOutcome::ok(json!({ "matches": matches })))
    }
}

/// Enumerate files under an optional prefix, for getting the lay of
/// the land before diving into specific reads.
pub struct Scout;

#[async_trait]
impl Tool for Scout {
    fn name(&self) -> &'static str {
        "scout"
    }

    fn description(&self) -> &'static str {
        "List files in the branch, optionally filtered by a path prefix."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path_prefix": { "type": "string" } }
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let prefix = args.get("path_prefix").and_then(Value::as_str);
        let files = ctx.vfs().list(prefix)?;
        Ok(ToolOutcome::ok(json!({ "count": files.len(), "files": files })))
    }
}

/// A pure scratch space: the model writes out reasoning that is never
/// fed back as a durable context block, only recorded in the turn's
/// transcript for observers. No VFS access, no side effects — the
/// only tool in this registry that cannot fail on anything but bad
/// arguments.
pub struct Think;

#[async_trait]
impl Tool for Think {
    fn name(&self) -> &'static str {
        "think"
    }

    fn description(&self) -> &'static str {
        "Write out reasoning for the current step without taking any action."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "thought": { "type": "string" } },
            "required": ["thought"]
        })
    }

    async fn execute(&self, _ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let thought = str_field(&args, self.name(), "thought")?;
        if thought.trim().is_empty() {
            return Err(Error::BadArguments {
                tool: self.name().into(),
                detail: "'thought' must not be empty".into(),
            });
        }
        Ok(ToolOutcome::ok(json!({ "acknowledged": true })))
    }
}
