use async_trait::async_trait;
use forge_core::Result;
use serde_json::{json, Value};

use crate::builtin::args::str_field;
use crate::context::{SideEffect, ToolContext};
use crate::registry::{Tool, ToolOutcome};

/// Request an atomic commit of everything the turn has written so far.
///
/// The tool itself never touches `forge-git`: it only asks the turn
/// executor to run the commit pipeline (`spec.md` §4.2) once this tool
/// call returns, via [`SideEffect::CommitNow`] — keeping the commit's
/// claim/release discipline and race-retry logic in one place rather
/// than duplicating it behind every tool that might want to trigger one.
pub struct Commit;

#[async_trait]
impl Tool for Commit {
    fn name(&self) -> &'static str {
        "commit"
    }

    fn description(&self) -> &'static str {
        "Atomically commit everything written so far in this turn."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let message = str_field(&args, self.name(), "message")?;
        ctx.emit(SideEffect::CommitNow { message: message.to_string() });
        Ok(ToolOutcome::ok(json!({ "requested": true })))
    }
}

/// Ask the prompt manager to collapse everything before this point
/// behind `summary`, freeing context window without losing the
/// decisions already made — implemented as an ephemeral-marked block
/// so the prompt stream's relocate-on-modify logic (`spec.md` §4.4)
/// picks it up the same way any other context edit would.
pub struct Compact;

#[async_trait]
impl Tool for Compact {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn description(&self) -> &'static str {
        "Summarize and collapse the conversation so far to free up context."
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
        Ok(ToolOutcome::ok(json!({ "compacted": true })))
    }
}

/// Spawn a child session on a fresh branch to work on `intent`
/// concurrently with this turn.
pub struct SpawnSession;

#[async_trait]
impl Tool for SpawnSession {
    fn name(&self) -> &'static str {
        "spawn_session"
    }

    fn description(&self) -> &'static str {
        "Spawn a child agent session to work on a sub-task concurrently."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "intent": { "type": "string" } },
            "required": ["intent"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome> {
        let intent = str_field(&args, self.name(), "intent")?;
        // `ctx.spawn_child` already queues the `SideEffect::SpawnChild`
        // carrying the reserved id; nothing further to emit here.
        let session_id = ctx.spawn_child(intent)?;
        Ok(ToolOutcome::ok(json!({ "session_id": session_id.to_string() })))
    }
}

/// Suspend the turn until every child session spawned so far reaches
/// `Completed` or `Error` — puts the session into
/// `WAITING_CHILDREN` (`spec.md` §4.5) for the duration.
pub struct WaitSession;

#[async_trait]
impl Tool for WaitSession {
    fn name(&self) -> &'static str {
        "wait_session"
    }

    fn description(&self) -> &'static str {
        "Wait for previously spawned child sessions to finish."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &dyn ToolContext, _args: Value) -> Result<ToolOutcome> {
        ctx.emit(SideEffect::WaitChildren);
        let finished = ctx.wait_children()?;
        Ok(ToolOutcome::ok(json!({
            "finished": finished.into_iter().map(|id| id.to_string()).collect::<Vec<_>>()
        })))
    }
}
