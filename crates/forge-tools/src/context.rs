use std::time::Duration;

use forge_core::{Result, SessionId};
use forge_vfs::WorkInProgressVfs;

/// Fallback sandboxed-command timeout for a [`ToolContext`] that has no
/// configured bound of its own — matches `forge.toml`'s own
/// `ToolsConfig::default`'s `timeout_secs`.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// A side effect a tool's execution asks the turn executor to apply
/// after the tool returns — `spec.md` §4.3's directive list
/// (`OpenFile`, `EphemeralResult`, `CommitNow`, `SpawnChild`,
/// `WaitChildren`).
///
/// Tools never perform these themselves: returning a directive keeps
/// `forge-tools` free of any dependency on `forge-session`'s turn
/// executor or session registry, breaking what would otherwise be a
/// dependency cycle between "the tools a turn can call" and "the turn
/// that calls them" — the same cut the Design Notes make for the
/// teacher's `ToolContext`/`TYPE_CHECKING` split.
#[derive(Debug, Clone)]
pub enum SideEffect {
    OpenFile { path: String },
    EphemeralResult { content: String },
    CommitNow { message: String },
    /// `id` is reserved synchronously by [`ToolContext::spawn_child`]
    /// (a plain `Uuid::new_v4()`, not a registry round trip) so the
    /// tool's immediate result and the session the turn executor
    /// eventually registers agree on the same id.
    SpawnChild { intent: String, id: SessionId },
    WaitChildren,
}

/// Everything a built-in tool needs from its enclosing turn, expressed
/// as a trait so `forge-tools` depends on this shape rather than on
/// `forge-session` concretely.
pub trait ToolContext: Send + Sync {
    /// The writable VFS for the turn's branch.
    fn vfs(&self) -> &WorkInProgressVfs;

    /// Queue a side effect for the turn executor to apply once the
    /// tool call completes.
    fn emit(&self, effect: SideEffect);

    /// Reserve a [`SessionId`] for a child session to be spawned with
    /// `intent` and queue the corresponding [`SideEffect::SpawnChild`].
    /// This is synchronous and cannot itself register the child in any
    /// session registry (that requires locking async state the
    /// `ToolContext` trait has no way to reach) — the turn executor
    /// performs the actual registration from the queued effect after
    /// the tool call returns, reusing the id handed back here.
    fn spawn_child(&self, intent: &str) -> Result<SessionId>;

    /// Queue a [`SideEffect::WaitChildren`] request. Returns an empty
    /// list immediately — this call never blocks, since blocking until
    /// children finish requires the turn executor's async context.
    /// The authoritative wait happens after the tool call returns, in
    /// response to the queued effect; this return value is purely
    /// informational to the tool's own result payload.
    fn wait_children(&self) -> Result<Vec<SessionId>>;

    /// The wall-clock bound a sandboxed tool (`check`/`run_tests`)
    /// should run `run_sandboxed` under, sourced from `forge.toml`'s
    /// `[tools]` table. Defaults to [`DEFAULT_TOOL_TIMEOUT`] for a
    /// context that carries no configured bound (e.g. a test harness).
    fn tool_timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}
