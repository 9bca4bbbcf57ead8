mod args;
mod checks;
mod context_tools;
mod files;
mod session_tools;
mod user_tool;

pub use checks::{Check, RunTests};
pub use context_tools::{GrepContext, GrepOpen, Scout, Think, UpdateContext};
pub use files::{DeleteFile, GetLines, RenameFile, SearchReplace, UndoEdit, WriteFile};
pub use session_tools::{Commit, Compact, SpawnSession, WaitSession};
pub use user_tool::UserTool;

use crate::registry::ToolRegistry;

/// Build the standard registry containing every built-in tool named in
/// `spec.md` §4.3. Callers restricting capabilities (e.g. a read-only
/// child session) assemble a narrower [`ToolRegistry`] by hand instead
/// of starting from this one.
pub fn standard_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry
        .register(Box::new(WriteFile))
        .register(Box::new(DeleteFile))
        .register(Box::new(RenameFile))
        .register(Box::new(SearchReplace))
        .register(Box::new(GetLines))
        .register(Box::new(UndoEdit))
        .register(Box::new(UpdateContext))
        .register(Box::new(GrepOpen))
        .register(Box::new(GrepContext))
        .register(Box::new(Scout))
        .register(Box::new(Think))
        .register(Box::new(Commit))
        .register(Box::new(Compact))
        .register(Box::new(SpawnSession))
        .register(Box::new(WaitSession))
        .register(Box::new(Check))
        .register(Box::new(RunTests));
    registry
}

/// Discover user tools under `tools_dir` (`spec.md` §4.3's second
/// discovery source) and fold them into `registry` alongside whatever
/// built-ins it already holds.
pub fn register_user_tools(registry: &mut ToolRegistry, tools_dir: &std::path::Path) {
    for tool in user_tool::UserTool::discover(tools_dir) {
        registry.register(Box::new(tool));
    }
}
