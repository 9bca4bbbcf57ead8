//! Capability-restricted tool registry and the built-in file/search/
//! session/commit tools a turn can call.
//!
//! Grounded in `dk-engine::tool_ops` (the built-in tool implementations
//! and their result shapes) and `dk-agent-sdk::tools` (schema exposure
//! in Anthropic-tool-definition JSON), with sandboxed execution ported
//! from `dk-runner::executor::process::ProcessExecutor`.

pub mod approval;
pub mod builtin;
pub mod context;
pub mod exec;
pub mod registry;

pub use approval::{hash_source, ApprovalRecord, ApprovalStore};
pub use builtin::{register_user_tools, standard_registry, UserTool};
pub use context::{SideEffect, ToolContext};
pub use registry::{Tool, ToolDefinition, ToolOutcome, ToolRegistry};
