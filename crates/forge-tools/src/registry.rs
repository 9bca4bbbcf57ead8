use std::collections::BTreeMap;

use async_trait::async_trait;
use forge_core::{Error, Result};
use serde_json::Value;

use crate::context::ToolContext;

/// A tool's externally-visible shape — name, description, and JSON
/// Schema input — in the same shape as the teacher's
/// `dk-agent-sdk::tools::ToolDefinition` / Anthropic tool-definition
/// JSON, so a model-facing prompt manager can expose these unchanged.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The outcome of a tool call, handed back to the turn executor to
/// fold into the prompt stream as a tool-result block.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolOutcome {
    pub content: Value,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<Value>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: Value::String(message.into()),
            is_error: true,
        }
    }
}

/// A single callable tool. Implementations are expected to be
/// stateless beyond whatever `ToolContext` and their own arguments
/// give them — the registry hands out `&dyn Tool` freely across
/// concurrent turns.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;

    async fn execute(&self, ctx: &dyn ToolContext, args: Value) -> Result<ToolOutcome>;

    /// Content hash of this tool's source, for the approval gate in
    /// `spec.md` §4.3. Built-in tools return `None` and bypass approval
    /// entirely; a discovered user tool returns `Some` of its script's
    /// hash, re-computed fresh on every load so an edited script no
    /// longer matches a stale approval.
    fn source_hash(&self) -> Option<String> {
        None
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name(),
            description: self.description(),
            input_schema: self.input_schema(),
        }
    }
}

/// The full set of tools a turn may call, keyed by name — the
/// capability restriction in `spec.md` §4.3 is enforced by which tools
/// a given registry instance was built with, not by a runtime
/// allow-list check inside dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> &mut Self {
        self.tools.insert(tool.name(), tool);
        self
    }

    pub fn get(&self, name: &str) -> Result<&dyn Tool> {
        self.tools
            .get(name)
            .map(|t| t.as_ref())
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub async fn dispatch(&self, ctx: &dyn ToolContext, name: &str, args: Value) -> Result<ToolOutcome> {
        let tool = self.get(name)?;
        tool.execute(ctx, args).await
    }
}
