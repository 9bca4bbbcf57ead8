use forge_core::ToolCallId;
use serde::Serialize;
use serde_json::Value;

/// One unit of the content stream sent to the model — `spec.md` §4.4.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    System { text: String },
    User { text: String },
    Assistant { text: String },
    ToolUse { id: ToolCallId, name: String, input: Value },
    ToolResult { id: ToolCallId, content: Value, is_error: bool },
    File { path: String, content: String },
    Ephemeral { content: String },
}

/// A cache-maximizing content-block stream.
///
/// Ordinary conversation (`system`/`user`/`assistant`/`tool_use`/
/// `tool_result`) is strictly append-only, so every prefix a model
/// provider has already cached stays byte-identical turn over turn.
/// Open files are different: re-reading a file after an edit can't
/// just append a diff in place without invalidating the cached prefix
/// up to the old copy, so a changed file's block is deleted and a
/// fresh one appended at the end of the file region instead — the same
/// "relocate rather than mutate in place" rule `spec.md` §4.4 names.
///
/// Internally this is modeled as three pieces rather than one flat
/// `Vec<Block>`: `body` (the append-only conversation), `files` (an
/// ordered path→content map, most-recently-touched last), and a single
/// optional `ephemeral` block. Rendering concatenates them in that
/// order, which gets the two invariants "file blocks are contiguous"
/// and "the ephemeral block, if any, is always last" for free instead
/// of needing to be checked.
#[derive(Debug, Default)]
pub struct PromptStream {
    body: Vec<Block>,
    files: Vec<(String, String)>,
    ephemeral: Option<String>,
}

impl PromptStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_system(&mut self, text: impl Into<String>) {
        self.body.push(Block::System { text: text.into() });
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.body.push(Block::User { text: text.into() });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.body.push(Block::Assistant { text: text.into() });
    }

    pub fn push_tool_use(&mut self, id: ToolCallId, name: impl Into<String>, input: Value) {
        self.body.push(Block::ToolUse { id, name: name.into(), input });
    }

    pub fn push_tool_result(&mut self, id: ToolCallId, content: Value, is_error: bool) {
        self.body.push(Block::ToolResult { id, content, is_error });
    }

    /// Upsert a file's content block. If the path is already open, its
    /// existing block is removed and a fresh one appended at the end
    /// of the file region — the relocate-on-modify rule.
    pub fn set_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        let path = path.into();
        self.files.retain(|(p, _)| p != &path);
        self.files.push((path, content.into()));
    }

    /// Drop a file out of context entirely (e.g. an eviction policy
    /// freeing budget, not merely a content update).
    pub fn close_file(&mut self, path: &str) {
        self.files.retain(|(p, _)| p != path);
    }

    pub fn open_file_paths(&self) -> Vec<&str> {
        self.files.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// Set (replacing any prior one) the single ephemeral block, which
    /// always renders last.
    pub fn set_ephemeral(&mut self, content: impl Into<String>) {
        self.ephemeral = Some(content.into());
    }

    pub fn clear_ephemeral(&mut self) {
        self.ephemeral = None;
    }

    /// Replace whatever ephemeral block a previous turn left behind with
    /// a placeholder summary in `body`, then clear it. Called once at
    /// the start of every turn so `compact`/`scout`/`think`'s
    /// `SideEffect::EphemeralResult` content never outlives the turn
    /// that produced it — `spec.md` §4.4's bounded-ephemerality
    /// invariant: the block is replaced, not accumulated.
    pub fn demote_ephemeral(&mut self) {
        if self.ephemeral.is_some() {
            self.body.push(Block::System {
                text: "[ephemeral context from the previous turn was cleared]".into(),
            });
        }
        self.clear_ephemeral();
    }

    pub fn len(&self) -> usize {
        self.body.len() + self.files.len() + usize::from(self.ephemeral.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materialize the stream in model-send order: conversation, then
    /// the contiguous file region, then the ephemeral block.
    pub fn to_blocks(&self) -> Vec<Block> {
        let mut blocks = self.body.clone();
        blocks.extend(
            self.files
                .iter()
                .map(|(path, content)| Block::File { path: path.clone(), content: content.clone() }),
        );
        if let Some(content) = &self.ephemeral {
            blocks.push(Block::Ephemeral { content: content.clone() });
        }
        blocks
    }
}
