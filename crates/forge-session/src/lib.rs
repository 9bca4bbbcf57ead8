//! Agent turn executor, session state, the prompt stream, and
//! parent/child session coordination.
//!
//! Generalises three teacher modules at once: `dk-engine::workspace`'s
//! session/workspace bookkeeping (state machine and parent/child
//! coordination, minus `sqlx` — Redesign Flag #1), and
//! `dk-engine::workspace::event_bus` (carried over almost unchanged as
//! [`event_bus::RepoEventBus`]). The prompt stream and turn state
//! machine have no single teacher analog and are built in the
//! surrounding modules' idiom.

pub mod conversation;
pub mod event_bus;
pub mod inline;
pub mod live;
pub mod merge;
pub mod prompt;
pub mod registry;
pub mod store;
pub mod turn;

pub use conversation::{Message, ToolCallRecord};
pub use event_bus::{RepoEventBus, SessionEvent};
pub use inline::{parse_inline_commands, InlineCommand};
pub use live::LiveSession;
pub use merge::merge_branch;
pub use prompt::{Block, PromptStream};
pub use registry::SessionRegistry;
pub use store::{SessionRecord, SessionState, SESSION_FILE_PATH};
pub use turn::{CancelToken, ModelStream, StreamEvent, TurnExecutor, TurnLimits, TurnOutcome, TurnState};
