use chrono::{DateTime, Utc};
use forge_core::{BranchName, Error, Result, SessionId};
use serde::{Deserialize, Serialize};

use crate::conversation::Message;

/// Where a branch's session state lives inside its own tree — a plain
/// git-tracked file, not a row in an external database. This is
/// Redesign Flag #1: the teacher persisted the equivalent of this
/// record (`dk-engine::workspace::session_manager::SessionInfo`) in
/// PostgreSQL; `spec.md`'s Non-goals (no staging area, no separate
/// dirty-state bookkeeping) push that state into the branch tree
/// itself instead.
pub const SESSION_FILE_PATH: &str = ".forge/session.json";

/// Schema version of [`SessionRecord`]'s on-disk JSON shape, bumped
/// whenever a field is added or changed so an older record can still
/// be read (`#[serde(default)]` fields) and so a much newer record
/// read by an older binary fails loudly instead of silently
/// misinterpreting it.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Suspended,
    Idle,
    Running,
    WaitingInput,
    WaitingChildren,
    Completed,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suspended => "suspended",
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingInput => "waiting_input",
            Self::WaitingChildren => "waiting_children",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// The persisted snapshot of one branch's session, the direct analog
/// of `dk-engine::workspace::session_manager::SessionInfo` with the
/// database identity columns replaced by the branch name itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub session_id: SessionId,
    pub branch: BranchName,
    #[serde(default)]
    pub parent: Option<BranchName>,
    #[serde(default)]
    pub children: Vec<BranchName>,
    pub intent: String,
    pub state: SessionState,
    /// The durable conversation (`spec.md` §3's "conversation (ordered
    /// sequence of messages)"). Forward-compatible readers that predate
    /// this field default to an empty conversation rather than failing.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Paths currently held in full-content context — `spec.md` §3's
    /// "active files (set of paths currently in full-content context)".
    #[serde(default)]
    pub active_files: Vec<String>,
    /// Set while the session is `WAITING_CHILDREN`: the branches this
    /// turn is blocked on. `spec.md` §3's "pending-wait descriptor".
    #[serde(default)]
    pub pending_wait: Option<Vec<BranchName>>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    1
}

impl SessionRecord {
    pub fn new(session_id: SessionId, branch: BranchName, intent: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id,
            branch,
            parent: None,
            children: Vec::new(),
            intent: intent.into(),
            state: SessionState::Idle,
            messages: Vec::new(),
            active_files: Vec::new(),
            pending_wait: None,
            created_at: now,
            last_active: now,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Internal(format!("corrupt session record: {e}")))
    }

    /// Crash-recovery rule applied at startup scan: a session caught
    /// mid-turn (`Running`) did not crash cleanly and cannot simply be
    /// resumed mid-stream, so it is reset to `Idle` and waits for the
    /// next turn to be driven in. `WaitingChildren` sessions are left
    /// as-is — the registry reloads them and their children rather
    /// than collapsing the wait.
    pub fn reset_after_crash(&mut self) {
        if self.state == SessionState::Running {
            self.state = SessionState::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    #[test]
    fn round_trips_through_json() {
        let record = SessionRecord::new(Uuid::new_v4(), branch("main"), "fix the bug", Utc::now());
        let bytes = record.to_json().unwrap();
        let reloaded = SessionRecord::from_json(&bytes).unwrap();
        assert_eq!(reloaded.session_id, record.session_id);
        assert_eq!(reloaded.branch, record.branch);
    }

    #[test]
    fn missing_schema_version_defaults_for_forward_compatibility() {
        let bytes = serde_json::json!({
            "session_id": Uuid::new_v4(),
            "branch": "main",
            "intent": "legacy record with no schema_version field",
            "state": "idle",
            "created_at": Utc::now(),
            "last_active": Utc::now(),
        });
        let record: SessionRecord = serde_json::from_value(bytes).unwrap();
        assert_eq!(record.schema_version, 1);
        assert!(record.children.is_empty());
        assert!(record.parent.is_none());
        assert!(record.messages.is_empty());
        assert!(record.active_files.is_empty());
        assert!(record.pending_wait.is_none());
    }

    #[test]
    fn conversation_and_active_files_round_trip() {
        let mut record = SessionRecord::new(Uuid::new_v4(), branch("main"), "fix the bug", Utc::now());
        record.messages.push(Message::User { content: "please fix it".into() });
        record.active_files.push("src/lib.rs".into());
        record.pending_wait = Some(vec![branch("agent/child")]);

        let bytes = record.to_json().unwrap();
        let reloaded = SessionRecord::from_json(&bytes).unwrap();
        assert_eq!(reloaded.messages.len(), 1);
        assert_eq!(reloaded.active_files, vec!["src/lib.rs".to_string()]);
        assert_eq!(reloaded.pending_wait, Some(vec![branch("agent/child")]));
    }

    #[test]
    fn running_resets_to_idle_after_a_crash() {
        let mut record = SessionRecord::new(Uuid::new_v4(), branch("main"), "intent", Utc::now());
        record.state = SessionState::Running;
        record.reset_after_crash();
        assert_eq!(record.state, SessionState::Idle);
    }

    #[test]
    fn waiting_children_is_left_alone_by_the_crash_reset() {
        let mut record = SessionRecord::new(Uuid::new_v4(), branch("main"), "intent", Utc::now());
        record.state = SessionState::WaitingChildren;
        record.reset_after_crash();
        assert_eq!(record.state, SessionState::WaitingChildren);
    }
}
