use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use forge_core::{BranchName, SessionId};
use forge_git::GitRepository;
use forge_vfs::WorkInProgressVfs;
use tokio::sync::Mutex as AsyncMutex;

use crate::prompt::PromptStream;
use crate::store::{SessionRecord, SessionState, SESSION_FILE_PATH};

/// The live, in-memory half of a session: everything that exists only
/// while an agent might still act on the branch. The durable half is
/// [`SessionRecord`], written to `.forge/session.json` by
/// [`LiveSession::persist`].
///
/// One `LiveSession` exists per branch with an active registry entry
/// (`spec.md` §4.5/§5's "single claimant"); the actual write-claim
/// discipline lives on [`WorkInProgressVfs`] itself so a turn never
/// has to hold a registry lock across an `.await`.
pub struct LiveSession {
    pub id: SessionId,
    pub branch: BranchName,
    pub vfs: Arc<WorkInProgressVfs>,
    pub prompt: AsyncMutex<PromptStream>,
    pub record: AsyncMutex<SessionRecord>,
    pending_user_messages: AsyncMutex<VecDeque<String>>,
    touched_paths: DashSet<String>,
}

impl LiveSession {
    pub fn new(repo: Arc<GitRepository>, branch: BranchName, intent: impl Into<String>) -> forge_core::Result<Self> {
        Self::with_id(repo, branch, intent, uuid::Uuid::new_v4())
    }

    /// Construct with a caller-chosen id — used when a tool call has
    /// already reserved a [`SessionId`] synchronously (see
    /// `forge-session::turn::TurnContext::spawn_child`) and the
    /// registry needs to materialize the same id rather than minting a
    /// fresh one.
    pub fn with_id(
        repo: Arc<GitRepository>,
        branch: BranchName,
        intent: impl Into<String>,
        id: SessionId,
    ) -> forge_core::Result<Self> {
        let vfs = Arc::new(WorkInProgressVfs::open(repo, branch.clone())?);
        let record = SessionRecord::new(id, branch.clone(), intent, Utc::now());
        Ok(Self {
            id,
            branch,
            vfs,
            prompt: AsyncMutex::new(PromptStream::new()),
            record: AsyncMutex::new(record),
            pending_user_messages: AsyncMutex::new(VecDeque::new()),
            touched_paths: DashSet::new(),
        })
    }

    pub async fn enqueue_user_message(&self, message: String) {
        self.pending_user_messages.lock().await.push_back(message);
    }

    pub async fn dequeue_user_message(&self) -> Option<String> {
        self.pending_user_messages.lock().await.pop_front()
    }

    pub fn mark_touched(&self, path: &str) {
        self.touched_paths.insert(path.to_string());
    }

    pub fn touched_paths(&self) -> Vec<String> {
        self.touched_paths.iter().map(|p| p.clone()).collect()
    }

    pub async fn set_state(&self, state: SessionState) {
        let mut record = self.record.lock().await;
        record.state = state;
        record.last_active = Utc::now();
    }

    pub async fn state(&self) -> SessionState {
        self.record.lock().await.state
    }

    /// Serialise the current [`SessionRecord`] and write it into this
    /// turn's overlay at [`SESSION_FILE_PATH`], so the next
    /// [`forge_vfs::WorkInProgressVfs::commit`] lands it in the same
    /// tree as whatever code changes the turn made — `spec.md` §4.5
    /// ("on turn commit, re-serialise and include in the same commit
    /// tree") and the universal invariant in `spec.md` §8 item 1.
    pub async fn persist(&self) -> forge_core::Result<()> {
        let bytes = self.record.lock().await.to_json()?;
        self.vfs.write(SESSION_FILE_PATH, bytes)
    }
}
