use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use forge_core::{BranchName, Result, SessionId};
use forge_git::GitRepository;
use forge_vfs::{CommitVfs, Vfs};

use crate::event_bus::{RepoEventBus, SessionEvent};
use crate::live::LiveSession;
use crate::store::{SessionRecord, SessionState, SESSION_FILE_PATH};

/// How often [`SessionRegistry::wait_children`] falls back to a state
/// check if no `StateChanged` broadcast arrives first — a safety net
/// behind the broadcast, which is the primary wake-up path, covering a
/// state change that lands in the narrow gap between a pending child's
/// last check and its resubscribe.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The process-wide map from branch to its live session — one entry
/// per branch with outstanding agent activity.
///
/// Generalises `dk-engine::workspace::session_manager::WorkspaceManager`:
/// same `DashMap`-backed registry shape, keyed by [`BranchName`]
/// instead of a database-issued workspace id, with no `PgPool` behind
/// it (Redesign Flag #1).
pub struct SessionRegistry {
    sessions: DashMap<BranchName, Arc<LiveSession>>,
    repo: Arc<GitRepository>,
    pub events: Arc<RepoEventBus>,
}

impl SessionRegistry {
    pub fn new(repo: Arc<GitRepository>, events: Arc<RepoEventBus>) -> Self {
        Self { sessions: DashMap::new(), repo, events }
    }

    pub fn get(&self, branch: &BranchName) -> Option<Arc<LiveSession>> {
        self.sessions.get(branch).map(|e| e.value().clone())
    }

    pub fn get_or_create(&self, branch: &BranchName, intent: &str) -> Result<Arc<LiveSession>> {
        self.get_or_create_with(branch, intent, None)
    }

    /// Like [`Self::get_or_create`] but materializes a caller-chosen
    /// [`SessionId`] when creating a fresh entry, so a tool call that
    /// already reserved an id synchronously (spawning a child) ends up
    /// with the registry's session wearing that same id.
    pub fn get_or_create_with_id(&self, branch: &BranchName, intent: &str, id: SessionId) -> Result<Arc<LiveSession>> {
        self.get_or_create_with(branch, intent, Some(id))
    }

    fn get_or_create_with(&self, branch: &BranchName, intent: &str, id: Option<SessionId>) -> Result<Arc<LiveSession>> {
        if let Some(existing) = self.get(branch) {
            return Ok(existing);
        }
        let session = Arc::new(match id {
            Some(id) => LiveSession::with_id(self.repo.clone(), branch.clone(), intent, id)?,
            None => LiveSession::new(self.repo.clone(), branch.clone(), intent)?,
        });
        self.sessions.insert(branch.clone(), session.clone());
        self.events.publish(
            branch,
            SessionEvent::StateChanged { session_id: session.id, state: "idle".into() },
        );
        Ok(session)
    }

    pub fn remove(&self, branch: &BranchName) {
        self.sessions.remove(branch);
    }

    pub fn list(&self) -> Vec<BranchName> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Spawn a child session on a fresh branch under `parent`, linking
    /// both [`SessionRecord`]s (`spec.md` §4.5's parent/child
    /// coordination). The child's branch starts at `parent`'s current
    /// tip so it inherits everything the parent has committed so far
    /// (`spec.md` §8 item 6: the fork's tree is byte-equal to the
    /// parent's at fork time).
    pub async fn spawn_child(&self, parent: &BranchName, intent: &str, id: SessionId) -> Result<(BranchName, SessionId)> {
        let child_branch = BranchName::new(format!("agent/{id}"))?;

        // Prefer the parent's live, possibly-uncommitted-this-turn base
        // over a fresh ref lookup: if the parent is loaded, its
        // `LiveSession::vfs.base()` is the most current tip this process
        // knows about. Fall back to the ref itself for a parent that
        // isn't loaded (or has never committed, i.e. is still unborn).
        let parent_tip = match self.get(parent) {
            Some(parent_session) => parent_session.vfs.base(),
            None => self.repo.branch_tip(parent)?,
        };
        if let Some(tip) = parent_tip {
            self.repo.fork_branch(&child_branch, tip)?;
        }

        let child = self.get_or_create_with_id(&child_branch, intent, id)?;

        if let Some(parent_session) = self.get(parent) {
            let mut parent_record = parent_session.record.lock().await;
            parent_record.children.push(child_branch.clone());
        }
        {
            let mut child_record = child.record.lock().await;
            child_record.parent = Some(parent.clone());
        }

        Ok((child_branch, child.id))
    }

    /// Block until every branch in `children` reaches `Completed` or
    /// `Error`, returning their final session ids in completion order.
    /// Drives the parent session's `WAITING_CHILDREN` state —
    /// `spec.md` §4.5.
    pub async fn wait_children(&self, children: &[BranchName]) -> Result<Vec<SessionId>> {
        let mut pending: Vec<BranchName> = children.to_vec();
        let mut finished = Vec::new();

        loop {
            let mut still_pending = Vec::new();
            for branch in pending {
                match self.get(&branch) {
                    Some(session) => {
                        let state = session.state().await;
                        if matches!(state, SessionState::Completed | SessionState::Error) {
                            finished.push(session.id);
                        } else {
                            still_pending.push(branch);
                        }
                    }
                    None => {
                        // The child session was never registered (or was
                        // already reaped) — nothing more to wait for.
                    }
                }
            }
            pending = still_pending;
            if pending.is_empty() {
                break;
            }

            // Subscribe to every still-pending child's `StateChanged`
            // broadcast, then race it against the poll interval. A
            // forwarder per branch relays the first event it sees onto
            // a shared channel so we can wake on whichever pending
            // child changes state first, without pulling in a crate for
            // fan-in over a dynamic number of receivers.
            let (wake_tx, mut wake_rx) = tokio::sync::mpsc::channel::<()>(1);
            let forwarders: Vec<_> = pending
                .iter()
                .map(|branch| {
                    let mut rx = self.events.subscribe(branch);
                    let wake_tx = wake_tx.clone();
                    tokio::spawn(async move {
                        if rx.recv().await.is_ok() {
                            let _ = wake_tx.send(()).await;
                        }
                    })
                })
                .collect();
            drop(wake_tx);

            tokio::select! {
                _ = wake_rx.recv() => {}
                _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {}
            }
            for handle in forwarders {
                handle.abort();
            }
        }

        Ok(finished)
    }

    /// Reconcile the registry against persisted `.forge/session.json`
    /// state for every branch known to exist, applying the
    /// crash-recovery rules in `spec.md` §4.5: a `Running` session
    /// could not have survived the restart mid-stream and resets to
    /// `Idle`; a `WaitingChildren` session, plus whichever of its
    /// children still exist, is reloaded so the wait can resume rather
    /// than being silently dropped.
    pub async fn startup_scan(&self, known_branches: &[BranchName]) -> Result<()> {
        // A plain worklist rather than recursion: a `WaitingChildren`
        // session's children are pushed back onto the same queue
        // instead of a recursive `async fn` call, which Rust can't
        // size without boxing every level of the call.
        let mut queue: Vec<BranchName> = known_branches.to_vec();

        while let Some(branch) = queue.pop() {
            let Some(tip) = self.repo.branch_tip(&branch)? else { continue };
            let view = CommitVfs::new(self.repo.clone(), tip);
            let Ok(bytes) = view.read(SESSION_FILE_PATH) else { continue };
            let Ok(mut record) = SessionRecord::from_json(&bytes) else { continue };

            record.reset_after_crash();

            let session = self.get_or_create(&branch, &record.intent)?;
            if record.state == SessionState::WaitingChildren {
                queue.extend(record.children.clone());
            }
            *session.record.lock().await = record;
        }
        Ok(())
    }

    /// Drop every idle session whose workspace has had no activity
    /// since `cutoff` — the non-database analog of the teacher's
    /// `WorkspaceManager::gc_expired`, which checked an
    /// `Instant`-based `expires_at` on persistent workspaces.
    pub async fn gc_idle_since(&self, cutoff: chrono::DateTime<Utc>) -> Vec<BranchName> {
        // Snapshot branch->session pairs before awaiting anything, so
        // the `DashMap` shard locks `iter()` holds are never live
        // across an `.await` point.
        let snapshot: Vec<(BranchName, Arc<LiveSession>)> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut reaped = Vec::new();
        for (branch, session) in snapshot {
            let record = session.record.lock().await;
            if record.state == SessionState::Idle && record.last_active < cutoff {
                reaped.push(branch);
            }
        }
        for branch in &reaped {
            self.remove(branch);
        }
        reaped
    }

    pub fn repo(&self) -> &Arc<GitRepository> {
        &self.repo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    fn registry() -> (tempfile::TempDir, SessionRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(GitRepository::init(dir.path()).unwrap());
        let events = Arc::new(RepoEventBus::new());
        (dir, SessionRegistry::new(repo, events))
    }

    #[tokio::test]
    async fn spawn_child_links_parent_and_child_records() {
        let (_dir, registry) = registry();
        let parent = branch("main");
        registry.get_or_create(&parent, "top level task").unwrap();

        let reserved_id = uuid::Uuid::new_v4();
        let (child_branch, child_id) = registry.spawn_child(&parent, "sub task", reserved_id).await.unwrap();
        assert_eq!(child_id, reserved_id);

        let parent_session = registry.get(&parent).unwrap();
        assert_eq!(parent_session.record.lock().await.children, vec![child_branch.clone()]);

        let child_session = registry.get(&child_branch).unwrap();
        assert_eq!(child_session.id, child_id);
        assert_eq!(child_session.record.lock().await.parent, Some(parent));
    }

    #[tokio::test]
    async fn wait_children_returns_once_every_child_finishes() {
        let (_dir, registry) = registry();
        let parent = branch("main");
        registry.get_or_create(&parent, "top level task").unwrap();
        let (child_branch, child_id) = registry
            .spawn_child(&parent, "sub task", uuid::Uuid::new_v4())
            .await
            .unwrap();

        let child_session = registry.get(&child_branch).unwrap();
        child_session.set_state(SessionState::Running).await;

        let registry = Arc::new(registry);
        let waiter = {
            let registry = registry.clone();
            let child_branch = child_branch.clone();
            tokio::spawn(async move { registry.wait_children(&[child_branch]).await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        child_session.set_state(SessionState::Completed).await;

        let finished = waiter.await.unwrap();
        assert_eq!(finished, vec![child_id]);
    }

    #[tokio::test]
    async fn startup_scan_resets_running_sessions_to_idle() {
        let (_dir, registry) = registry();
        let branch_name = branch("main");
        let session = registry.get_or_create(&branch_name, "intent").unwrap();
        session.set_state(SessionState::Running).await;
        let record = session.record.lock().await.clone();

        let bytes = record.to_json().unwrap();
        session.vfs.write(SESSION_FILE_PATH, bytes).unwrap();
        session.vfs.commit("Agent", "agent@forge.dev", "persist session").unwrap();
        registry.remove(&branch_name);

        registry.startup_scan(&[branch_name.clone()]).await.unwrap();
        let reloaded = registry.get(&branch_name).unwrap();
        assert_eq!(reloaded.state().await, SessionState::Idle);
    }
}
