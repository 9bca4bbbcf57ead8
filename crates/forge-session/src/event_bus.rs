use dashmap::DashMap;
use forge_core::{BranchName, SessionId};
use tokio::sync::broadcast;

/// Capacity of each per-branch broadcast channel, unchanged from
/// `dk-engine::workspace::event_bus::RepoEventBus`'s
/// `DEFAULT_CHANNEL_CAPACITY` — generous enough that a slow observer
/// lagging by a burst of tool calls still catches up rather than
/// missing events outright.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Everything an observer (a CLI, an editor extension, a parent
/// session) can learn about a session without reading the git tree
/// itself — `spec.md` §6's event list.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    MessageAppended { session_id: SessionId, role: &'static str },
    ToolCallStarted { session_id: SessionId, tool: String, call_id: String },
    ToolCallResult { session_id: SessionId, call_id: String, is_error: bool },
    TurnFinished { session_id: SessionId, commit_ref: Option<String> },
    StateChanged { session_id: SessionId, state: String },
    ApprovalRequired { session_id: SessionId, tool: String, hash: String },
    ContextUpdated { session_id: SessionId },
    Error { session_id: SessionId, kind: String, detail: String },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::MessageAppended { session_id, .. }
            | Self::ToolCallStarted { session_id, .. }
            | Self::ToolCallResult { session_id, .. }
            | Self::TurnFinished { session_id, .. }
            | Self::StateChanged { session_id, .. }
            | Self::ApprovalRequired { session_id, .. }
            | Self::ContextUpdated { session_id, .. }
            | Self::Error { session_id, .. } => *session_id,
        }
    }
}

/// Per-branch fan-out of [`SessionEvent`]s to however many observers
/// are currently watching — ported nearly unchanged from
/// `dk-engine::workspace::event_bus::RepoEventBus`, which already drew
/// exactly this boundary (lazy per-key `broadcast::Sender` creation, no
/// network hop) for the teacher's per-repository event stream.
#[derive(Default)]
pub struct RepoEventBus {
    channels: DashMap<BranchName, broadcast::Sender<SessionEvent>>,
}

impl RepoEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create_sender(&self, branch: &BranchName) -> broadcast::Sender<SessionEvent> {
        self.channels
            .entry(branch.clone())
            .or_insert_with(|| broadcast::channel(DEFAULT_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish an event. A no-op (not an error) if nobody is
    /// subscribed — there is no guaranteed delivery here, only
    /// best-effort fan-out.
    pub fn publish(&self, branch: &BranchName, event: SessionEvent) {
        let sender = self.get_or_create_sender(branch);
        let _ = sender.send(event);
    }

    pub fn subscribe(&self, branch: &BranchName) -> broadcast::Receiver<SessionEvent> {
        self.get_or_create_sender(branch).subscribe()
    }

    pub fn active_branches(&self) -> Vec<BranchName> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn subscriber_count(&self, branch: &BranchName) -> usize {
        self.channels
            .get(branch)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels nobody is listening to anymore, so a long-lived
    /// registry doesn't accumulate one dead `broadcast::Sender` per
    /// branch that ever had a session.
    pub fn prune_dead_channels(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn branch(name: &str) -> BranchName {
        BranchName::new(name).unwrap()
    }

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = RepoEventBus::new();
        let b = branch("main");
        let mut rx = bus.subscribe(&b);
        let session_id = Uuid::new_v4();
        bus.publish(&b, SessionEvent::ContextUpdated { session_id });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.session_id(), session_id);
    }

    #[test]
    fn publishing_with_no_subscriber_does_not_panic() {
        let bus = RepoEventBus::new();
        bus.publish(&branch("main"), SessionEvent::ContextUpdated { session_id: Uuid::new_v4() });
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_the_same_event() {
        let bus = RepoEventBus::new();
        let b = branch("main");
        let mut rx1 = bus.subscribe(&b);
        let mut rx2 = bus.subscribe(&b);
        let session_id = Uuid::new_v4();
        bus.publish(&b, SessionEvent::ContextUpdated { session_id });
        assert_eq!(rx1.recv().await.unwrap().session_id(), session_id);
        assert_eq!(rx2.recv().await.unwrap().session_id(), session_id);
    }

    #[test]
    fn pruning_drops_channels_with_no_subscribers() {
        let bus = RepoEventBus::new();
        bus.subscribe(&branch("gone"));
        assert_eq!(bus.active_branches().len(), 1);
        bus.prune_dead_channels();
        assert!(bus.active_branches().is_empty());
    }
}
