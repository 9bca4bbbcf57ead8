use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use forge_core::{BranchName, Error, Result, ToolCallId};
use forge_tools::{ApprovalStore, SideEffect, ToolContext, ToolRegistry};
use forge_vfs::WorkInProgressVfs;
use serde_json::Value;

use crate::event_bus::{RepoEventBus, SessionEvent};
use crate::live::LiveSession;
use crate::registry::SessionRegistry;
use crate::store::SessionState;

/// Retry and tool-timeout bounds a turn honors, sourced from
/// `forge.toml`'s `[tools]` table (`spec.md` §4.6, §5). The defaults
/// match what the bare constants used to hardcode, so a repo with no
/// `forge.toml` (or a caller that skips config entirely, e.g. tests)
/// behaves exactly as before.
#[derive(Debug, Clone, Copy)]
pub struct TurnLimits {
    /// Turns retry a retriable model/transport error at most this many
    /// times before surfacing it.
    pub max_model_retries: u32,
    /// The wall-clock bound a sandboxed tool call (`check`/`run_tests`)
    /// runs under.
    pub tool_timeout: std::time::Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self { max_model_retries: 3, tool_timeout: std::time::Duration::from_secs(120) }
    }
}

/// The turn executor's own state, distinct from (but driving)
/// [`SessionState`] — `spec.md` §4.6:
/// `IDLE → STREAMING → [TOOLCALLS? → EXECUTING → STREAMING]* → FINALISING → IDLE|COMPLETED|ERROR`,
/// with a `WAITING_CHILDREN` branch out of `EXECUTING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Executing,
    WaitingChildren,
    Finalising,
    Completed,
    Error,
}

impl TurnState {
    fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (Idle, Streaming)
                | (Streaming, Executing)
                | (Streaming, Finalising)
                | (Executing, Streaming)
                | (Executing, WaitingChildren)
                | (WaitingChildren, Streaming)
                | (Finalising, Idle)
                | (Finalising, Completed)
                // A cancellation unwinds directly back to IDLE without a
                // commit, from wherever the turn was suspended.
                | (Streaming, Idle)
                | (Executing, Idle)
                | (WaitingChildren, Idle)
                | (_, Error)
        )
    }
}

/// One event out of a model's streaming response.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall { id: ToolCallId, name: String, input: Value },
    Done,
}

/// The model-streaming interface a turn executor drives. `spec.md`
/// places model-provider HTTP specifics out of scope, so this is a
/// plain trait rather than a wire protocol — whatever adapter speaks
/// to an actual model provider implements it.
#[async_trait]
pub trait ModelStream: Send {
    async fn send(&mut self, blocks: Vec<crate::prompt::Block>) -> Result<()>;
    async fn next_event(&mut self) -> Result<StreamEvent>;
    fn cancel(&mut self);
}

/// Cooperative cancellation flag checked at every suspension point —
/// `spec.md` §4.6's "cancellation at every suspension point". A plain
/// `AtomicBool` rather than `tokio_util::CancellationToken`, since
/// nothing downstream needs hierarchical cancellation.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Bridges a tool call's [`ToolContext`] needs to the turn executor's
/// live state, without `forge-tools` depending on `forge-session`
/// concretely — the same seam the Design Notes describe for the
/// teacher's `ToolContext`/`TYPE_CHECKING` split.
struct TurnContext<'a> {
    live: &'a LiveSession,
    effects: StdMutex<Vec<SideEffect>>,
    tool_timeout: std::time::Duration,
}

impl ToolContext for TurnContext<'_> {
    fn vfs(&self) -> &WorkInProgressVfs {
        &self.live.vfs
    }

    fn emit(&self, effect: SideEffect) {
        self.effects.lock().expect("turn context mutex poisoned").push(effect);
    }

    fn spawn_child(&self, intent: &str) -> Result<forge_core::SessionId> {
        // Reserve the id synchronously; `TurnExecutor::apply_side_effect`
        // performs the actual (async) registry registration for this
        // same id once the tool call returns.
        let id = uuid::Uuid::new_v4();
        self.emit(SideEffect::SpawnChild { intent: intent.to_string(), id });
        Ok(id)
    }

    fn wait_children(&self) -> Result<Vec<forge_core::SessionId>> {
        self.emit(SideEffect::WaitChildren);
        Ok(Vec::new())
    }

    fn tool_timeout(&self) -> std::time::Duration {
        self.tool_timeout
    }
}

/// Drives one session's turn: send the prompt stream, consume model
/// output, dispatch tool calls in document order, apply their side
/// effects, and land a commit — `spec.md` §4.6.
pub struct TurnExecutor {
    live: Arc<LiveSession>,
    registry: Arc<SessionRegistry>,
    tools: Arc<ToolRegistry>,
    approvals: ApprovalStore,
    cancel: CancelToken,
    limits: TurnLimits,
    /// The assistant text accumulated so far in the current streaming
    /// round, kept outside the `run_inner` stack frame so a mid-stream
    /// cancellation (which unwinds via `Error::Cancelled` rather than
    /// returning a value) can still recover it — `spec.md` §4.6/
    /// Scenario E.
    partial_text: StdMutex<String>,
}

/// What a turn ended up doing, for the host loop driving
/// [`TurnExecutor::run`] to decide what happens next.
#[derive(Debug)]
pub enum TurnOutcome {
    Idle,
    Completed,
    Error(Error),
}

impl TurnExecutor {
    pub fn new(
        live: Arc<LiveSession>,
        registry: Arc<SessionRegistry>,
        tools: Arc<ToolRegistry>,
        approvals: ApprovalStore,
        limits: TurnLimits,
    ) -> Self {
        Self {
            live,
            registry,
            tools,
            approvals,
            cancel: CancelToken::new(),
            limits,
            partial_text: StdMutex::new(String::new()),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn events(&self) -> &RepoEventBus {
        &self.registry.events
    }

    fn branch(&self) -> &BranchName {
        &self.live.branch
    }

    async fn transition(&self, from: TurnState, to: TurnState) -> Result<()> {
        if !from.can_transition_to(to) {
            return Err(Error::IllegalTransition {
                from: format!("{from:?}"),
                to: format!("{to:?}"),
            });
        }
        let session_state = match to {
            TurnState::Idle => SessionState::Idle,
            TurnState::Streaming | TurnState::Executing | TurnState::Finalising => SessionState::Running,
            TurnState::WaitingChildren => SessionState::WaitingChildren,
            TurnState::Completed => SessionState::Completed,
            TurnState::Error => SessionState::Error,
        };
        self.live.set_state(session_state).await;
        self.events().publish(
            self.branch(),
            SessionEvent::StateChanged { session_id: self.live.id, state: session_state.as_str().into() },
        );
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run exactly one turn to completion (or to the point it needs
    /// another user message, a commit, or a crash to resume from).
    pub async fn run(&self, model: &mut dyn ModelStream, user_message: Option<String>) -> TurnOutcome {
        match self.run_inner(model, user_message).await {
            Ok(outcome) => outcome,
            Err(Error::Cancelled) => {
                // Unwind to the nearest clean state rather than ERROR:
                // whatever the turn wrote this cycle is dropped, the
                // branch ref is untouched, and the next turn starts fresh
                // (`spec.md` §5's cancellation rule, Scenario E). Whatever
                // assistant text had already streamed this round is kept
                // rather than discarded, marked `cancelled`, with a
                // synthetic user note recording that the turn didn't
                // finish on its own.
                self.live.vfs.discard_overlay();
                let partial = std::mem::take(&mut *self.partial_text.lock().expect("turn executor mutex poisoned"));
                let content = if partial.is_empty() {
                    "(cancelled before any output streamed)".to_string()
                } else {
                    partial
                };
                {
                    let mut record = self.live.record.lock().await;
                    record.messages.push(crate::conversation::Message::Assistant {
                        content,
                        tool_calls: Vec::new(),
                        cancelled: true,
                    });
                    record.messages.push(crate::conversation::Message::User {
                        content: "Turn was cancelled before it completed.".into(),
                    });
                }
                let _ = self.transition(TurnState::Streaming, TurnState::Idle).await;
                self.events().publish(
                    self.branch(),
                    SessionEvent::Error { session_id: self.live.id, kind: "cancelled".into(), detail: "turn cancelled".into() },
                );
                TurnOutcome::Idle
            }
            Err(e) => {
                let _ = self.transition(TurnState::Streaming, TurnState::Error).await;
                self.events().publish(
                    self.branch(),
                    SessionEvent::Error { session_id: self.live.id, kind: e.kind().into(), detail: e.to_string() },
                );
                TurnOutcome::Error(e)
            }
        }
    }

    async fn run_inner(&self, model: &mut dyn ModelStream, user_message: Option<String>) -> Result<TurnOutcome> {
        self.check_cancelled()?;
        self.transition(TurnState::Idle, TurnState::Streaming).await?;

        // Any ephemeral block a previous turn's `compact`/`scout`/
        // `think` left behind is replaced by a placeholder now, at the
        // very start of this turn, rather than carried forward — the
        // "bounded ephemerality" invariant (`spec.md` §4.4).
        self.live.prompt.lock().await.demote_ephemeral();

        if let Some(message) = user_message {
            self.live.prompt.lock().await.push_user(message.clone());
            self.live
                .record
                .lock()
                .await
                .messages
                .push(crate::conversation::Message::User { content: message });
            self.events().publish(
                self.branch(),
                SessionEvent::MessageAppended { session_id: self.live.id, role: "user" },
            );
        }

        let mut retries = 0;
        loop {
            self.check_cancelled()?;
            let blocks = self.live.prompt.lock().await.to_blocks();
            if let Err(e) = model.send(blocks).await {
                if e.is_retriable_model_error() && retries < self.limits.max_model_retries {
                    retries += 1;
                    continue;
                }
                return Err(e);
            }

            *self.partial_text.lock().expect("turn executor mutex poisoned") = String::new();
            let mut text = String::new();
            let mut tool_calls = Vec::new();
            loop {
                self.check_cancelled()?;
                match model.next_event().await {
                    Ok(StreamEvent::TextDelta(delta)) => {
                        text.push_str(&delta);
                        *self.partial_text.lock().expect("turn executor mutex poisoned") = text.clone();
                    }
                    Ok(StreamEvent::ToolCall { id, name, input }) => tool_calls.push((id, name, input)),
                    Ok(StreamEvent::Done) => break,
                    Err(e) if e.is_retriable_model_error() && retries < self.limits.max_model_retries => {
                        retries += 1;
                        model.cancel();
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            // This round's text landed in the conversation below; it no
            // longer needs to be recoverable via a cancellation unwind.
            *self.partial_text.lock().expect("turn executor mutex poisoned") = String::new();

            if !text.is_empty() {
                self.live.prompt.lock().await.push_assistant(text.clone());
            }

            // Channel (b): inline pseudo-XML commands embedded in the
            // assistant's own prose, appended after the model's
            // structured tool calls (channel (a)) — both channels
            // ultimately dispatch through the same registry in document
            // order (`spec.md` §4.6, §9's Open Question).
            let inline = crate::inline::parse_inline_commands(&text);
            if !inline.is_empty() {
                tool_calls.extend(crate::inline::assign_ids(inline, tool_calls.len()));
            }

            if !text.is_empty() || !tool_calls.is_empty() {
                let tool_call_records = tool_calls
                    .iter()
                    .map(|(id, name, input)| crate::conversation::ToolCallRecord {
                        id: id.clone(),
                        name: name.clone(),
                        input: input.clone(),
                    })
                    .collect();
                self.live.record.lock().await.messages.push(crate::conversation::Message::Assistant {
                    content: text,
                    tool_calls: tool_call_records,
                    cancelled: false,
                });
            }
            self.events().publish(
                self.branch(),
                SessionEvent::MessageAppended { session_id: self.live.id, role: "assistant" },
            );

            if tool_calls.is_empty() {
                break;
            }

            self.transition(TurnState::Streaming, TurnState::Executing).await?;
            let wait_requested = self.execute_tool_calls(tool_calls).await?;
            if wait_requested {
                self.transition(TurnState::Executing, TurnState::WaitingChildren).await?;
                let children = self.live.record.lock().await.children.clone();
                self.live.record.lock().await.pending_wait = Some(children.clone());
                let finished = self.registry.wait_children(&children).await?;
                self.live.record.lock().await.pending_wait = None;
                self.inject_child_results(&children, &finished).await;
                self.transition(TurnState::WaitingChildren, TurnState::Streaming).await?;
            } else {
                self.transition(TurnState::Executing, TurnState::Streaming).await?;
            }
        }

        self.transition(TurnState::Streaming, TurnState::Finalising).await?;
        let outcome = self.finalise().await?;
        Ok(outcome)
    }

    /// Dispatch each structured tool call in the document order the
    /// model emitted them (`spec.md` §9's Open Question, resolved:
    /// concurrent structured calls in one response are not run in
    /// parallel — they dispatch strictly in order, so a later call can
    /// depend on an earlier one's effect on the overlay). Returns
    /// whether any call asked to wait on children.
    async fn execute_tool_calls(&self, calls: Vec<(ToolCallId, String, Value)>) -> Result<bool> {
        // The dedicated tool thread's claim on the writable VFS for the
        // duration of this batch — `spec.md` §4.2/§4.6's "the stream
        // thread and the tool thread both claim the VFS; only one claims
        // at a time". Held for the whole batch rather than per-call,
        // since document-order dispatch within a turn is already
        // serialized and a later call in the same batch may depend on an
        // earlier one's overlay write. If a previous claim on this VFS
        // was never released (a crash mid-tool), this fails with
        // `Error::OverlayPoisoned`, which `run()`'s catch-all error
        // branch turns into the session's `ERROR` state.
        let _claim = self.live.vfs.claim()?;
        let mut wait_requested = false;
        for (id, name, input) in calls {
            self.check_cancelled()?;
            self.events().publish(
                self.branch(),
                SessionEvent::ToolCallStarted { session_id: self.live.id, tool: name.clone(), call_id: id.0.clone() },
            );

            // Built-in tools carry no source hash and skip this gate
            // entirely; a user tool only runs once its current source
            // hash matches a persisted approval (`spec.md` §4.3).
            if let Ok(tool) = self.tools.get(&name) {
                if let Some(hash) = tool.source_hash() {
                    if !self.approvals.is_approved(&name, &hash) {
                        self.events().publish(
                            self.branch(),
                            SessionEvent::ApprovalRequired { session_id: self.live.id, tool: name.clone(), hash },
                        );
                        let refusal =
                            Value::String(format!("tool '{name}' is not approved for its current source; call refused"));
                        {
                            let mut prompt = self.live.prompt.lock().await;
                            prompt.push_tool_use(id.clone(), name.clone(), Value::Null);
                            prompt.push_tool_result(id.clone(), refusal.clone(), true);
                        }
                        self.live.record.lock().await.messages.push(crate::conversation::Message::Tool {
                            tool_call_id: id.clone(),
                            content: refusal,
                            is_error: true,
                        });
                        self.events().publish(
                            self.branch(),
                            SessionEvent::ToolCallResult { session_id: self.live.id, call_id: id.0, is_error: true },
                        );
                        continue;
                    }
                }
            }

            let ctx = TurnContext {
                live: &self.live,
                effects: StdMutex::new(Vec::new()),
                tool_timeout: self.limits.tool_timeout,
            };
            let outcome = self.tools.dispatch(&ctx, &name, input).await;

            let (content, is_error, effects) = match outcome {
                Ok(outcome) => (outcome.content, outcome.is_error, ctx.effects.into_inner().unwrap()),
                Err(e) => (Value::String(e.to_string()), true, ctx.effects.into_inner().unwrap()),
            };

            {
                let mut prompt = self.live.prompt.lock().await;
                prompt.push_tool_use(id.clone(), name.clone(), Value::Null);
                prompt.push_tool_result(id.clone(), content.clone(), is_error);
            }
            self.live.record.lock().await.messages.push(crate::conversation::Message::Tool {
                tool_call_id: id.clone(),
                content,
                is_error,
            });
            self.events().publish(
                self.branch(),
                SessionEvent::ToolCallResult { session_id: self.live.id, call_id: id.0, is_error },
            );

            for effect in effects {
                if self.apply_side_effect(effect).await? {
                    wait_requested = true;
                }
            }
        }
        Ok(wait_requested)
    }

    /// Summarize each just-finished child's outcome into the parent's
    /// prompt stream and conversation record, so the next
    /// `model.send(blocks)` after `WAITING_CHILDREN` carries it —
    /// `spec.md` §4.5, Scenario F ("P's next turn input contains C's
    /// result"). `finished` names which of `children`'s ids actually
    /// reached a terminal state this wait.
    async fn inject_child_results(&self, children: &[BranchName], finished: &[forge_core::SessionId]) {
        for branch in children {
            let Some(child) = self.registry.get(branch) else { continue };
            if !finished.contains(&child.id) {
                continue;
            }
            let (state, summary) = {
                let record = child.record.lock().await;
                let last_assistant = record.messages.iter().rev().find_map(|m| match m {
                    crate::conversation::Message::Assistant { content, .. } if !content.is_empty() => {
                        Some(content.clone())
                    }
                    _ => None,
                });
                (record.state, last_assistant.unwrap_or_else(|| "(no assistant output)".to_string()))
            };
            let note = format!("Child session '{branch}' finished ({}): {summary}", state.as_str());
            self.live.prompt.lock().await.push_user(note.clone());
            self.live.record.lock().await.messages.push(crate::conversation::Message::User { content: note });
        }
    }

    /// Apply one side effect a tool asked for. Returns `true` if the
    /// effect was a wait-for-children request.
    async fn apply_side_effect(&self, effect: SideEffect) -> Result<bool> {
        match effect {
            SideEffect::OpenFile { path } => {
                self.live.mark_touched(&path);
                if let Ok(bytes) = forge_vfs::Vfs::read(&*self.live.vfs, &path) {
                    if let Ok(text) = String::from_utf8(bytes) {
                        {
                            let mut record = self.live.record.lock().await;
                            if !record.active_files.contains(&path) {
                                record.active_files.push(path.clone());
                            }
                        }
                        self.live.prompt.lock().await.set_file(path, text);
                        self.events().publish(
                            self.branch(),
                            SessionEvent::ContextUpdated { session_id: self.live.id },
                        );
                    }
                }
                Ok(false)
            }
            SideEffect::EphemeralResult { content } => {
                self.live.prompt.lock().await.set_ephemeral(content);
                self.events().publish(self.branch(), SessionEvent::ContextUpdated { session_id: self.live.id });
                Ok(false)
            }
            SideEffect::CommitNow { message } => {
                self.commit(&message).await?;
                Ok(false)
            }
            SideEffect::SpawnChild { intent, id } => {
                let (_branch, _id) = self.registry.spawn_child(self.branch(), &intent, id).await?;
                Ok(false)
            }
            SideEffect::WaitChildren => Ok(true),
        }
    }

    async fn commit(&self, message: &str) -> Result<Option<String>> {
        // Re-serialise session state into the overlay before checking for
        // emptiness: a turn that only updated the conversation (no code
        // edits) still produces a commit, since the session record itself
        // changed (`spec.md` §8 item 1 — every successful turn's commit
        // tree carries the updated session.json).
        self.live.persist().await?;
        if self.live.vfs.overlay().is_empty() {
            return Ok(None);
        }
        let commit = self.live.vfs.commit("forge agent", "agent@forge.dev", message)?;
        self.registry
            .repo()
            .working_tree_sync(self.branch(), commit)
            .ok();
        self.events().publish(
            self.branch(),
            SessionEvent::TurnFinished { session_id: self.live.id, commit_ref: Some(commit.to_string()) },
        );
        Ok(Some(commit.to_string()))
    }

    /// Land any remaining uncommitted overlay changes and decide the
    /// turn's terminal state — `FINALISING` always resolves to exactly
    /// one of `IDLE`, `COMPLETED`, or `ERROR`.
    async fn finalise(&self) -> Result<TurnOutcome> {
        let commit_result = self.commit("turn checkpoint").await;
        match commit_result {
            Ok(_) => {
                self.transition(TurnState::Finalising, TurnState::Idle).await?;
                Ok(TurnOutcome::Idle)
            }
            Err(e @ Error::MergeConflict(_)) => {
                // Scenario D: the losing turn's overlay is discarded and
                // the branch ref is left exactly where the winner put it.
                self.live.vfs.discard_overlay();
                self.transition(TurnState::Finalising, TurnState::Error).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
