//! Chat orchestration: the send, edit and regenerate flows

use futures::{StreamExt, future::BoxFuture};
use parking_lot::Mutex;
use std::{collections::HashSet, sync::Arc};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use arbor_wire::{
    Conversation, EditRequest, FrameStream, Message, RegenerateRequest, Role, SendRequest,
    StreamEvent,
};

use crate::{
    backend::Backend,
    error::{Error, Result},
    events::{ChatEvent, OperationKind},
    guard::{StreamGuard, StreamToken},
    recorder::{MessageEventStream, RenderedTurn, TurnEvent, TurnOutcome, TurnPhase},
    selection::BranchSelection,
    session::{FailureNotice, HiddenBranch, Session, TemplateRequest},
    tree::{ROOT, active_assistant_parent_id, descendants_of, parent_key},
};

type OpenStream = BoxFuture<'static, arbor_wire::Result<FrameStream>>;

/// Chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model requested for new turns (server default when unset)
    pub model: Option<String>,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: None,
            event_capacity: 256,
        }
    }
}

/// Handle to a spawned operation. Awaiting it is never required.
pub struct OperationHandle {
    kind: OperationKind,
    token: StreamToken,
    task: JoinHandle<()>,
}

impl OperationHandle {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn token(&self) -> &StreamToken {
        &self.token
    }

    /// Wait until the operation's task has stopped
    pub async fn finished(self) {
        if let Err(e) = self.task.await {
            tracing::warn!("{} task ended abnormally: {}", self.kind.as_str(), e);
        }
    }
}

/// State captured before an optimistic change, restored on failure
struct Snapshot {
    messages: Vec<Message>,
    selection: BranchSelection,
}

impl Snapshot {
    fn take(session: &Session) -> Self {
        Self {
            messages: session.messages.clone(),
            selection: session.selection.clone(),
        }
    }
}

/// One in-flight streamed operation
struct Operation {
    kind: OperationKind,
    token: StreamToken,
    /// User message the reply answers (a placeholder until confirmed)
    anchor_id: String,
    /// Parent key the anchor hangs off
    parent_key: String,
    /// Input text to restore if the operation fails
    draft: Option<String>,
    /// Ids hidden by a regenerate
    pruned: HashSet<String>,
    snapshot: Snapshot,
}

impl Operation {
    fn conversation_id(&self) -> &str {
        self.token.conversation_id()
    }
}

/// What the stream loop should do after an event
enum Step {
    Continue,
    Stale,
    Complete {
        message_id: Option<String>,
        user_message_id: Option<String>,
    },
    Failed(Error),
}

struct ChatInner {
    backend: Arc<dyn Backend>,
    state: Mutex<Session>,
    guard: StreamGuard,
    event_tx: broadcast::Sender<ChatEvent>,
}

/// The conversation core.
///
/// Actions apply their optimistic change synchronously and return at once;
/// the network work runs on a spawned task and reports through
/// [`ChatEvent`]s. Actions must be called from within a Tokio runtime.
/// Cloning is cheap and every clone drives the same session.
#[derive(Clone)]
pub struct Chat {
    inner: Arc<ChatInner>,
}

impl Chat {
    /// Create a new chat over a backend
    pub fn new(backend: Arc<dyn Backend>, config: ChatConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(ChatInner {
                backend,
                state: Mutex::new(Session::new(config.model)),
                guard: StreamGuard::new(),
                event_tx,
            }),
        }
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.event_tx.subscribe()
    }

    /// A copy of the current session
    pub fn snapshot(&self) -> Session {
        self.inner.state.lock().clone()
    }

    /// Run a closure against the session without copying it
    pub fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.inner.state.lock())
    }

    pub fn conversation_id(&self) -> Option<String> {
        self.inner.state.lock().conversation_id.clone()
    }

    /// Messages on the visible path, root first
    pub fn visible_messages(&self) -> Vec<Message> {
        let state = self.inner.state.lock();
        state.visible_messages().into_iter().cloned().collect()
    }

    /// Layout of the current or most recent turn
    pub fn rendered_turn(&self) -> Option<RenderedTurn> {
        self.inner.state.lock().rendered_turn()
    }

    pub fn phase(&self) -> TurnPhase {
        self.inner.state.lock().phase()
    }

    /// Whether an operation holds the stream guard
    pub fn is_busy(&self) -> bool {
        self.inner.guard.is_active()
    }

    /// Set the model requested for new turns
    pub fn set_model(&self, model: Option<String>) {
        self.inner.state.lock().model = model;
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.inner.event_tx.send(event);
    }

    // ---- actions ----

    /// Make `conversation_id` active and load it.
    ///
    /// Supersedes any in-flight operation and resets all derived state before
    /// the load starts.
    pub fn switch_conversation(&self, conversation_id: impl Into<String>) -> OperationHandle {
        let conversation_id = conversation_id.into();
        let (token, cancel) = {
            let mut state = self.inner.state.lock();
            let (token, cancel) = self.inner.guard.begin(&conversation_id);
            state.reset(&conversation_id);
            state.in_flight = Some(OperationKind::Switch);
            self.emit(ChatEvent::ConversationSwitched {
                conversation_id: conversation_id.clone(),
            });
            (token, cancel)
        };

        let chat = self.clone();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Load of {} superseded", task_token.conversation_id());
                }
                loaded = chat.inner.backend.load_conversation(task_token.conversation_id()) => {
                    chat.finish_switch(&task_token, loaded);
                }
            }
        });

        OperationHandle {
            kind: OperationKind::Switch,
            token,
            task,
        }
    }

    /// Send a new user turn on the visible branch
    pub fn send_message(&self, text: &str) -> Result<OperationHandle> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let mut state = self.inner.state.lock();
        let conversation_id = state.ready_conversation()?;
        let snapshot = Snapshot::take(&state);

        let parent = active_assistant_parent_id(&state.messages, &state.tree());
        let branch_key = parent.clone().unwrap_or_else(|| ROOT.to_string());
        let placeholder = Message::optimistic(Role::User, text, parent.clone());
        let anchor_id = placeholder.message_id.clone();
        // a fresh child must show up through the newest-child default
        state.selection.remove(&branch_key);
        state.messages.push(placeholder);

        let request = SendRequest {
            content: text.to_string(),
            parent_message_id: parent,
            model: state.model.clone(),
        };

        let (token, cancel) = self.inner.guard.begin(&conversation_id);
        let op = Operation {
            kind: OperationKind::Send,
            token,
            anchor_id: anchor_id.clone(),
            parent_key: branch_key,
            draft: Some(text.to_string()),
            pruned: HashSet::new(),
            snapshot,
        };
        self.begin_turn(&mut state, &op, vec![anchor_id]);
        drop(state);

        let backend = Arc::clone(&self.inner.backend);
        let open: OpenStream =
            Box::pin(async move { backend.send(&conversation_id, request).await });
        Ok(self.spawn_turn(op, cancel, open))
    }

    /// Create an alternate version of a user message and answer it.
    ///
    /// The edited message and its existing siblings are left untouched.
    pub fn edit_message(&self, message_id: &str, new_content: &str) -> Result<OperationHandle> {
        let text = new_content.trim();
        if text.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let mut state = self.inner.state.lock();
        let conversation_id = state.ready_conversation()?;
        let target = state
            .message(message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;
        if target.role != Role::User {
            return Err(Error::InvalidTarget(format!(
                "{} is not a user message",
                message_id
            )));
        }
        if target.is_pending() {
            return Err(Error::InvalidTarget(format!(
                "{} is not confirmed yet",
                message_id
            )));
        }
        let parent = target.parent_message_id.clone();
        let branch_key = parent_key(target).to_string();

        let snapshot = Snapshot::take(&state);
        let index = state
            .messages
            .iter()
            .filter(|m| m.role == Role::User && parent_key(m) == branch_key)
            .count();
        let placeholder = Message::optimistic(Role::User, text, parent);
        let anchor_id = placeholder.message_id.clone();
        state.messages.push(placeholder);
        state.selection.set(branch_key.clone(), index);

        let request = EditRequest {
            content: text.to_string(),
            model: state.model.clone(),
        };

        let (token, cancel) = self.inner.guard.begin(&conversation_id);
        let op = Operation {
            kind: OperationKind::Edit,
            token,
            anchor_id: anchor_id.clone(),
            parent_key: branch_key,
            draft: Some(text.to_string()),
            pruned: HashSet::new(),
            snapshot,
        };
        self.begin_turn(&mut state, &op, vec![anchor_id]);
        drop(state);

        let backend = Arc::clone(&self.inner.backend);
        let target_id = message_id.to_string();
        let open: OpenStream =
            Box::pin(async move { backend.edit(&conversation_id, &target_id, request).await });
        Ok(self.spawn_turn(op, cancel, open))
    }

    /// Regenerate the assistant reply at `index` on the visible path.
    ///
    /// Everything below the reply is hidden until the new reply is confirmed
    /// and restored if the operation fails.
    pub fn regenerate_message(
        &self,
        index: usize,
        directive: Option<&str>,
    ) -> Result<OperationHandle> {
        let mut state = self.inner.state.lock();
        let conversation_id = state.ready_conversation()?;
        let target = state
            .visible_messages()
            .get(index)
            .map(|m| (*m).clone())
            .ok_or_else(|| Error::MessageNotFound(format!("visible message #{}", index)))?;
        if target.role != Role::Assistant {
            return Err(Error::InvalidTarget(format!(
                "{} is not an assistant reply",
                target.message_id
            )));
        }
        if target.is_pending() {
            return Err(Error::InvalidTarget(format!(
                "{} is not confirmed yet",
                target.message_id
            )));
        }
        let anchor_id = target.parent_message_id.clone().ok_or_else(|| {
            Error::InvalidTarget(format!("{} has no prompt", target.message_id))
        })?;
        let branch_key = state.message(&anchor_id).map_or(ROOT, parent_key).to_string();

        let snapshot = Snapshot::take(&state);
        let pruned = descendants_of(&state.messages, &target.message_id);
        state.messages.retain(|m| !pruned.contains(&m.message_id));
        state.selection.prune(&pruned);

        let request = RegenerateRequest {
            directive: directive
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
            model: state.model.clone(),
        };

        let mut hidden: Vec<String> = pruned.iter().cloned().collect();
        hidden.sort();

        let (token, cancel) = self.inner.guard.begin(&conversation_id);
        let op = Operation {
            kind: OperationKind::Regenerate,
            token,
            anchor_id,
            parent_key: branch_key,
            draft: None,
            pruned,
            snapshot,
        };
        self.begin_turn(&mut state, &op, Vec::new());
        state.hidden = Some(HiddenBranch {
            messages: op.snapshot.messages.clone(),
            selection: op.snapshot.selection.clone(),
        });
        if !hidden.is_empty() {
            self.emit(ChatEvent::DescendantsPruned {
                message_ids: hidden,
            });
        }
        drop(state);

        let backend = Arc::clone(&self.inner.backend);
        let target_id = target.message_id;
        let open: OpenStream = Box::pin(async move {
            backend
                .regenerate(&conversation_id, &target_id, request)
                .await
        });
        Ok(self.spawn_turn(op, cancel, open))
    }

    /// Stop listening to the in-flight operation.
    ///
    /// Optimistic inserts already applied are kept. Descendants hidden by a
    /// regenerate are put back, and a cancelled load leaves no conversation
    /// active. Returns whether anything was in flight.
    pub fn cancel_in_flight_operation(&self) -> bool {
        let mut state = self.inner.state.lock();
        let Some(token) = self.inner.guard.reset() else {
            return false;
        };
        tracing::debug!("Cancelled operation {}", token.operation_id());

        if let Some(recording) = state.recording.as_mut() {
            recording.finish(TurnOutcome::Cancelled);
        }
        if state.restore_hidden() {
            tracing::debug!("Restored descendants hidden by the cancelled regenerate");
        }
        if let Some(operation) = state.in_flight.take() {
            if operation == OperationKind::Switch {
                state.conversation_id = None;
            }
            self.emit(ChatEvent::TurnCancelled { operation });
        }
        true
    }

    /// Choose the variant shown under `parent_id`.
    ///
    /// The index is stored as given; it is clamped when the path is resolved.
    pub fn navigate_branch(&self, parent_id: impl Into<String>, index: usize) {
        let parent_id = parent_id.into();
        let mut state = self.inner.state.lock();
        state.selection.set(parent_id.clone(), index);
        self.emit(ChatEvent::SelectionChanged { parent_id, index });
    }

    /// Dismiss the failure notice, returning it
    pub fn acknowledge_failure(&self) -> Option<FailureNotice> {
        self.inner.state.lock().failure.take()
    }

    /// Take the text of a failed send or edit back for re-editing
    pub fn take_draft(&self) -> Option<String> {
        self.inner.state.lock().draft.take()
    }

    // ---- turn lifecycle ----

    fn begin_turn(&self, state: &mut Session, op: &Operation, optimistic_ids: Vec<String>) {
        state.recording = Some(MessageEventStream::new(
            op.conversation_id(),
            op.anchor_id.clone(),
        ));
        state.failure = None;
        state.draft = None;
        state.model_notice = None;
        state.artifact = None;
        state.tasks.clear();
        state.template_request = None;
        state.hidden = None;
        state.in_flight = Some(op.kind);

        self.emit(ChatEvent::OptimisticInsert {
            operation: op.kind,
            message_ids: optimistic_ids,
        });
        self.emit(ChatEvent::TurnStarted {
            operation: op.kind,
            anchor_message_id: op.anchor_id.clone(),
        });
    }

    fn spawn_turn(&self, op: Operation, cancel: CancellationToken, open: OpenStream) -> OperationHandle {
        let kind = op.kind;
        let token = op.token.clone();
        let chat = self.clone();
        let task = tokio::spawn(async move { chat.run_turn(op, cancel, open).await });
        OperationHandle { kind, token, task }
    }

    async fn run_turn(self, mut op: Operation, cancel: CancellationToken, open: OpenStream) {
        let kind = op.kind;
        let operation_id = op.token.operation_id();

        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("{} operation {} stopped listening", kind.as_str(), operation_id);
                return;
            }
            step = self.drive(&mut op, open) => step,
        };

        match step {
            Step::Complete {
                message_id,
                user_message_id,
            } => self.complete(&op, message_id, user_message_id).await,
            Step::Failed(error) => self.fail(&op, error),
            Step::Stale | Step::Continue => {
                tracing::debug!("{} operation {} superseded", kind.as_str(), operation_id);
            }
        }
    }

    /// Open the stream and apply events until a terminal step
    async fn drive(&self, op: &mut Operation, open: OpenStream) -> Step {
        let mut stream = match open.await {
            Ok(stream) => stream,
            Err(e) => return Step::Failed(e.into()),
        };

        while let Some(item) = stream.next().await {
            let step = match item {
                Ok(event) => self.handle_event(op, event),
                Err(e) => Step::Failed(e.into()),
            };
            if !matches!(step, Step::Continue) {
                return step;
            }
        }
        Step::Failed(Error::StreamEnded)
    }

    /// Apply one event. The guard check and the mutation share the lock.
    fn handle_event(&self, op: &mut Operation, event: StreamEvent) -> Step {
        let mut state = self.inner.state.lock();
        if !self.inner.guard.is_current(&op.token) {
            tracing::debug!(
                "Dropping {} from superseded {} operation",
                event.kind(),
                op.kind.as_str()
            );
            return Step::Stale;
        }

        if let Some(turn_event) = TurnEvent::from_stream(&event) {
            if let Some(recording) = state.recording.as_mut() {
                recording.record(turn_event.clone());
                let phase = recording.phase();
                self.emit(ChatEvent::TurnUpdated {
                    phase,
                    event: turn_event,
                });
            }
            return Step::Continue;
        }

        match event {
            StreamEvent::Complete {
                message_id,
                user_message_id,
            } => {
                return Step::Complete {
                    message_id,
                    user_message_id,
                };
            }
            StreamEvent::Error { message } => return Step::Failed(Error::Server(message)),
            StreamEvent::TaskStarted { .. }
            | StreamEvent::TaskProgress { .. }
            | StreamEvent::TaskComplete { .. } => {
                if let Some(task) = state.apply_task(&event) {
                    let task = task.clone();
                    self.emit(ChatEvent::TaskProgress { task });
                }
            }
            StreamEvent::TemplateSelectionRequired { templates } => {
                state.template_request = Some(TemplateRequest {
                    templates: templates.clone(),
                });
                self.emit(ChatEvent::TemplateSelectionRequired { templates });
            }
            event => self.handle_flow_event(&mut state, op, event),
        }
        Step::Continue
    }

    /// Events only some flows care about
    fn handle_flow_event(&self, state: &mut Session, op: &mut Operation, event: StreamEvent) {
        match (op.kind, event) {
            (
                OperationKind::Send,
                event @ (StreamEvent::ArtifactStart { .. }
                | StreamEvent::ArtifactContent { .. }
                | StreamEvent::ArtifactComplete { .. }
                | StreamEvent::ArtifactSaved { .. }
                | StreamEvent::ArtifactCreated { .. }),
            ) => {
                if let Some(panel) = state.apply_artifact(&event) {
                    let panel = panel.clone();
                    self.emit(ChatEvent::ArtifactUpdated { panel });
                }
            }
            (OperationKind::Send, StreamEvent::ModelSwitched { model, reason }) => {
                tracing::debug!("Server switched model to {}", model);
                state.model_notice = Some(model.clone());
                self.emit(ChatEvent::ModelSwitched { model, reason });
            }
            (OperationKind::Edit, StreamEvent::UserBranchCreated { message }) => {
                self.confirm_branch(state, op, message);
            }
            (OperationKind::Regenerate, StreamEvent::PrunedDescendants { message_ids }) => {
                self.reconcile_prune(state, op, message_ids);
            }
            (kind, event) => {
                tracing::trace!("No {} handler for {}", kind.as_str(), event.kind());
            }
        }
    }

    /// Swap the edit placeholder for the server's message
    fn confirm_branch(&self, state: &mut Session, op: &mut Operation, message: Message) {
        let confirmed_id = message.message_id.clone();
        let placeholder = std::mem::replace(&mut op.anchor_id, confirmed_id.clone());
        op.parent_key = parent_key(&message).to_string();

        if state.message(&confirmed_id).is_some() {
            state.messages.retain(|m| m.message_id != placeholder);
        } else if let Some(index) = state.messages.iter().position(|m| m.message_id == placeholder) {
            state.messages[index] = message;
        } else {
            state.messages.push(message);
        }

        if let Some(recording) = state.recording.as_mut() {
            recording.reanchor(&confirmed_id);
        }
        match state.select_message(&confirmed_id) {
            Ok((parent_id, index)) => self.emit(ChatEvent::BranchCreated {
                message_id: confirmed_id,
                parent_id,
                index,
            }),
            Err(e) => tracing::warn!("Confirmed branch could not be selected: {}", e),
        }
    }

    /// Adopt the server's prune set when it differs from the local one
    fn reconcile_prune(&self, state: &mut Session, op: &mut Operation, message_ids: Vec<String>) {
        let server: HashSet<String> = message_ids.into_iter().collect();
        if server != op.pruned {
            tracing::debug!(
                "Server pruned {} messages, {} hidden locally",
                server.len(),
                op.pruned.len()
            );
            state.messages = op
                .snapshot
                .messages
                .iter()
                .filter(|m| !server.contains(&m.message_id))
                .cloned()
                .collect();
            state.selection = op.snapshot.selection.clone();
            state.selection.prune(&server);
            op.pruned = server;
        }

        let mut message_ids: Vec<String> = op.pruned.iter().cloned().collect();
        message_ids.sort();
        self.emit(ChatEvent::DescendantsPruned { message_ids });
    }

    /// Reload the confirmed messages and select the new turn
    async fn complete(
        &self,
        op: &Operation,
        message_id: Option<String>,
        user_message_id: Option<String>,
    ) {
        let loaded = self
            .inner
            .backend
            .load_conversation(op.conversation_id())
            .await;

        let mut state = self.inner.state.lock();
        if !self.inner.guard.is_current(&op.token) {
            tracing::debug!("Discarding reload for superseded {} operation", op.kind.as_str());
            return;
        }
        let conversation = match loaded {
            Ok(conversation) => conversation,
            Err(e) => return self.fail_locked(&mut state, op, e.into()),
        };

        state.load(conversation);
        state.hidden = None;
        let reply_id = select_confirmed(&mut state, op, message_id, user_message_id);
        if let Some(recording) = state.recording.as_mut() {
            recording.finish(TurnOutcome::Complete);
        }
        state.in_flight = None;
        self.inner.guard.finish(&op.token);

        self.emit(ChatEvent::MessagesLoaded {
            conversation_id: op.conversation_id().to_string(),
            count: state.messages.len(),
        });
        self.emit(ChatEvent::TurnComplete {
            operation: op.kind,
            message_id: reply_id,
        });
    }

    fn fail(&self, op: &Operation, error: Error) {
        let mut state = self.inner.state.lock();
        if !self.inner.guard.is_current(&op.token) {
            tracing::debug!("Dropping failure of superseded {} operation: {}", op.kind.as_str(), error);
            return;
        }
        self.fail_locked(&mut state, op, error);
    }

    /// Roll back optimistic changes and raise the failure notice
    fn fail_locked(&self, state: &mut Session, op: &Operation, error: Error) {
        tracing::warn!("{} failed: {}", op.kind.as_str(), error);

        state.messages = op.snapshot.messages.clone();
        state.selection = op.snapshot.selection.clone();
        state.hidden = None;
        if op.draft.is_some() {
            state.draft = op.draft.clone();
        }
        let message = error.to_string();
        state.failure = Some(FailureNotice {
            operation: op.kind,
            message: message.clone(),
        });
        if let Some(recording) = state.recording.as_mut() {
            recording.finish(TurnOutcome::Error);
        }
        state.in_flight = None;
        self.inner.guard.finish(&op.token);

        self.emit(ChatEvent::TurnFailed {
            operation: op.kind,
            message,
        });
    }

    fn finish_switch(&self, token: &StreamToken, loaded: arbor_wire::Result<Conversation>) {
        let mut state = self.inner.state.lock();
        if !self.inner.guard.is_current(token) {
            tracing::debug!("Discarding load of {}", token.conversation_id());
            return;
        }
        state.in_flight = None;
        self.inner.guard.finish(token);

        match loaded {
            Ok(conversation) => {
                state.load(conversation);
                self.emit(ChatEvent::MessagesLoaded {
                    conversation_id: token.conversation_id().to_string(),
                    count: state.messages.len(),
                });
                self.emit(ChatEvent::TurnComplete {
                    operation: OperationKind::Switch,
                    message_id: None,
                });
            }
            Err(e) => {
                let message = Error::from(e).to_string();
                tracing::warn!("Loading {} failed: {}", token.conversation_id(), message);
                state.failure = Some(FailureNotice {
                    operation: OperationKind::Switch,
                    message: message.clone(),
                });
                self.emit(ChatEvent::TurnFailed {
                    operation: OperationKind::Switch,
                    message,
                });
            }
        }
    }
}

/// Select the confirmed prompt and reply after a reload.
///
/// Prefers the ids from the completion event, then the anchor, then the
/// newest child under the operation's branch point.
fn select_confirmed(
    state: &mut Session,
    op: &Operation,
    message_id: Option<String>,
    user_message_id: Option<String>,
) -> Option<String> {
    let user_id = user_message_id
        .filter(|id| state.message(id).is_some())
        .or_else(|| state.message(&op.anchor_id).map(|m| m.message_id.clone()))
        .or_else(|| newest_child(&state.messages, Role::User, &op.parent_key));
    let reply_id = message_id
        .filter(|id| state.message(id).is_some())
        .or_else(|| {
            user_id
                .as_deref()
                .and_then(|id| newest_child(&state.messages, Role::Assistant, id))
        });

    for id in user_id.iter().chain(reply_id.iter()) {
        if let Err(e) = state.select_message(id) {
            tracing::debug!("Could not select confirmed message: {}", e);
        }
    }
    reply_id
}

fn newest_child(messages: &[Message], role: Role, parent: &str) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == role && parent_key(m) == parent)
        .map(|m| m.message_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{
        collections::{HashMap, VecDeque},
        time::Duration,
    };
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    enum Script {
        Events {
            events: Vec<StreamEvent>,
            commit: Vec<Message>,
        },
        Channel(mpsc::UnboundedReceiver<StreamEvent>),
        Reject(u16),
    }

    /// Backend with an in-memory store and one canned stream per request
    #[derive(Default)]
    struct ScriptedBackend {
        conversations: Mutex<HashMap<String, Vec<Message>>>,
        scripts: Mutex<VecDeque<Script>>,
        sends: Mutex<Vec<SendRequest>>,
    }

    impl ScriptedBackend {
        fn with_conversation(id: &str, messages: Vec<Message>) -> Arc<Self> {
            let backend = Self::default();
            backend
                .conversations
                .lock()
                .insert(id.to_string(), messages);
            Arc::new(backend)
        }

        fn script(&self, script: Script) {
            self.scripts.lock().push_back(script);
        }

        fn channel(&self) -> mpsc::UnboundedSender<StreamEvent> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.script(Script::Channel(rx));
            tx
        }

        fn commit(&self, conversation_id: &str, messages: Vec<Message>) {
            self.conversations
                .lock()
                .entry(conversation_id.to_string())
                .or_default()
                .extend(messages);
        }

        fn open(&self, conversation_id: &str) -> arbor_wire::Result<FrameStream> {
            let script = self.scripts.lock().pop_front().unwrap_or(Script::Events {
                events: vec![],
                commit: vec![],
            });
            match script {
                Script::Events { events, commit } => {
                    self.commit(conversation_id, commit);
                    let stream: FrameStream = Box::pin(async_stream::stream! {
                        for event in events {
                            yield Ok::<_, arbor_wire::Error>(event);
                        }
                    });
                    Ok(stream)
                }
                Script::Channel(rx) => {
                    let stream: FrameStream =
                        Box::pin(UnboundedReceiverStream::new(rx).map(Ok::<_, arbor_wire::Error>));
                    Ok(stream)
                }
                Script::Reject(status) => Err(arbor_wire::Error::api(status, "rejected")),
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn load_conversation(
            &self,
            conversation_id: &str,
        ) -> arbor_wire::Result<Conversation> {
            let messages = self
                .conversations
                .lock()
                .get(conversation_id)
                .cloned()
                .ok_or_else(|| arbor_wire::Error::api(404, "no such conversation"))?;
            Ok(Conversation {
                id: conversation_id.to_string(),
                title: None,
                created_at: None,
                updated_at: None,
                messages,
            })
        }

        async fn send(
            &self,
            conversation_id: &str,
            request: SendRequest,
        ) -> arbor_wire::Result<FrameStream> {
            self.sends.lock().push(request);
            self.open(conversation_id)
        }

        async fn edit(
            &self,
            conversation_id: &str,
            _message_id: &str,
            _request: EditRequest,
        ) -> arbor_wire::Result<FrameStream> {
            self.open(conversation_id)
        }

        async fn regenerate(
            &self,
            conversation_id: &str,
            _message_id: &str,
            _request: RegenerateRequest,
        ) -> arbor_wire::Result<FrameStream> {
            self.open(conversation_id)
        }
    }

    fn user(id: &str, parent: Option<&str>) -> Message {
        Message::user(id, format!("prompt {}", id), parent.map(String::from))
    }

    fn reply(id: &str, parent: &str) -> Message {
        Message::assistant(id, format!("reply {}", id), Some(parent.to_string()))
    }

    fn chunk(text: &str) -> StreamEvent {
        StreamEvent::Chunk {
            content: text.into(),
        }
    }

    fn complete(reply: &str, user: &str) -> StreamEvent {
        StreamEvent::Complete {
            message_id: Some(reply.into()),
            user_message_id: Some(user.into()),
        }
    }

    async fn loaded(messages: Vec<Message>) -> (Chat, Arc<ScriptedBackend>) {
        let backend = ScriptedBackend::with_conversation("c1", messages);
        let chat = Chat::new(backend.clone(), ChatConfig::default());
        chat.switch_conversation("c1").finished().await;
        (chat, backend)
    }

    fn visible_ids(chat: &Chat) -> Vec<String> {
        chat.visible_messages()
            .into_iter()
            .map(|m| m.message_id)
            .collect()
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<ChatEvent>,
        pred: impl Fn(&ChatEvent) -> bool,
    ) -> ChatEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.unwrap();
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .unwrap()
    }

    fn is_update(event: &ChatEvent) -> bool {
        matches!(event, ChatEvent::TurnUpdated { .. })
    }

    #[tokio::test]
    async fn test_send_streams_and_completes() {
        let (chat, backend) = loaded(vec![user("u1", None), reply("a1", "u1")]).await;
        backend.script(Script::Events {
            events: vec![chunk("Hi "), chunk("there"), complete("a2", "u2")],
            commit: vec![user("u2", Some("a1")), reply("a2", "u2")],
        });

        let handle = chat.send_message("  hello  ").unwrap();
        assert_eq!(handle.kind(), OperationKind::Send);
        handle.finished().await;

        assert_eq!(visible_ids(&chat), vec!["u1", "a1", "u2", "a2"]);
        assert_eq!(chat.phase(), TurnPhase::Complete);
        assert_eq!(chat.rendered_turn().unwrap().content(), "Hi there");
        assert!(chat.snapshot().messages.iter().all(|m| !m.is_pending()));
        assert!(!chat.is_busy());

        let sends = backend.sends.lock();
        assert_eq!(sends[0].content, "hello");
        assert_eq!(sends[0].parent_message_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_send_inserts_placeholder_immediately() {
        let (chat, backend) = loaded(vec![user("u1", None), reply("a1", "u1")]).await;
        let _tx = backend.channel();

        let _handle = chat.send_message("hello").unwrap();

        let visible = chat.visible_messages();
        assert_eq!(visible.len(), 3);
        assert!(visible[2].is_pending());
        assert_eq!(visible[2].content, "hello");
        assert_eq!(chat.phase(), TurnPhase::InitialWait);
        assert!(chat.is_busy());
    }

    #[tokio::test]
    async fn test_send_attaches_to_visible_branch() {
        let (chat, backend) = loaded(vec![
            user("u1", None),
            reply("a1", "u1"),
            reply("a2", "u1"),
        ])
        .await;
        chat.navigate_branch("u1", 0);
        backend.script(Script::Events {
            events: vec![StreamEvent::Complete {
                message_id: None,
                user_message_id: None,
            }],
            commit: vec![user("u2", Some("a1")), reply("a3", "u2")],
        });

        chat.send_message("follow up").unwrap().finished().await;

        assert_eq!(
            backend.sends.lock()[0].parent_message_id.as_deref(),
            Some("a1")
        );
        assert_eq!(visible_ids(&chat), vec!["u1", "a1", "u2", "a3"]);
    }

    #[tokio::test]
    async fn test_send_rejects_empty_and_unloaded() {
        let chat = Chat::new(Arc::new(ScriptedBackend::default()), ChatConfig::default());
        assert!(matches!(
            chat.send_message("hi"),
            Err(Error::NoConversation)
        ));

        let (chat, _) = loaded(vec![]).await;
        assert!(matches!(chat.send_message("   "), Err(Error::EmptyMessage)));
        assert!(chat.snapshot().messages.is_empty());
        assert!(!chat.is_busy());
    }

    #[tokio::test]
    async fn test_send_failure_restores_messages_and_draft() {
        let original = vec![user("u1", None), reply("a1", "u1")];
        let (chat, backend) = loaded(original.clone()).await;
        backend.script(Script::Reject(500));
        let mut events = chat.subscribe();

        chat.send_message("hello").unwrap().finished().await;

        let session = chat.snapshot();
        assert_eq!(session.messages, original);
        assert_eq!(session.draft.as_deref(), Some("hello"));
        assert_eq!(chat.phase(), TurnPhase::Error);

        let failed = wait_for(&mut events, ChatEvent::is_terminal).await;
        assert!(matches!(
            failed,
            ChatEvent::TurnFailed {
                operation: OperationKind::Send,
                ..
            }
        ));

        let notice = chat.acknowledge_failure().unwrap();
        assert!(notice.message.contains("500"));
        assert!(chat.acknowledge_failure().is_none());
        assert_eq!(chat.take_draft().as_deref(), Some("hello"));
        assert!(!chat.is_busy());
    }

    #[tokio::test]
    async fn test_server_error_event_fails_turn() {
        let original = vec![user("u1", None), reply("a1", "u1")];
        let (chat, backend) = loaded(original.clone()).await;
        backend.script(Script::Events {
            events: vec![
                chunk("partial"),
                StreamEvent::Error {
                    message: "model overloaded".into(),
                },
                chunk("never applied"),
            ],
            commit: vec![],
        });

        chat.send_message("hello").unwrap().finished().await;

        let session = chat.snapshot();
        assert_eq!(session.messages, original);
        assert_eq!(
            session.failure.unwrap().message,
            "Server error: model overloaded"
        );
        assert_eq!(chat.rendered_turn().unwrap().content(), "partial");
    }

    #[tokio::test]
    async fn test_stream_without_completion_fails() {
        let (chat, backend) = loaded(vec![]).await;
        backend.script(Script::Events {
            events: vec![chunk("x")],
            commit: vec![],
        });

        chat.send_message("hello").unwrap().finished().await;

        let notice = chat.acknowledge_failure().unwrap();
        assert_eq!(notice.message, Error::StreamEnded.to_string());
        assert!(chat.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_send_flow_applies_artifacts_and_model_switch() {
        let (chat, backend) = loaded(vec![]).await;
        backend.script(Script::Events {
            events: vec![
                StreamEvent::ModelSwitched {
                    model: "small".into(),
                    reason: Some("load".into()),
                },
                StreamEvent::ArtifactStart {
                    artifact_id: None,
                    title: Some("Plan".into()),
                    kind: None,
                },
                StreamEvent::ArtifactContent {
                    content: "body".into(),
                },
                StreamEvent::TaskStarted {
                    task_id: "t1".into(),
                    label: None,
                },
                complete("a1", "u1"),
            ],
            commit: vec![user("u1", None), reply("a1", "u1")],
        });

        chat.send_message("write a plan").unwrap().finished().await;

        let session = chat.snapshot();
        assert_eq!(session.model_notice.as_deref(), Some("small"));
        assert_eq!(session.artifact.unwrap().content, "body");
        assert!(session.tasks.contains_key("t1"));
    }

    #[tokio::test]
    async fn test_edit_adds_sibling_and_leaves_others_untouched() {
        let (chat, backend) = loaded(vec![
            user("u1", None),
            reply("a1", "u1"),
            user("u2", None),
            reply("a2", "u2"),
        ])
        .await;
        let before = chat.snapshot().messages;
        let tx = backend.channel();
        let mut events = chat.subscribe();

        let handle = chat.edit_message("u2", "edited prompt").unwrap();

        let visible = chat.visible_messages();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_pending());
        assert_eq!(visible[0].content, "edited prompt");

        tx.send(StreamEvent::UserBranchCreated {
            message: user("u3", None),
        })
        .unwrap();
        let created = wait_for(&mut events, |e| {
            matches!(e, ChatEvent::BranchCreated { .. })
        })
        .await;
        assert!(matches!(
            created,
            ChatEvent::BranchCreated { ref parent_id, index: 2, .. } if parent_id == ROOT
        ));
        assert_eq!(visible_ids(&chat), vec!["u3"]);

        backend.commit("c1", vec![user("u3", None), reply("a3", "u3")]);
        tx.send(chunk("new answer")).unwrap();
        tx.send(complete("a3", "u3")).unwrap();
        handle.finished().await;

        let session = chat.snapshot();
        let tree = session.tree();
        assert_eq!(tree.user_branches[ROOT], vec!["u1", "u2", "u3"]);
        assert_eq!(visible_ids(&chat), vec!["u3", "a3"]);
        for original in &before {
            assert!(session.messages.contains(original));
        }
    }

    #[tokio::test]
    async fn test_edit_rejects_invalid_targets() {
        let (chat, _) = loaded(vec![user("u1", None), reply("a1", "u1")]).await;
        assert!(matches!(
            chat.edit_message("a1", "x"),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            chat.edit_message("zzz", "x"),
            Err(Error::MessageNotFound(_))
        ));
        assert!(matches!(
            chat.edit_message("u1", " "),
            Err(Error::EmptyMessage)
        ));
    }

    #[tokio::test]
    async fn test_regenerate_hides_descendants_and_restores_on_error() {
        let original = vec![
            user("u1", None),
            reply("a1", "u1"),
            user("u2", Some("a1")),
            reply("a2", "u2"),
            user("u3", Some("a2")),
            reply("a3", "u3"),
        ];
        let (chat, backend) = loaded(original.clone()).await;
        chat.navigate_branch("u2", 0);
        let tx = backend.channel();

        let handle = chat.regenerate_message(1, Some("shorter")).unwrap();

        assert_eq!(visible_ids(&chat), vec!["u1", "a1"]);
        assert!(chat.snapshot().selection.get("u2").is_none());

        tx.send(chunk("retry")).unwrap();
        tx.send(StreamEvent::Error {
            message: "failed".into(),
        })
        .unwrap();
        handle.finished().await;

        let session = chat.snapshot();
        assert_eq!(session.messages, original);
        assert_eq!(session.selection.get("u2"), Some(0));
        assert!(session.draft.is_none());
        assert_eq!(visible_ids(&chat).len(), 6);
    }

    #[tokio::test]
    async fn test_edit_failure_after_branch_created_rolls_back() {
        let (chat, backend) = loaded(vec![user("u1", None), reply("a1", "u1")]).await;
        chat.navigate_branch(ROOT, 0);
        let before = chat.snapshot();
        let tx = backend.channel();
        let mut events = chat.subscribe();

        let handle = chat.edit_message("u1", "edited").unwrap();
        tx.send(StreamEvent::UserBranchCreated {
            message: user("u2", None),
        })
        .unwrap();
        wait_for(&mut events, |e| {
            matches!(e, ChatEvent::BranchCreated { .. })
        })
        .await;
        assert_eq!(chat.snapshot().selection.get(ROOT), Some(1));

        tx.send(StreamEvent::Error {
            message: "edit failed".into(),
        })
        .unwrap();
        handle.finished().await;

        let session = chat.snapshot();
        assert_eq!(session.messages, before.messages);
        assert_eq!(session.selection, before.selection);
        assert_eq!(visible_ids(&chat), vec!["u1", "a1"]);
        assert_eq!(
            session.failure.unwrap().operation,
            OperationKind::Edit
        );
        assert_eq!(chat.take_draft().as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_cancel_regenerate_restores_hidden_descendants() {
        let original = vec![
            user("u1", None),
            reply("a1", "u1"),
            user("u2", Some("a1")),
            reply("a2", "u2"),
            reply("a3", "u2"),
        ];
        let (chat, backend) = loaded(original.clone()).await;
        chat.navigate_branch("u2", 0);
        let _tx = backend.channel();

        let handle = chat.regenerate_message(1, None).unwrap();
        assert_eq!(visible_ids(&chat), vec!["u1", "a1"]);
        assert!(chat.snapshot().hidden.is_some());

        assert!(chat.cancel_in_flight_operation());
        handle.finished().await;

        let session = chat.snapshot();
        assert_eq!(session.messages, original);
        assert_eq!(session.selection.get("u2"), Some(0));
        assert!(session.hidden.is_none());
        assert_eq!(visible_ids(&chat), vec!["u1", "a1", "u2", "a2"]);
        assert_eq!(chat.phase(), TurnPhase::Cancelled);
    }

    #[tokio::test]
    async fn test_regenerate_clears_hidden_on_complete() {
        let (chat, backend) = loaded(vec![
            user("u1", None),
            reply("a1", "u1"),
            user("u2", Some("a1")),
            reply("a2", "u2"),
        ])
        .await;
        backend.script(Script::Events {
            events: vec![complete("a3", "u1")],
            commit: vec![reply("a3", "u1")],
        });

        chat.regenerate_message(1, None).unwrap().finished().await;

        assert!(chat.snapshot().hidden.is_none());
        assert!(!chat.cancel_in_flight_operation());
        assert_eq!(visible_ids(&chat), vec!["u1", "a3"]);
    }

    #[tokio::test]
    async fn test_regenerate_selects_new_reply() {
        let (chat, backend) = loaded(vec![user("u1", None), reply("a1", "u1")]).await;
        chat.navigate_branch("u1", 0);
        backend.script(Script::Events {
            events: vec![chunk("again"), complete("a2", "u1")],
            commit: vec![reply("a2", "u1")],
        });

        chat.regenerate_message(1, None).unwrap().finished().await;

        assert_eq!(visible_ids(&chat), vec!["u1", "a2"]);
        assert_eq!(chat.snapshot().tree().branch_count("u1"), 2);
    }

    #[tokio::test]
    async fn test_regenerate_adopts_server_prune_set() {
        let (chat, backend) = loaded(vec![
            user("u1", None),
            reply("a1", "u1"),
            user("u2", Some("a1")),
            reply("a2", "u2"),
        ])
        .await;
        let tx = backend.channel();
        let mut events = chat.subscribe();

        let _handle = chat.regenerate_message(1, None).unwrap();
        assert_eq!(chat.snapshot().messages.len(), 2);

        tx.send(StreamEvent::PrunedDescendants {
            message_ids: vec!["u2".into()],
        })
        .unwrap();
        let pruned = wait_for(&mut events, |e| {
            matches!(e, ChatEvent::DescendantsPruned { message_ids } if message_ids.len() == 1)
        })
        .await;
        assert!(matches!(pruned, ChatEvent::DescendantsPruned { .. }));

        let session = chat.snapshot();
        assert!(session.message("a2").is_some());
        assert!(session.message("u2").is_none());
    }

    #[tokio::test]
    async fn test_regenerate_rejects_invalid_index() {
        let (chat, _) = loaded(vec![user("u1", None), reply("a1", "u1")]).await;
        assert!(matches!(
            chat.regenerate_message(0, None),
            Err(Error::InvalidTarget(_))
        ));
        assert!(matches!(
            chat.regenerate_message(9, None),
            Err(Error::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_superseded_stream_cannot_touch_new_turn() {
        let (chat, backend) = loaded(vec![]).await;
        let tx_a = backend.channel();
        let tx_b = backend.channel();
        let mut events = chat.subscribe();

        let first = chat.send_message("A").unwrap();
        tx_a.send(chunk("a1")).unwrap();
        wait_for(&mut events, is_update).await;

        let second = chat.send_message("B").unwrap();
        first.finished().await;
        let _ = tx_a.send(chunk("stale"));

        tx_b.send(chunk("b1")).unwrap();
        wait_for(&mut events, is_update).await;

        assert_eq!(chat.rendered_turn().unwrap().content(), "b1");
        assert!(chat.is_busy());
        assert_eq!(second.kind(), OperationKind::Send);
    }

    #[tokio::test]
    async fn test_stale_event_is_dropped() {
        let (chat, _) = loaded(vec![]).await;
        let (stale, _) = chat.inner.guard.begin("c1");
        let _current = chat.inner.guard.begin("c1");
        chat.inner.state.lock().recording = Some(MessageEventStream::new("c1", "u1"));

        let mut op = Operation {
            kind: OperationKind::Send,
            token: stale,
            anchor_id: "u1".into(),
            parent_key: ROOT.into(),
            draft: None,
            pruned: HashSet::new(),
            snapshot: Snapshot::take(&chat.inner.state.lock()),
        };

        assert!(matches!(
            chat.handle_event(&mut op, chunk("late")),
            Step::Stale
        ));
        assert!(chat.rendered_turn().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_listening_and_keeps_optimistic_state() {
        let (chat, backend) = loaded(vec![]).await;
        let tx = backend.channel();
        let mut events = chat.subscribe();

        let handle = chat.send_message("hi").unwrap();
        tx.send(chunk("par")).unwrap();
        wait_for(&mut events, is_update).await;

        assert!(chat.cancel_in_flight_operation());
        handle.finished().await;
        let _ = tx.send(chunk("more"));

        assert_eq!(chat.phase(), TurnPhase::Cancelled);
        assert_eq!(chat.rendered_turn().unwrap().content(), "par");
        let session = chat.snapshot();
        assert!(session.messages.iter().any(|m| m.is_pending()));
        assert!(session.failure.is_none());
        assert!(!chat.cancel_in_flight_operation());

        wait_for(&mut events, |e| {
            matches!(
                e,
                ChatEvent::TurnCancelled {
                    operation: OperationKind::Send
                }
            )
        })
        .await;
    }

    #[tokio::test]
    async fn test_switch_supersedes_pending_send() {
        let backend = ScriptedBackend::with_conversation("c1", vec![user("u1", None)]);
        backend.commit("c2", vec![user("v1", None), reply("w1", "v1")]);
        let chat = Chat::new(backend.clone(), ChatConfig::default());
        chat.switch_conversation("c1").finished().await;
        let tx = backend.channel();

        let pending = chat.send_message("hello").unwrap();
        chat.switch_conversation("c2").finished().await;
        pending.finished().await;
        let _ = tx.send(chunk("late"));

        assert_eq!(chat.conversation_id().as_deref(), Some("c2"));
        assert_eq!(visible_ids(&chat), vec!["v1", "w1"]);
        assert_eq!(chat.phase(), TurnPhase::Idle);
        assert!(!chat.is_busy());
    }

    #[tokio::test]
    async fn test_actions_wait_for_pending_load() {
        let backend =
            ScriptedBackend::with_conversation("c1", vec![user("u1", None), reply("a1", "u1")]);
        let chat = Chat::new(backend.clone(), ChatConfig::default());

        let load = chat.switch_conversation("c1");
        assert!(matches!(chat.send_message("follow up"), Err(Error::Loading)));
        assert!(matches!(chat.edit_message("u1", "x"), Err(Error::Loading)));
        assert!(matches!(
            chat.regenerate_message(1, None),
            Err(Error::Loading)
        ));
        assert!(backend.sends.lock().is_empty());

        load.finished().await;
        assert_eq!(visible_ids(&chat), vec!["u1", "a1"]);

        backend.script(Script::Reject(503));
        chat.send_message("follow up").unwrap().finished().await;

        assert_eq!(
            backend.sends.lock()[0].parent_message_id.as_deref(),
            Some("a1")
        );
        assert_eq!(visible_ids(&chat), vec!["u1", "a1"]);
    }

    #[tokio::test]
    async fn test_cancelled_load_leaves_no_conversation() {
        let backend = ScriptedBackend::with_conversation("c1", vec![user("u1", None)]);
        let chat = Chat::new(backend, ChatConfig::default());

        let load = chat.switch_conversation("c1");
        assert!(chat.cancel_in_flight_operation());
        load.finished().await;

        assert!(chat.conversation_id().is_none());
        assert!(matches!(chat.send_message("hi"), Err(Error::NoConversation)));
    }

    #[tokio::test]
    async fn test_switch_to_missing_conversation_fails() {
        let (chat, _) = loaded(vec![user("u1", None)]).await;

        chat.switch_conversation("missing").finished().await;

        let session = chat.snapshot();
        assert!(session.messages.is_empty());
        assert_eq!(
            session.failure.unwrap().operation,
            OperationKind::Switch
        );
    }

    #[tokio::test]
    async fn test_navigate_branch_stores_unclamped_index() {
        let (chat, _) = loaded(vec![
            user("u1", None),
            reply("a1", "u1"),
            reply("a2", "u1"),
            reply("a3", "u1"),
        ])
        .await;
        let mut events = chat.subscribe();
        assert_eq!(visible_ids(&chat), vec!["u1", "a3"]);

        chat.navigate_branch("u1", 0);
        assert_eq!(visible_ids(&chat), vec!["u1", "a1"]);

        chat.navigate_branch("u1", 9);
        assert_eq!(visible_ids(&chat), vec!["u1", "a3"]);
        assert_eq!(chat.snapshot().selection.get("u1"), Some(9));

        let changed = wait_for(&mut events, |e| {
            matches!(e, ChatEvent::SelectionChanged { .. })
        })
        .await;
        assert!(matches!(
            changed,
            ChatEvent::SelectionChanged { index: 0, .. }
        ));
    }
}
