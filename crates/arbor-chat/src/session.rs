//! Session state: the message store, branch selection and turn display state

use crate::{
    error::{Error, Result},
    events::OperationKind,
    recorder::{MessageEventStream, RenderedTurn, TurnPhase},
    selection::BranchSelection,
    tree::{BranchIndex, ConversationTree, parent_key},
};
use arbor_wire::{Conversation, Message, StreamEvent, TemplateOption};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Blocking failure notice, shown until acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub operation: OperationKind,
    pub message: String,
}

/// Artifact side panel fed by the send flow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPanel {
    pub artifact_id: Option<String>,
    pub title: Option<String>,
    pub kind: Option<String>,
    pub content: String,
    pub complete: bool,
    pub saved: bool,
    /// Message the artifact was linked to by the server
    pub message_id: Option<String>,
}

/// Progress of one long-running server task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub label: Option<String>,
    pub progress: Option<f32>,
    pub message: Option<String>,
    pub complete: bool,
}

impl TaskStatus {
    fn new(task_id: String) -> Self {
        Self {
            task_id,
            label: None,
            progress: None,
            message: None,
            complete: false,
        }
    }
}

/// The server is waiting on a template choice
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRequest {
    pub templates: Vec<TemplateOption>,
}

/// Store state from before a regenerate hid descendants of its target.
/// Put back if the regenerate is cancelled.
#[derive(Debug, Clone, Default)]
pub struct HiddenBranch {
    pub messages: Vec<Message>,
    pub selection: BranchSelection,
}

/// Everything the chat core owns for the active conversation.
///
/// `messages` and `selection` are the two long-lived shared resources; the
/// tree and the visible path are always derived from them on demand.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub conversation_id: Option<String>,
    pub title: Option<String>,
    pub messages: Vec<Message>,
    pub selection: BranchSelection,
    /// Events of the current or most recent turn
    pub recording: Option<MessageEventStream>,
    /// Model requested for new turns
    pub model: Option<String>,
    /// Set when the server switched model mid-turn
    pub model_notice: Option<String>,
    pub failure: Option<FailureNotice>,
    /// Text of a failed send or edit, restored for the input box
    pub draft: Option<String>,
    pub artifact: Option<ArtifactPanel>,
    pub tasks: BTreeMap<String, TaskStatus>,
    pub template_request: Option<TemplateRequest>,
    /// Kind of the operation currently holding the stream guard
    pub in_flight: Option<OperationKind>,
    /// Set while a regenerate has descendants provisionally hidden
    pub hidden: Option<HiddenBranch>,
}

impl Session {
    pub fn new(model: Option<String>) -> Self {
        Self {
            model,
            ..Self::default()
        }
    }

    /// Drop everything tied to the previous conversation
    pub fn reset(&mut self, conversation_id: impl Into<String>) {
        let model = self.model.take();
        *self = Self::new(model);
        self.conversation_id = Some(conversation_id.into());
    }

    /// Id of the conversation new turns go to.
    ///
    /// Fails while the conversation is still loading, since its messages are
    /// not there yet to attach to.
    pub fn ready_conversation(&self) -> Result<String> {
        let conversation_id = self.conversation_id.clone().ok_or(Error::NoConversation)?;
        if self.in_flight == Some(OperationKind::Switch) {
            return Err(Error::Loading);
        }
        Ok(conversation_id)
    }

    /// Put back descendants hidden by an unconfirmed regenerate
    pub fn restore_hidden(&mut self) -> bool {
        let Some(hidden) = self.hidden.take() else {
            return false;
        };
        self.messages = hidden.messages;
        self.selection = hidden.selection;
        true
    }

    /// Replace the message list with the server's copy
    pub fn load(&mut self, conversation: Conversation) {
        self.conversation_id = Some(conversation.id);
        if conversation.title.is_some() {
            self.title = conversation.title;
        }
        self.messages = conversation.messages;
    }

    /// Derive the tree under the current selection
    pub fn tree(&self) -> ConversationTree {
        ConversationTree::build(&self.messages, &self.selection)
    }

    /// Messages on the visible path, root first
    pub fn visible_messages(&self) -> Vec<&Message> {
        self.tree().visible_messages(&self.messages)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.message_id == message_id)
    }

    /// Phase of the current turn, [`TurnPhase::Idle`] if none was recorded
    pub fn phase(&self) -> TurnPhase {
        self.recording
            .as_ref()
            .map_or(TurnPhase::Idle, MessageEventStream::phase)
    }

    /// Whether a turn is recording and not yet finished
    pub fn is_streaming(&self) -> bool {
        self.recording.as_ref().is_some_and(|r| !r.is_finished())
    }

    pub fn rendered_turn(&self) -> Option<RenderedTurn> {
        self.recording.as_ref().map(MessageEventStream::render)
    }

    /// Make a message the active variant among its siblings.
    ///
    /// Returns the parent key and the index written.
    pub fn select_message(&mut self, message_id: &str) -> Result<(String, usize)> {
        let message = self
            .message(message_id)
            .ok_or_else(|| Error::MessageNotFound(message_id.to_string()))?;
        let index = BranchIndex::build(&self.messages);
        let position = index
            .siblings_of(message)
            .and_then(|siblings| siblings.iter().position(|id| id == message_id))
            .ok_or_else(|| Error::InvalidTarget(format!("{} is not branchable", message_id)))?;

        let parent = parent_key(message).to_string();
        self.selection.set(parent.clone(), position);
        Ok((parent, position))
    }

    /// Apply an artifact event to the side panel. Returns the updated panel.
    pub fn apply_artifact(&mut self, event: &StreamEvent) -> Option<&ArtifactPanel> {
        match event {
            StreamEvent::ArtifactStart {
                artifact_id,
                title,
                kind,
            } => {
                self.artifact = Some(ArtifactPanel {
                    artifact_id: artifact_id.clone(),
                    title: title.clone(),
                    kind: kind.clone(),
                    ..ArtifactPanel::default()
                });
            }
            StreamEvent::ArtifactContent { content } => {
                self.artifact
                    .get_or_insert_with(ArtifactPanel::default)
                    .content
                    .push_str(content);
            }
            StreamEvent::ArtifactComplete { content } => {
                let panel = self.artifact.get_or_insert_with(ArtifactPanel::default);
                if let Some(content) = content {
                    panel.content = content.clone();
                }
                panel.complete = true;
            }
            StreamEvent::ArtifactSaved { artifact_id } => {
                let panel = self.artifact.get_or_insert_with(ArtifactPanel::default);
                panel.artifact_id = Some(artifact_id.clone());
                panel.saved = true;
            }
            StreamEvent::ArtifactCreated {
                artifact_id,
                message_id,
            } => {
                let panel = self.artifact.get_or_insert_with(ArtifactPanel::default);
                panel.artifact_id = Some(artifact_id.clone());
                panel.message_id = message_id.clone();
            }
            _ => return None,
        }
        self.artifact.as_ref()
    }

    /// Apply a task event. Returns the updated task.
    pub fn apply_task(&mut self, event: &StreamEvent) -> Option<&TaskStatus> {
        let task_id = match event {
            StreamEvent::TaskStarted { task_id, .. }
            | StreamEvent::TaskProgress { task_id, .. }
            | StreamEvent::TaskComplete { task_id } => task_id,
            _ => return None,
        };
        let task = self
            .tasks
            .entry(task_id.clone())
            .or_insert_with(|| TaskStatus::new(task_id.clone()));

        match event {
            StreamEvent::TaskStarted { label, .. } => task.label = label.clone(),
            StreamEvent::TaskProgress {
                progress, message, ..
            } => {
                if progress.is_some() {
                    task.progress = *progress;
                }
                if message.is_some() {
                    task.message = message.clone();
                }
            }
            StreamEvent::TaskComplete { .. } => {
                task.complete = true;
                task.progress = Some(1.0);
            }
            _ => {}
        }
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_wire::Role;

    fn msg(id: &str, role: Role, parent: Option<&str>) -> Message {
        Message::new(id, role, id, parent.map(String::from))
    }

    fn branched() -> Session {
        let mut session = Session::new(None);
        session.messages = vec![
            msg("u1", Role::User, None),
            msg("a1", Role::Assistant, Some("u1")),
            msg("a2", Role::Assistant, Some("u1")),
            msg("a3", Role::Assistant, Some("u1")),
        ];
        session
    }

    #[test]
    fn test_newest_variant_visible_without_selection() {
        let session = branched();
        let ids: Vec<&str> = session
            .visible_messages()
            .iter()
            .map(|m| m.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["u1", "a3"]);
    }

    #[test]
    fn test_select_message_writes_sibling_index() {
        let mut session = branched();
        let (parent, index) = session.select_message("a1").unwrap();
        assert_eq!((parent.as_str(), index), ("u1", 0));
        assert!(session.tree().is_visible("a1"));
        assert!(!session.tree().is_visible("a3"));
    }

    #[test]
    fn test_select_unknown_message_fails() {
        let mut session = branched();
        assert!(matches!(
            session.select_message("zzz"),
            Err(Error::MessageNotFound(_))
        ));
    }

    #[test]
    fn test_ready_conversation_waits_for_load() {
        let mut session = Session::new(None);
        assert!(matches!(session.ready_conversation(), Err(Error::NoConversation)));

        session.reset("c1");
        session.in_flight = Some(OperationKind::Switch);
        assert!(matches!(session.ready_conversation(), Err(Error::Loading)));

        session.in_flight = Some(OperationKind::Send);
        assert_eq!(session.ready_conversation().unwrap(), "c1");
    }

    #[test]
    fn test_restore_hidden_puts_back_store() {
        let mut session = branched();
        session.selection.set("u1", 0);
        session.hidden = Some(HiddenBranch {
            messages: session.messages.clone(),
            selection: session.selection.clone(),
        });
        session.messages.truncate(1);
        session.selection.remove("u1");

        assert!(session.restore_hidden());
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.selection.get("u1"), Some(0));
        assert!(session.hidden.is_none());
        assert!(!session.restore_hidden());
    }

    #[test]
    fn test_reset_keeps_model_only() {
        let mut session = branched();
        session.model = Some("m".into());
        session.draft = Some("text".into());
        session.reset("c2");
        assert_eq!(session.conversation_id.as_deref(), Some("c2"));
        assert_eq!(session.model.as_deref(), Some("m"));
        assert!(session.messages.is_empty());
        assert!(session.draft.is_none());
        assert_eq!(session.phase(), TurnPhase::Idle);
    }

    #[test]
    fn test_artifact_events_build_panel() {
        let mut session = Session::new(None);
        session.apply_artifact(&StreamEvent::ArtifactStart {
            artifact_id: None,
            title: Some("Plan".into()),
            kind: Some("markdown".into()),
        });
        session.apply_artifact(&StreamEvent::ArtifactContent {
            content: "# Plan".into(),
        });
        let panel = session
            .apply_artifact(&StreamEvent::ArtifactSaved {
                artifact_id: "art-1".into(),
            })
            .unwrap();
        assert_eq!(panel.content, "# Plan");
        assert_eq!(panel.artifact_id.as_deref(), Some("art-1"));
        assert!(panel.saved);

        assert!(
            session
                .apply_artifact(&StreamEvent::Chunk {
                    content: "x".into()
                })
                .is_none()
        );
    }

    #[test]
    fn test_task_events_track_progress() {
        let mut session = Session::new(None);
        session.apply_task(&StreamEvent::TaskStarted {
            task_id: "t1".into(),
            label: Some("Indexing".into()),
        });
        session.apply_task(&StreamEvent::TaskProgress {
            task_id: "t1".into(),
            progress: Some(0.5),
            message: None,
        });
        let task = session.tasks.get("t1").unwrap();
        assert_eq!(task.label.as_deref(), Some("Indexing"));
        assert_eq!(task.progress, Some(0.5));

        let task = session
            .apply_task(&StreamEvent::TaskComplete {
                task_id: "t1".into(),
            })
            .unwrap();
        assert!(task.complete);
    }
}
