//! Observable state changes published by [`crate::Chat`]

use crate::{
    recorder::{TurnEvent, TurnPhase},
    session::{ArtifactPanel, TaskStatus},
};
use arbor_wire::TemplateOption;
use serde::{Deserialize, Serialize};

/// The user action an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Send,
    Edit,
    Regenerate,
    Switch,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Send => "send",
            OperationKind::Edit => "edit",
            OperationKind::Regenerate => "regenerate",
            OperationKind::Switch => "switch",
        }
    }
}

/// Events emitted as the session changes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A different conversation became active; all derived state was reset
    ConversationSwitched { conversation_id: String },

    /// The message list was replaced with the server's copy
    MessagesLoaded { conversation_id: String, count: usize },

    /// Placeholders were inserted or provisionally hidden before the request
    OptimisticInsert {
        operation: OperationKind,
        message_ids: Vec<String>,
    },

    /// A streamed turn began
    TurnStarted {
        operation: OperationKind,
        anchor_message_id: String,
    },

    /// A turn event was recorded
    TurnUpdated { phase: TurnPhase, event: TurnEvent },

    /// The server answered with a different model
    ModelSwitched {
        model: String,
        reason: Option<String>,
    },

    /// The artifact side panel changed
    ArtifactUpdated { panel: ArtifactPanel },

    /// The server confirmed an edit's new user-message branch
    BranchCreated {
        message_id: String,
        parent_id: String,
        index: usize,
    },

    /// Descendants were removed by a regenerate
    DescendantsPruned { message_ids: Vec<String> },

    /// A long-running task changed
    TaskProgress { task: TaskStatus },

    /// The server is waiting on a template choice
    TemplateSelectionRequired { templates: Vec<TemplateOption> },

    /// The active branch at a parent changed
    SelectionChanged { parent_id: String, index: usize },

    /// The turn finished and the confirmed messages were loaded
    TurnComplete {
        operation: OperationKind,
        message_id: Option<String>,
    },

    /// The operation failed; a notice awaits acknowledgment
    TurnFailed {
        operation: OperationKind,
        message: String,
    },

    /// The operation was cancelled by the user
    TurnCancelled { operation: OperationKind },
}

impl ChatEvent {
    /// Check if this event ends an operation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChatEvent::TurnComplete { .. }
                | ChatEvent::TurnFailed { .. }
                | ChatEvent::TurnCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(
            ChatEvent::TurnCancelled {
                operation: OperationKind::Send
            }
            .is_terminal()
        );
        assert!(
            !ChatEvent::SelectionChanged {
                parent_id: "root".into(),
                index: 0
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_serializes_with_type_tag() {
        let event = ChatEvent::TurnFailed {
            operation: OperationKind::Regenerate,
            message: "boom".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "turn_failed");
        assert_eq!(json["operation"], "regenerate");
    }
}
