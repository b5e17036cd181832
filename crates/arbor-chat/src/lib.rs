//! arbor-chat: Branching conversation state
//!
//! This crate keeps a flat message store with alternate edits and
//! regenerations, derives the single visible path through it, and applies
//! streamed turns to it through guarded send, edit and regenerate flows.

pub mod backend;
pub mod chat;
pub mod error;
pub mod events;
pub mod guard;
pub mod recorder;
pub mod selection;
pub mod session;
pub mod tree;

pub use backend::{Backend, HttpBackend};
pub use chat::{Chat, ChatConfig, OperationHandle};
pub use error::Error;
pub use events::{ChatEvent, OperationKind};
pub use guard::{StreamGuard, StreamToken};
pub use recorder::{
    EventStreamItem, MessageEventStream, ReasoningBlock, ReasoningStep, RenderedTurn,
    StepStatus, TurnEvent, TurnOutcome, TurnPhase,
};
pub use selection::BranchSelection;
pub use session::{ArtifactPanel, FailureNotice, HiddenBranch, Session, TaskStatus, TemplateRequest};
pub use tree::{BranchIndex, ConversationTree, ROOT};
