//! Error types for arbor-chat

use thiserror::Error;

/// Result type alias using arbor-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during chat operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the transport layer
    #[error(transparent)]
    Wire(#[from] arbor_wire::Error),

    /// The server reported an error event mid-turn
    #[error("Server error: {0}")]
    Server(String),

    /// The transport closed without a completion event
    #[error("Stream ended before the turn completed")]
    StreamEnded,

    /// No conversation is loaded
    #[error("No conversation is active")]
    NoConversation,

    /// The active conversation is still loading
    #[error("Conversation is still loading")]
    Loading,

    /// The message text was empty after trimming
    #[error("Message is empty")]
    EmptyMessage,

    /// The referenced message is not in the store
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The referenced message cannot be the target of this action
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

impl Error {
    /// Check if this error came from the server or network and may clear up
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Wire(e) => e.is_retryable(),
            Error::StreamEnded => true,
            _ => false,
        }
    }

    /// Check if this error was raised before any request was made
    pub fn is_rejected_locally(&self) -> bool {
        matches!(
            self,
            Error::NoConversation
                | Error::Loading
                | Error::EmptyMessage
                | Error::MessageNotFound(_)
                | Error::InvalidTarget(_)
        )
    }
}
