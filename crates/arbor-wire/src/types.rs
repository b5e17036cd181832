//! Core record types exchanged with the system of record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Get the role as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Whether messages with this role can have alternate variants
    pub fn is_branchable(&self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

/// A cited source attached to an assistant message or a tool call result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// A single message record.
///
/// Messages are stored flat, in insertion order. Tree structure is carried
/// only by `parent_message_id`; a missing parent means the message hangs off
/// the virtual root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Set on optimistic placeholders that the server has not confirmed yet
    #[serde(skip)]
    pub pending: bool,
}

impl Message {
    /// Create a confirmed message record
    pub fn new(
        message_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            content: content.into(),
            parent_message_id,
            created_at: Utc::now(),
            artifact_id: None,
            sources: Vec::new(),
            pending: false,
        }
    }

    /// Create a user message
    pub fn user(
        message_id: impl Into<String>,
        content: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self::new(message_id, Role::User, content, parent_message_id)
    }

    /// Create an assistant message
    pub fn assistant(
        message_id: impl Into<String>,
        content: impl Into<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        Self::new(message_id, Role::Assistant, content, parent_message_id)
    }

    /// Create an optimistic placeholder with a locally generated id
    pub fn optimistic(role: Role, content: impl Into<String>, parent_message_id: Option<String>) -> Self {
        let mut message = Self::new(
            format!("pending-{}", uuid::Uuid::new_v4()),
            role,
            content,
            parent_message_id,
        );
        message.pending = true;
        message
    }

    /// Whether this message is an unconfirmed placeholder
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// A conversation as returned by the system of record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Body for starting a new turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Body for creating an alternate edit of a user message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Body for regenerating an assistant reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directive: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// An option offered by a template-selection-required signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateOption {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}
