//! Backend abstraction over the system of record

use arbor_wire::{
    ChatClient, Conversation, EditRequest, FrameStream, RegenerateRequest, Result, SendRequest,
};
use async_trait::async_trait;

/// The system of record: loads conversations and opens streamed turns.
///
/// Each streaming call returns once the response has started; the returned
/// [`FrameStream`] delivers the turn's events.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Load a conversation with its confirmed message list
    async fn load_conversation(&self, conversation_id: &str) -> Result<Conversation>;

    /// Start a new turn
    async fn send(&self, conversation_id: &str, request: SendRequest) -> Result<FrameStream>;

    /// Create an alternate edit of a user message and answer it
    async fn edit(
        &self,
        conversation_id: &str,
        message_id: &str,
        request: EditRequest,
    ) -> Result<FrameStream>;

    /// Regenerate an assistant reply
    async fn regenerate(
        &self,
        conversation_id: &str,
        message_id: &str,
        request: RegenerateRequest,
    ) -> Result<FrameStream>;
}

/// Backend that talks HTTP through [`ChatClient`]
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: ChatClient,
}

impl HttpBackend {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    /// Create for a base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self::new(ChatClient::new(base_url))
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn load_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.client.fetch_conversation(conversation_id).await
    }

    async fn send(&self, conversation_id: &str, request: SendRequest) -> Result<FrameStream> {
        self.client.stream_send(conversation_id, &request).await
    }

    async fn edit(
        &self,
        conversation_id: &str,
        message_id: &str,
        request: EditRequest,
    ) -> Result<FrameStream> {
        self.client
            .stream_edit(conversation_id, message_id, &request)
            .await
    }

    async fn regenerate(
        &self,
        conversation_id: &str,
        message_id: &str,
        request: RegenerateRequest,
    ) -> Result<FrameStream> {
        self.client
            .stream_regenerate(conversation_id, message_id, &request)
            .await
    }
}
