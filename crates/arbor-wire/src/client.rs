//! HTTP client for the conversation backend

use crate::{
    error::{Error, Result},
    stream::{FrameStream, decode_frames},
    types::{Conversation, EditRequest, RegenerateRequest, SendRequest},
};
use reqwest::Url;
use serde::Serialize;

/// Environment variable holding the backend base URL
pub const BASE_URL_ENV: &str = "ARBOR_BASE_URL";

/// Client for the system of record.
///
/// Non-streaming calls return decoded records; streaming calls return a
/// [`FrameStream`] over the response body.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    /// Create a new client for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| Error::InvalidConfig(format!("{} is not set", BASE_URL_ENV)))?;
        Ok(Self::new(base_url))
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch a conversation with its full, confirmed message list
    pub async fn fetch_conversation(&self, conversation_id: &str) -> Result<Conversation> {
        let url = self.endpoint(&["conversations", conversation_id])?;
        tracing::debug!("Fetching conversation: {}", url);

        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    /// Start a new turn
    pub async fn stream_send(
        &self,
        conversation_id: &str,
        request: &SendRequest,
    ) -> Result<FrameStream> {
        let url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        self.open_stream(url, request).await
    }

    /// Create an alternate edit of a user message and answer it
    pub async fn stream_edit(
        &self,
        conversation_id: &str,
        message_id: &str,
        request: &EditRequest,
    ) -> Result<FrameStream> {
        let url = self.endpoint(&[
            "conversations",
            conversation_id,
            "messages",
            message_id,
            "edit",
        ])?;
        self.open_stream(url, request).await
    }

    /// Regenerate an assistant reply
    pub async fn stream_regenerate(
        &self,
        conversation_id: &str,
        message_id: &str,
        request: &RegenerateRequest,
    ) -> Result<FrameStream> {
        let url = self.endpoint(&[
            "conversations",
            conversation_id,
            "messages",
            message_id,
            "regenerate",
        ])?;
        self.open_stream(url, request).await
    }

    /// Build an endpoint URL. Each segment is percent-encoded, so ids
    /// containing `/`, `?` or `#` stay inside their own segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| Error::InvalidConfig(format!("bad base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::InvalidConfig(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn open_stream<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> Result<FrameStream> {
        tracing::debug!("Opening stream: {}", url);

        let response = self
            .client
            .post(url)
            .header("accept", "text/event-stream")
            .json(body)
            .send()
            .await?;
        let response = check_status(response).await?;

        Ok(decode_frames(response.bytes_stream()))
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };
    Err(Error::api(status.as_u16(), message))
}
