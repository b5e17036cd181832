//! Transport event types and the byte-stream adapter

use crate::{
    decoder::FrameDecoder,
    error::{Error, Result},
    types::{Message, Source, TemplateOption},
};
use async_stream::stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events carried by the push transport, one per frame.
///
/// The `type` field of each frame selects the variant. Unrecognized values
/// decode to [`StreamEvent::Unknown`] so that new event kinds never break an
/// older client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Reply content delta
    Chunk { content: String },
    /// The server switched to a different model for this turn
    ModelSwitched {
        model: String,
        reason: Option<String>,
    },
    /// Reasoning narration started
    ThinkingStart,
    /// Reasoning narration delta
    ThinkingChunk { content: String },
    /// Reasoning narration ended
    ThinkingEnd,
    /// An artifact started streaming
    ArtifactStart {
        artifact_id: Option<String>,
        title: Option<String>,
        kind: Option<String>,
    },
    /// Artifact content delta
    ArtifactContent { content: String },
    /// Artifact finished streaming
    ArtifactComplete { content: Option<String> },
    /// Artifact persisted by the server
    ArtifactSaved { artifact_id: String },
    /// Artifact record created and linked to a message
    ArtifactCreated {
        artifact_id: String,
        message_id: Option<String>,
    },
    /// Server confirmed the new user-message branch of an edit
    UserBranchCreated { message: Message },
    /// Server's authoritative set of ids pruned by a regenerate
    PrunedDescendants { message_ids: Vec<String> },
    /// A tool invocation opened
    ToolCall {
        query: String,
        tool: Option<String>,
    },
    /// A tool invocation finished
    ToolCallComplete {
        query: String,
        #[serde(default)]
        results_count: usize,
        #[serde(default)]
        results: Vec<Source>,
    },
    /// A long-running task started
    TaskStarted {
        task_id: String,
        label: Option<String>,
    },
    /// A long-running task reported progress
    TaskProgress {
        task_id: String,
        progress: Option<f32>,
        message: Option<String>,
    },
    /// A long-running task finished
    TaskComplete { task_id: String },
    /// The server needs the user to pick a template before continuing
    TemplateSelectionRequired {
        #[serde(default)]
        templates: Vec<TemplateOption>,
    },
    /// Turn completed successfully
    Complete {
        message_id: Option<String>,
        user_message_id: Option<String>,
    },
    /// Turn failed on the server
    Error { message: String },
    /// Any discriminant this client does not know
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    /// Check if this is a terminal event (Complete or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    /// The wire discriminant, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::ModelSwitched { .. } => "model_switched",
            StreamEvent::ThinkingStart => "thinking_start",
            StreamEvent::ThinkingChunk { .. } => "thinking_chunk",
            StreamEvent::ThinkingEnd => "thinking_end",
            StreamEvent::ArtifactStart { .. } => "artifact_start",
            StreamEvent::ArtifactContent { .. } => "artifact_content",
            StreamEvent::ArtifactComplete { .. } => "artifact_complete",
            StreamEvent::ArtifactSaved { .. } => "artifact_saved",
            StreamEvent::ArtifactCreated { .. } => "artifact_created",
            StreamEvent::UserBranchCreated { .. } => "user_branch_created",
            StreamEvent::PrunedDescendants { .. } => "pruned_descendants",
            StreamEvent::ToolCall { .. } => "tool_call",
            StreamEvent::ToolCallComplete { .. } => "tool_call_complete",
            StreamEvent::TaskStarted { .. } => "task_started",
            StreamEvent::TaskProgress { .. } => "task_progress",
            StreamEvent::TaskComplete { .. } => "task_complete",
            StreamEvent::TemplateSelectionRequired { .. } => "template_selection_required",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Unknown => "unknown",
        }
    }
}

/// A lazy, finite, non-restartable stream of decoded transport events
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Decode a raw byte stream into typed events.
///
/// Malformed frames are skipped by the decoder. A read error from the
/// underlying stream is yielded once and ends the sequence.
pub fn decode_frames<S, B, E>(bytes: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    Box::pin(stream! {
        let mut decoder = FrameDecoder::new();
        let mut bytes = Box::pin(bytes);

        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in decoder.push(chunk.as_ref()) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            }
        }

        for event in decoder.finish() {
            yield Ok(event);
        }
    })
}
