//! Recording and chronological reconstruction of one in-flight turn
//!
//! The transport interleaves reply content, reasoning narration and tool
//! invocations on a single channel. A [`MessageEventStream`] keeps every
//! such event with its receipt time, and [`MessageEventStream::render`]
//! rebuilds a layout from them: content that arrived before any reasoning
//! or tool activity, one reasoning block, then content that arrived after.

use arbor_wire::{Source, StreamEvent};
use serde::{Deserialize, Serialize};

/// The subset of transport events that shape a rendered turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload", rename_all = "snake_case")]
pub enum TurnEvent {
    ContentChunk {
        text: String,
    },
    ThinkingStart,
    ThinkingChunk {
        text: String,
    },
    ThinkingEnd,
    ToolCall {
        query: String,
    },
    ToolCallComplete {
        query: String,
        results_count: usize,
        results: Vec<Source>,
    },
}

impl TurnEvent {
    /// Map a transport event onto a turn event, if it is one
    pub fn from_stream(event: &StreamEvent) -> Option<Self> {
        Some(match event {
            StreamEvent::Chunk { content } => TurnEvent::ContentChunk {
                text: content.clone(),
            },
            StreamEvent::ThinkingStart => TurnEvent::ThinkingStart,
            StreamEvent::ThinkingChunk { content } => TurnEvent::ThinkingChunk {
                text: content.clone(),
            },
            StreamEvent::ThinkingEnd => TurnEvent::ThinkingEnd,
            StreamEvent::ToolCall { query, .. } => TurnEvent::ToolCall {
                query: query.clone(),
            },
            StreamEvent::ToolCallComplete {
                query,
                results_count,
                results,
            } => TurnEvent::ToolCallComplete {
                query: query.clone(),
                results_count: *results_count,
                results: results.clone(),
            },
            _ => return None,
        })
    }

    fn is_activity(&self) -> bool {
        matches!(
            self,
            TurnEvent::ThinkingStart
                | TurnEvent::ThinkingChunk { .. }
                | TurnEvent::ToolCall { .. }
                | TurnEvent::ToolCallComplete { .. }
        )
    }
}

/// A turn event stamped with its local receipt time (unix millis)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStreamItem {
    pub timestamp: i64,
    pub event: TurnEvent,
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Complete,
    Error,
    Cancelled,
}

/// Where a turn is in its lifecycle.
///
/// Derived from the recorded events, never stored. `Thinking`, `ToolCall`
/// and `Streaming` can alternate any number of times within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Idle,
    InitialWait,
    Thinking,
    ToolCall,
    Streaming,
    Complete,
    Error,
    Cancelled,
}

impl From<TurnOutcome> for TurnPhase {
    fn from(outcome: TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::Complete => TurnPhase::Complete,
            TurnOutcome::Error => TurnPhase::Error,
            TurnOutcome::Cancelled => TurnPhase::Cancelled,
        }
    }
}

/// Progress of a reasoning step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Done,
}

/// One entry in the reasoning block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReasoningStep {
    Thinking {
        text: String,
        status: StepStatus,
    },
    ToolCall {
        query: String,
        status: StepStatus,
        results_count: Option<usize>,
        results: Vec<Source>,
    },
}

impl ReasoningStep {
    pub fn status(&self) -> StepStatus {
        match self {
            ReasoningStep::Thinking { status, .. } | ReasoningStep::ToolCall { status, .. } => {
                *status
            }
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ReasoningStep::ToolCall { .. })
    }
}

/// The single collapsible block shown between the two content segments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningBlock {
    pub steps: Vec<ReasoningStep>,
}

impl ReasoningBlock {
    /// Whether any step is still open
    pub fn is_in_progress(&self) -> bool {
        self.steps
            .iter()
            .any(|step| step.status() == StepStatus::InProgress)
    }

    pub fn tool_call_count(&self) -> usize {
        self.steps.iter().filter(|step| step.is_tool_call()).count()
    }

    fn open_thinking(&self) -> bool {
        self.steps.iter().any(|step| {
            matches!(
                step,
                ReasoningStep::Thinking {
                    status: StepStatus::InProgress,
                    ..
                }
            )
        })
    }

    fn open_tool_call(&self) -> bool {
        self.steps.iter().any(|step| {
            matches!(
                step,
                ReasoningStep::ToolCall {
                    status: StepStatus::InProgress,
                    ..
                }
            )
        })
    }
}

/// Render-ready layout of a turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedTurn {
    pub content_before: String,
    pub reasoning: Option<ReasoningBlock>,
    pub content_after: String,
}

impl RenderedTurn {
    /// All reply content, in display order
    pub fn content(&self) -> String {
        format!("{}{}", self.content_before, self.content_after)
    }

    pub fn is_empty(&self) -> bool {
        self.content_before.is_empty() && self.content_after.is_empty() && self.reasoning.is_none()
    }
}

/// Events recorded for one in-flight turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEventStream {
    pub conversation_id: String,
    /// The user message whose reply is in flight
    pub anchor_message_id: String,
    pub events: Vec<EventStreamItem>,
    outcome: Option<TurnOutcome>,
    #[serde(skip)]
    progress: Progress,
}

/// Open steps tracked as events arrive, so the phase needs no re-render.
/// Only valid while events were recorded in timestamp order.
#[derive(Debug, Clone, Default, PartialEq)]
struct Progress {
    in_order: bool,
    last_timestamp: i64,
    last_was_content: bool,
    thinking_open: bool,
    open_queries: Vec<String>,
}

impl Progress {
    fn tracking() -> Self {
        Self {
            in_order: true,
            ..Self::default()
        }
    }

    fn observe(&mut self, timestamp: i64, event: &TurnEvent) {
        if !self.in_order {
            return;
        }
        if timestamp < self.last_timestamp {
            self.in_order = false;
            return;
        }
        self.last_timestamp = timestamp;
        self.last_was_content = matches!(event, TurnEvent::ContentChunk { .. });

        match event {
            TurnEvent::ContentChunk { .. } => {}
            TurnEvent::ThinkingStart | TurnEvent::ThinkingChunk { .. } => self.thinking_open = true,
            TurnEvent::ThinkingEnd => self.thinking_open = false,
            TurnEvent::ToolCall { query } => self.open_queries.push(query.clone()),
            TurnEvent::ToolCallComplete { query, .. } => {
                if let Some(index) = self.open_queries.iter().position(|q| q == query) {
                    self.open_queries.remove(index);
                }
            }
        }
    }
}

impl MessageEventStream {
    /// Start recording a turn
    pub fn new(conversation_id: impl Into<String>, anchor_message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            anchor_message_id: anchor_message_id.into(),
            events: Vec::new(),
            outcome: None,
            progress: Progress::tracking(),
        }
    }

    /// Record an event at the current time. Finished turns accept nothing.
    pub fn record(&mut self, event: TurnEvent) -> bool {
        self.record_at(chrono::Utc::now().timestamp_millis(), event)
    }

    /// Record an event with an explicit receipt time
    pub fn record_at(&mut self, timestamp: i64, event: TurnEvent) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.progress.observe(timestamp, &event);
        self.events.push(EventStreamItem { timestamp, event });
        true
    }

    /// Point the turn at a different user message (placeholder confirmed)
    pub fn reanchor(&mut self, anchor_message_id: impl Into<String>) {
        self.anchor_message_id = anchor_message_id.into();
    }

    /// Mark the turn finished. The first outcome wins.
    pub fn finish(&mut self, outcome: TurnOutcome) {
        self.outcome.get_or_insert(outcome);
    }

    pub fn outcome(&self) -> Option<TurnOutcome> {
        self.outcome
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Events in chronological order. The sort is stable, so events with
    /// equal timestamps keep receipt order.
    fn ordered(&self) -> Vec<&EventStreamItem> {
        let mut items: Vec<&EventStreamItem> = self.events.iter().collect();
        items.sort_by_key(|item| item.timestamp);
        items
    }

    /// Rebuild the turn layout from the recorded events
    pub fn render(&self) -> RenderedTurn {
        let mut rendered = RenderedTurn::default();
        let mut steps: Vec<ReasoningStep> = Vec::new();
        let mut open_thinking: Option<usize> = None;
        let mut seen_activity = false;

        for item in self.ordered() {
            seen_activity |= item.event.is_activity();

            match &item.event {
                TurnEvent::ContentChunk { text } => {
                    if seen_activity {
                        rendered.content_after.push_str(text);
                    } else {
                        rendered.content_before.push_str(text);
                    }
                }
                TurnEvent::ThinkingStart => {
                    if let Some(index) = open_thinking.take() {
                        close(&mut steps[index]);
                    }
                    steps.push(ReasoningStep::Thinking {
                        text: String::new(),
                        status: StepStatus::InProgress,
                    });
                    open_thinking = Some(steps.len() - 1);
                }
                TurnEvent::ThinkingChunk { text } => {
                    let index = *open_thinking.get_or_insert_with(|| {
                        steps.push(ReasoningStep::Thinking {
                            text: String::new(),
                            status: StepStatus::InProgress,
                        });
                        steps.len() - 1
                    });
                    if let ReasoningStep::Thinking { text: buffer, .. } = &mut steps[index] {
                        buffer.push_str(text);
                    }
                }
                TurnEvent::ThinkingEnd => {
                    if let Some(index) = open_thinking.take() {
                        close(&mut steps[index]);
                    }
                }
                TurnEvent::ToolCall { query } => {
                    steps.push(ReasoningStep::ToolCall {
                        query: query.clone(),
                        status: StepStatus::InProgress,
                        results_count: None,
                        results: Vec::new(),
                    });
                }
                TurnEvent::ToolCallComplete {
                    query,
                    results_count,
                    results,
                } => {
                    let open = steps.iter_mut().find(|step| {
                        matches!(
                            step,
                            ReasoningStep::ToolCall {
                                query: q,
                                status: StepStatus::InProgress,
                                ..
                            } if q == query
                        )
                    });
                    let done = ReasoningStep::ToolCall {
                        query: query.clone(),
                        status: StepStatus::Done,
                        results_count: Some(*results_count),
                        results: results.clone(),
                    };
                    match open {
                        Some(step) => *step = done,
                        None => {
                            tracing::debug!(
                                "tool_call_complete without open step for {:?}, synthesizing",
                                query
                            );
                            steps.push(done);
                        }
                    }
                }
            }
        }

        if seen_activity {
            rendered.reasoning = Some(ReasoningBlock { steps });
        }
        rendered
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> TurnPhase {
        if let Some(outcome) = self.outcome {
            return outcome.into();
        }
        if self.events.is_empty() {
            return TurnPhase::InitialWait;
        }
        if self.progress.in_order {
            let progress = &self.progress;
            return if progress.last_was_content {
                TurnPhase::Streaming
            } else if progress.thinking_open {
                TurnPhase::Thinking
            } else if !progress.open_queries.is_empty() {
                TurnPhase::ToolCall
            } else {
                TurnPhase::Streaming
            };
        }
        self.rendered_phase()
    }

    /// Phase from a full chronological re-render
    fn rendered_phase(&self) -> TurnPhase {
        let ordered = self.ordered();
        let Some(last) = ordered.last() else {
            return TurnPhase::InitialWait;
        };
        if matches!(last.event, TurnEvent::ContentChunk { .. }) {
            return TurnPhase::Streaming;
        }

        match self.render().reasoning {
            Some(block) if block.open_thinking() => TurnPhase::Thinking,
            Some(block) if block.open_tool_call() => TurnPhase::ToolCall,
            _ => TurnPhase::Streaming,
        }
    }
}

fn close(step: &mut ReasoningStep) {
    if let ReasoningStep::Thinking { status, .. } = step {
        *status = StepStatus::Done;
    }
}
