//! Plain-text rendering of the session for the terminal

use arbor_chat::{
    ChatEvent, ReasoningStep, RenderedTurn, Session, StepStatus, TurnEvent, tree::parent_key,
};
use arbor_wire::{Message, Role};
use std::fmt::Write;

/// Render the visible transcript with message numbers and variant counts
pub fn render_transcript(session: &Session, show_reasoning: bool) -> String {
    let tree = session.tree();
    let visible = tree.visible_messages(&session.messages);
    let mut out = String::new();

    if let Some(title) = &session.title {
        let _ = writeln!(out, "== {} ==", title);
    }
    if visible.is_empty() {
        out.push_str("(no messages)\n");
    }

    for (position, message) in visible.iter().enumerate() {
        let siblings = match message.role {
            Role::User => tree.user_branches.get(parent_key(message)),
            Role::Assistant => tree.assistant_branches.get(parent_key(message)),
            Role::System => None,
        };
        let variant = siblings
            .filter(|ids| ids.len() > 1)
            .and_then(|ids| {
                let index = ids.iter().position(|id| *id == message.message_id)?;
                Some(format!(" [{}/{}]", index + 1, ids.len()))
            })
            .unwrap_or_default();

        let _ = writeln!(
            out,
            "#{} {}{}{}: {}",
            position + 1,
            message.role.as_str(),
            variant,
            if message.is_pending() { " (sending)" } else { "" },
            message.content
        );
        render_sources(&mut out, message);
    }

    if session.is_streaming() {
        if let Some(turn) = session.rendered_turn() {
            let _ = writeln!(out, "assistant (streaming): {}", render_turn(&turn, show_reasoning));
        }
    }
    if let Some(failure) = &session.failure {
        let _ = writeln!(
            out,
            "!! {} failed: {} (/ack to dismiss)",
            failure.operation.as_str(),
            failure.message
        );
    }
    out
}

fn render_sources(out: &mut String, message: &Message) {
    for source in &message.sources {
        let label = if source.title.is_empty() {
            &source.url
        } else {
            &source.title
        };
        let _ = writeln!(out, "    - {} {}", label, source.url);
    }
}

/// Render a turn in reading order: early content, reasoning, late content
pub fn render_turn(turn: &RenderedTurn, show_reasoning: bool) -> String {
    let mut out = turn.content_before.clone();
    if let Some(block) = &turn.reasoning {
        if show_reasoning {
            for step in &block.steps {
                let _ = write!(out, "\n  {}", describe_step(step));
            }
            out.push('\n');
        } else {
            let _ = write!(out, " [{} reasoning steps] ", block.steps.len());
        }
    }
    out.push_str(&turn.content_after);
    out
}

/// One-line description of a reasoning step
pub fn describe_step(step: &ReasoningStep) -> String {
    match step {
        ReasoningStep::Thinking { text, status } => {
            let marker = match status {
                StepStatus::InProgress => "thinking...",
                StepStatus::Done => "thought",
            };
            format!("[{}] {}", marker, text.trim())
        }
        ReasoningStep::ToolCall {
            query,
            status,
            results_count,
            ..
        } => match (status, results_count) {
            (StepStatus::Done, Some(count)) => format!("[search] {:?} ({} results)", query, count),
            (StepStatus::Done, None) => format!("[search] {:?} (done)", query),
            (StepStatus::InProgress, _) => format!("[search] {:?}...", query),
        },
    }
}

/// Text to print for a live event, if any
pub fn describe_event(event: &ChatEvent, show_reasoning: bool) -> Option<String> {
    Some(match event {
        ChatEvent::TurnUpdated { event, .. } => match event {
            TurnEvent::ContentChunk { text } => text.clone(),
            _ if !show_reasoning => return None,
            TurnEvent::ThinkingStart => "\n[thinking] ".to_string(),
            TurnEvent::ThinkingChunk { text } => text.clone(),
            TurnEvent::ThinkingEnd => "\n".to_string(),
            TurnEvent::ToolCall { query } => format!("\n[search] {:?}...\n", query),
            TurnEvent::ToolCallComplete {
                query,
                results_count,
                ..
            } => format!("[search] {:?} ({} results)\n", query, results_count),
        },
        ChatEvent::ModelSwitched { model, reason } => match reason {
            Some(reason) => format!("\n[model switched to {}: {}]\n", model, reason),
            None => format!("\n[model switched to {}]\n", model),
        },
        ChatEvent::ArtifactUpdated { panel } if panel.complete => format!(
            "\n[artifact {}]\n{}\n",
            panel.title.as_deref().unwrap_or("untitled"),
            panel.content
        ),
        ChatEvent::TaskProgress { task } => {
            let label = task.label.as_deref().unwrap_or(&task.task_id);
            match (task.complete, task.progress) {
                (true, _) => format!("\n[task {} done]\n", label),
                (false, Some(progress)) => {
                    format!("\n[task {} {:.0}%]\n", label, progress * 100.0)
                }
                (false, None) => format!("\n[task {}]\n", label),
            }
        }
        ChatEvent::TemplateSelectionRequired { templates } => {
            let mut out = String::from("\n[choose a template]\n");
            for template in templates {
                let _ = writeln!(out, "  {} - {}", template.id, template.name);
            }
            out
        }
        ChatEvent::TurnComplete { .. } => "\n".to_string(),
        ChatEvent::TurnFailed { operation, message } => format!(
            "\n!! {} failed: {} (/ack to dismiss)\n",
            operation.as_str(),
            message
        ),
        ChatEvent::TurnCancelled { .. } => "\n[cancelled]\n".to_string(),
        _ => return None,
    })
}
