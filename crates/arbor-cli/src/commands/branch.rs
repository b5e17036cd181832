//! /branch command - move between variants of a message

use super::{CommandResult, split_position};

/// Which variant to show
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchTarget {
    Next,
    Prev,
    /// 0-based variant index
    Index(usize),
}

impl BranchTarget {
    /// Resolve against the current index and the variant count.
    ///
    /// `Next` and `Prev` stop at the ends; explicit indices are passed
    /// through unchanged and clamped when the path is resolved.
    pub fn resolve(self, current: usize, count: usize) -> usize {
        match self {
            BranchTarget::Next => (current + 1).min(count.saturating_sub(1)),
            BranchTarget::Prev => current.saturating_sub(1),
            BranchTarget::Index(index) => index,
        }
    }
}

pub struct BranchCommand;

impl BranchCommand {
    /// Execute /branch command
    /// - `<n> next` / `<n> prev`: step through variants of message n
    /// - `<n> <k>`: show variant k of message n
    pub fn execute(args: &str) -> CommandResult {
        let Some((position, target)) = split_position(args) else {
            return CommandResult::Message("Usage: /branch <n> <next|prev|k>".to_string());
        };

        let target = match target.to_lowercase().as_str() {
            "" | "next" | "n" | ">" => BranchTarget::Next,
            "prev" | "p" | "<" => BranchTarget::Prev,
            other => match other.parse::<usize>().ok().and_then(|k| k.checked_sub(1)) {
                Some(index) => BranchTarget::Index(index),
                None => {
                    return CommandResult::Message(format!(
                        "Invalid variant '{}'. Use next, prev, or a number from 1.",
                        other
                    ));
                }
            },
        };

        CommandResult::Branch { position, target }
    }
}
