//! Last-operation-wins guard for streamed turns

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identity of one streamed operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamToken {
    conversation_id: String,
    operation_id: Uuid,
}

impl StreamToken {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn operation_id(&self) -> Uuid {
        self.operation_id
    }
}

struct ActiveStream {
    token: StreamToken,
    cancel: CancellationToken,
}

/// Single-slot record of the operation currently allowed to mutate state.
///
/// Starting an operation overwrites the slot and cancels whatever held it.
/// Every stream callback compares its own token with [`StreamGuard::is_current`]
/// and drops its effect on mismatch, so a superseded stream can keep
/// delivering events without corrupting the newer one. Cloning is cheap.
#[derive(Clone, Default)]
pub struct StreamGuard {
    slot: Arc<Mutex<Option<ActiveStream>>>,
}

impl StreamGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new operation, cancelling the previous holder
    pub fn begin(&self, conversation_id: impl Into<String>) -> (StreamToken, CancellationToken) {
        let token = StreamToken {
            conversation_id: conversation_id.into(),
            operation_id: Uuid::new_v4(),
        };
        let cancel = CancellationToken::new();

        let previous = self.slot.lock().replace(ActiveStream {
            token: token.clone(),
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            tracing::debug!(
                "Superseding operation {} on {}",
                previous.token.operation_id,
                previous.token.conversation_id
            );
            previous.cancel.cancel();
        }

        (token, cancel)
    }

    /// Whether `token` still owns the slot
    pub fn is_current(&self, token: &StreamToken) -> bool {
        self.slot
            .lock()
            .as_ref()
            .is_some_and(|active| active.token == *token)
    }

    /// Token of the operation holding the slot, if any
    pub fn current(&self) -> Option<StreamToken> {
        self.slot.lock().as_ref().map(|active| active.token.clone())
    }

    /// Release the slot if `token` still holds it. Returns whether it did.
    pub fn finish(&self, token: &StreamToken) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|active| active.token == *token) {
            *slot = None;
            true
        } else {
            false
        }
    }

    /// Cancel and clear whatever holds the slot
    pub fn reset(&self) -> Option<StreamToken> {
        let previous = self.slot.lock().take()?;
        previous.cancel.cancel();
        Some(previous.token)
    }

    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }
}
