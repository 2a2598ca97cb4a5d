//! Error types for the send pipeline.

use horizont_core::error::HorizontError;
use horizont_core::types::ChatId;

/// Errors surfaced to callers of the conversation orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("chat not found: {0}")]
    ChatNotFound(ChatId),
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),
    #[error("completion service rejected credentials: {0}")]
    AuthFailed(String),
    #[error("completion service unavailable: {0}")]
    TransientFailed(String),
    #[error("send exceeded its budget of {budget_ms} ms")]
    TimeoutExceeded { budget_ms: u64 },
    #[error("completion failed: {0}")]
    CompletionFailed(String),
}

impl ChatError {
    /// Stable taxonomy name for logs and machine-readable output.
    pub fn class(&self) -> &'static str {
        match self {
            ChatError::EmptyMessage | ChatError::MessageTooLong(_) => "validation_failed",
            ChatError::ChatNotFound(_) => "not_found",
            ChatError::PersistenceFailed(_) => "persistence_failed",
            ChatError::AuthFailed(_) => "auth_failed",
            ChatError::TransientFailed(_) => "transient_failed",
            ChatError::TimeoutExceeded { .. } => "timeout_exceeded",
            ChatError::CompletionFailed(_) => "completion_failed",
        }
    }
}

impl From<HorizontError> for ChatError {
    fn from(err: HorizontError) -> Self {
        match err {
            HorizontError::ChatNotFound(id) => ChatError::ChatNotFound(id),
            other => ChatError::PersistenceFailed(other.to_string()),
        }
    }
}
