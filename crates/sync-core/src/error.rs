use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::SessionPhase;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input or unsupported request.
    Config,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or server failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// Referenced conversation or message does not exist.
    NotFound,
    /// Data arrived that would break the message order.
    Ordering,
    /// Operation not valid in the current session phase.
    InvalidState,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable engine error payload returned across the engine boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl ChatError {
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Build an error from an HTTP status reported by the transport.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(classify_http_status(status), format!("http_{status}"), message)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionPhase, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::InvalidState,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in phase {current:?}"),
        )
    }

    pub fn no_active_conversation(action: &str) -> Self {
        Self::new(
            ErrorCategory::InvalidState,
            "no_active_conversation",
            format!("cannot run '{action}' without an active conversation"),
        )
    }

    pub fn message_not_loaded(message_id: &str) -> Self {
        Self::new(
            ErrorCategory::NotFound,
            "message_not_loaded",
            format!("message '{message_id}' is not in the loaded window"),
        )
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Network | ErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        404 | 410 => ErrorCategory::NotFound,
        408 | 429 => ErrorCategory::RateLimited,
        400..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}

/// Diagnostics raised by `MessageStore` mutations. The store is left unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// An older page contained a message not strictly older than the loaded head.
    #[error(
        "page message at {incoming_at_ms} (id {incoming:?}) is not older than head at {head_at_ms} (id {head:?})"
    )]
    NotOlderThanHead {
        incoming: Option<String>,
        incoming_at_ms: u64,
        head: Option<String>,
        head_at_ms: u64,
    },
    /// A message belongs to a different conversation than the store.
    #[error("message for conversation '{found}' offered to store for '{expected}'")]
    ConversationMismatch { expected: String, found: String },
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOlderThanHead { .. } => "ordering_violation",
            Self::ConversationMismatch { .. } => "conversation_mismatch",
        }
    }
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        ChatError::new(ErrorCategory::Ordering, err.code(), err.to_string())
    }
}
