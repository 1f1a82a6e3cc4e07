//! The closed error taxonomy (§7).

use crate::ids::{EventId, SessionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("parent event not found: {0}")]
    ParentMissing(EventId),

    #[error("session already ended: {0}")]
    SessionEnded(SessionId),

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("event not found: {0}")]
    EventNotFound(EventId),

    #[error("run already in progress for session {0}")]
    Busy(SessionId),

    #[error("run cancelled")]
    Cancelled,

    #[error("transient provider error: {message} (retry after {retry_after_ms:?}ms)")]
    ProviderRetryable {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("fatal provider error: {0}")]
    ProviderFatal(String),

    #[error("dangling tool_use with no matching result: {0}")]
    DanglingToolUse(String),

    #[error("log invariant violated for session {session}: {detail}")]
    InvariantViolation { session: SessionId, detail: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn invariant_violation(session: SessionId, detail: impl Into<String>) -> Self {
        Self::InvariantViolation { session, detail: detail.into() }
    }

    pub fn provider_retryable(message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::ProviderRetryable { message: message.into(), retry_after_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        let e = Error::SessionNotFound(SessionId::new("s1"));
        assert_eq!(e.to_string(), "session not found: s1");

        let e = Error::ParentMissing(EventId::new("e1"));
        assert_eq!(e.to_string(), "parent event not found: e1");
    }

    #[test]
    fn json_error_converts_via_from() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let e: Error = bad.into();
        assert!(matches!(e, Error::Json(_)));
    }
}
