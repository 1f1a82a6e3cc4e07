//! The append-only event atom (§3 "Event").

use crate::ids::{EventId, SessionId};
use crate::message::ContentBlock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed tag set of event types (the wire vocabulary of the log).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "session.start")]
    SessionStart,
    #[serde(rename = "session.fork")]
    SessionFork,
    #[serde(rename = "session.end")]
    SessionEnd,
    #[serde(rename = "message.user")]
    MessageUser,
    #[serde(rename = "message.assistant")]
    MessageAssistant,
    #[serde(rename = "message.deleted")]
    MessageDeleted,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "tool.result")]
    ToolResult,
    #[serde(rename = "stream.turn_start")]
    StreamTurnStart,
    #[serde(rename = "stream.turn_end")]
    StreamTurnEnd,
    #[serde(rename = "compact.boundary")]
    CompactBoundary,
    #[serde(rename = "context.cleared")]
    ContextCleared,
    #[serde(rename = "config.model_switch")]
    ConfigModelSwitch,
    #[serde(rename = "skill.added")]
    SkillAdded,
    #[serde(rename = "skill.removed")]
    SkillRemoved,
    #[serde(rename = "rules.loaded")]
    RulesLoaded,
    #[serde(rename = "hook.triggered")]
    HookTriggered,
    #[serde(rename = "hook.completed")]
    HookCompleted,
    #[serde(rename = "error.provider")]
    ErrorProvider,
}

impl EventType {
    /// Control-plane events contribute nothing to a reconstructed message list
    /// (§4.4 rule 1).
    pub fn is_control_plane(&self) -> bool {
        !matches!(
            self,
            EventType::MessageUser
                | EventType::MessageAssistant
                | EventType::MessageDeleted
                | EventType::ToolResult
                | EventType::CompactBoundary
                | EventType::ContextCleared
        )
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self).unwrap_or_default();
        write!(f, "{}", s.as_str().unwrap_or("unknown"))
    }
}

/// Normalized token accounting attached to a persisted `message.assistant`
/// event once the provider's response completes (§4.6
/// `setResponseTokenUsage`): the same shape regardless of whether the
/// provider reports cumulative or incremental input-token counts.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    #[serde(rename = "newInputTokens")]
    pub new_input_tokens: u64,
    #[serde(rename = "contextWindowTokens")]
    pub context_window_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
}

/// Per-variant event payload. Tagged by `type` so it round-trips losslessly
/// through the storage boundary's `serde_json::Value`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "session.start")]
    SessionStart {
        working_directory: String,
        model: String,
    },
    #[serde(rename = "session.fork")]
    SessionFork {
        fork_name: Option<String>,
    },
    #[serde(rename = "session.end")]
    SessionEnd {},
    #[serde(rename = "message.user")]
    MessageUser {
        content: Vec<ContentBlock>,
    },
    #[serde(rename = "message.assistant")]
    MessageAssistant {
        content: Vec<ContentBlock>,
        turn: Option<u32>,
        #[serde(default)]
        interrupted: bool,
        /// Set from the token tracker's normalized view as soon as the
        /// provider's response completes, before any tool runs (§4.6).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        target: EventId,
    },
    #[serde(rename = "tool.call")]
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename = "tool.result")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        content: String,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
    #[serde(rename = "stream.turn_start")]
    StreamTurnStart {
        turn: u32,
    },
    #[serde(rename = "stream.turn_end")]
    StreamTurnEnd {
        turn: u32,
        #[serde(default)]
        interrupted: bool,
    },
    #[serde(rename = "compact.boundary")]
    CompactBoundary {
        summary: String,
        original_tokens: Option<u64>,
        compacted_tokens: Option<u64>,
    },
    #[serde(rename = "context.cleared")]
    ContextCleared {},
    #[serde(rename = "config.model_switch")]
    ConfigModelSwitch {
        model: String,
        previous_model: Option<String>,
    },
    #[serde(rename = "skill.added")]
    SkillAdded {
        name: String,
    },
    #[serde(rename = "skill.removed")]
    SkillRemoved {
        name: String,
    },
    #[serde(rename = "rules.loaded")]
    RulesLoaded {
        paths: Vec<String>,
    },
    #[serde(rename = "hook.triggered")]
    HookTriggered {
        name: String,
    },
    #[serde(rename = "hook.completed")]
    HookCompleted {
        name: String,
        success: bool,
    },
    #[serde(rename = "error.provider")]
    ErrorProvider {
        message: String,
        retryable: bool,
    },
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SessionStart { .. } => EventType::SessionStart,
            EventPayload::SessionFork { .. } => EventType::SessionFork,
            EventPayload::SessionEnd {} => EventType::SessionEnd,
            EventPayload::MessageUser { .. } => EventType::MessageUser,
            EventPayload::MessageAssistant { .. } => EventType::MessageAssistant,
            EventPayload::MessageDeleted { .. } => EventType::MessageDeleted,
            EventPayload::ToolCall { .. } => EventType::ToolCall,
            EventPayload::ToolResult { .. } => EventType::ToolResult,
            EventPayload::StreamTurnStart { .. } => EventType::StreamTurnStart,
            EventPayload::StreamTurnEnd { .. } => EventType::StreamTurnEnd,
            EventPayload::CompactBoundary { .. } => EventType::CompactBoundary,
            EventPayload::ContextCleared {} => EventType::ContextCleared,
            EventPayload::ConfigModelSwitch { .. } => EventType::ConfigModelSwitch,
            EventPayload::SkillAdded { .. } => EventType::SkillAdded,
            EventPayload::SkillRemoved { .. } => EventType::SkillRemoved,
            EventPayload::RulesLoaded { .. } => EventType::RulesLoaded,
            EventPayload::HookTriggered { .. } => EventType::HookTriggered,
            EventPayload::HookCompleted { .. } => EventType::HookCompleted,
            EventPayload::ErrorProvider { .. } => EventType::ErrorProvider,
        }
    }
}

/// An immutable, typed, parent-linked record — the atomic unit of session history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub session_id: SessionId,
    pub parent_id: Option<EventId>,
    pub sequence: i64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}
