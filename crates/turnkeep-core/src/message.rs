//! The reconstructed message view (§3 "Message (reconstructed view)").
//!
//! These types are never stored directly — they are the output of the
//! message reconstructor, built by replaying an ancestor chain of events.

use serde::{Deserialize, Serialize};

/// A single content block inside a user or assistant message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking")]
    Thinking {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        #[serde(alias = "arguments")]
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        content: String,
        #[serde(rename = "isError", default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking { .. })
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn tool_result_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolResult { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }
}

/// A reconstructed message — the output of `messagesAt`, never persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User { content: Vec<ContentBlock> },
    Assistant { content: Vec<ContentBlock> },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User {
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }

    pub fn content(&self) -> &[ContentBlock] {
        match self {
            Message::User { content } | Message::Assistant { content } => content,
        }
    }

    pub fn content_mut(&mut self) -> &mut Vec<ContentBlock> {
        match self {
            Message::User { content } | Message::Assistant { content } => content,
        }
    }

    /// Tool-use ids carried by this message, in appearance order.
    pub fn tool_use_ids(&self) -> Vec<&str> {
        self.content().iter().filter_map(ContentBlock::tool_use_id).collect()
    }

    /// Whether this is a synthetic user message whose blocks are all `tool_result`.
    pub fn is_tool_result_only(&self) -> bool {
        self.is_user()
            && !self.content().is_empty()
            && self.content().iter().all(ContentBlock::is_tool_result)
    }
}
