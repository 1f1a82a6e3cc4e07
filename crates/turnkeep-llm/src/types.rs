//! Wire types for the abstract `Provider` capability (§6).

use serde::{Deserialize, Serialize};

/// One announced tool call inside a `ToolUseBatch` delta.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCallIntent {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// The closed set of delta kinds a provider stream may yield.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamDelta {
    TextDelta {
        text: String,
    },
    ThinkingDelta {
        text: String,
    },
    ThinkingEnd {
        signature: Option<String>,
    },
    ToolUseBatch {
        calls: Vec<ToolCallIntent>,
    },
    ToolArgumentDelta {
        id: String,
        delta_json: String,
    },
    ResponseComplete {
        token_usage: RawTokenUsage,
        stop_reason: StopReason,
    },
    ProviderError {
        retryable: bool,
        retry_after_ms: Option<u64>,
        message: String,
    },
}

/// The closed set of stop reasons a turn's streaming response may end with.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Refusal,
    Error,
}

impl StopReason {
    /// Whether the coordinator should start another turn after this one.
    pub fn continues_turn_loop(&self) -> bool {
        matches!(self, StopReason::ToolUse)
    }
}

/// Raw, provider-reported token usage — shape and meaning vary by provider
/// (see `ProviderType`); the turn tracker normalizes this (§4.6).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RawTokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: Option<u64>,
    pub cache_creation_tokens: Option<u64>,
}

/// How a provider reports `input_tokens` across turns of one run — dictates
/// how the turn tracker normalizes usage (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderType {
    /// `input_tokens` on each `ResponseComplete` is the running total for
    /// the whole run so far.
    Cumulative,
    /// `input_tokens` on each `ResponseComplete` covers only that turn's
    /// request.
    Incremental,
}

/// Schema for one tool the provider may call, attached to a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Request configuration for one streaming call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamConfig {
    pub model: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub tools: Vec<ToolSchema>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            model: "default-model".to_string(),
            system: None,
            max_tokens: Some(8192),
            tools: Vec::new(),
        }
    }
}
