//! turnkeep-llm — the abstract LLM provider capability (§6) consumed by the
//! agent run coordinator. Ships no concrete wire adapter.

pub mod provider;
pub mod types;

pub use provider::{mock, DeltaStream, Provider};
pub use types::{
    ProviderType, RawTokenUsage, StopReason, StreamConfig, StreamDelta, ToolCallIntent, ToolSchema,
};
