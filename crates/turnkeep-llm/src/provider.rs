//! The abstract LLM provider capability (§6).

use crate::types::{StreamConfig, StreamDelta};
use futures::Stream;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use turnkeep_core::{Message, Result};

/// Stream of deltas yielded by one `Provider::stream` call.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// The capability the turn loop (L8) drives to get model output. Concrete
/// wire adapters (Anthropic, OpenAI, …) live outside this workspace; this
/// crate only ships the trait plus a scripted mock for tests.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Start a streaming completion over the given message history.
    /// If `cancel` fires mid-stream, the provider should stop producing
    /// deltas; the turn loop treats cancellation as out-of-band, not as a
    /// `ProviderError` delta.
    async fn stream(
        &self,
        messages: Vec<Message>,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Result<DeltaStream>;
}

/// A scripted provider for exercising the coordinator in tests without a
/// real wire adapter. Kept as a normal (non-cfg-gated) module so downstream
/// crates in this workspace can drive integration tests against it too.
pub mod mock {
    use super::*;
    use crate::types::{RawTokenUsage, StopReason, ToolCallIntent};
    use futures::stream;

    /// One scripted turn's worth of deltas, returned in order regardless of
    /// the messages passed in. Used by integration tests across the
    /// workspace to drive the coordinator deterministically.
    #[derive(Clone, Debug)]
    pub struct ScriptedTurn {
        pub deltas: Vec<StreamDelta>,
    }

    impl ScriptedTurn {
        pub fn text(text: impl Into<String>) -> Self {
            Self {
                deltas: vec![
                    StreamDelta::TextDelta { text: text.into() },
                    StreamDelta::ResponseComplete {
                        token_usage: RawTokenUsage {
                            input_tokens: 10,
                            output_tokens: 5,
                            cache_read_tokens: None,
                            cache_creation_tokens: None,
                        },
                        stop_reason: StopReason::EndTurn,
                    },
                ],
            }
        }

        pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: serde_json::Value) -> Self {
            Self {
                deltas: vec![
                    StreamDelta::ToolUseBatch {
                        calls: vec![ToolCallIntent { id: id.into(), name: name.into(), args }],
                    },
                    StreamDelta::ResponseComplete {
                        token_usage: RawTokenUsage {
                            input_tokens: 10,
                            output_tokens: 5,
                            cache_read_tokens: None,
                            cache_creation_tokens: None,
                        },
                        stop_reason: StopReason::ToolUse,
                    },
                ],
            }
        }
    }

    /// A provider driven entirely by a pre-scripted sequence of turns, one
    /// consumed per `stream` call. Panics if the script runs dry.
    pub struct MockProvider {
        turns: parking_lot::Mutex<std::collections::VecDeque<ScriptedTurn>>,
    }

    impl MockProvider {
        pub fn new(turns: Vec<ScriptedTurn>) -> Self {
            Self { turns: parking_lot::Mutex::new(turns.into_iter().collect()) }
        }
    }

    #[async_trait::async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn stream(
            &self,
            _messages: Vec<Message>,
            _config: StreamConfig,
            _cancel: CancellationToken,
        ) -> Result<DeltaStream> {
            let turn = self
                .turns
                .lock()
                .pop_front()
                .expect("mock provider script exhausted");
            Ok(Box::pin(stream::iter(turn.deltas.into_iter().map(Ok))))
        }
    }
}
