//! Token usage normalization for the Turn Content Tracker (§4.6
//! `setResponseTokenUsage`, SPEC_FULL §4.6 [ADD]).
//!
//! Providers disagree on whether `inputTokens` is the running total for the
//! whole run or just the cost of the latest request; this tracker folds
//! both shapes into one normalized view the rest of the kernel can log and
//! ship without caring which provider produced it.

use turnkeep_llm::{ProviderType, RawTokenUsage};

/// `{ newInputTokens, contextWindowTokens, outputTokens }` — the normalized
/// view attached to a `message.assistant` event. Shares its shape with
/// `turnkeep_core::TokenUsage`, the persisted form of the same value.
pub type NormalizedUsage = turnkeep_core::TokenUsage;

#[derive(Debug)]
pub struct TokenTracker {
    provider_type: ProviderType,
    /// Cumulative input-token count observed at the start of the run.
    context_baseline: u64,
    /// Running total for `Incremental` providers; unused for `Cumulative`.
    running_total: u64,
    last_raw: Option<RawTokenUsage>,
    last_normalized: Option<NormalizedUsage>,
}

impl TokenTracker {
    pub fn new(provider_type: ProviderType) -> Self {
        Self { provider_type, context_baseline: 0, running_total: 0, last_raw: None, last_normalized: None }
    }

    /// Captured in `onAgentStart` so a resumed run's context window still
    /// reads as "whole conversation so far", not "just this run".
    pub fn set_baseline(&mut self, baseline: u64) {
        self.context_baseline = baseline;
        self.running_total = baseline;
    }

    pub fn last_normalized(&self) -> Option<NormalizedUsage> {
        self.last_normalized
    }

    pub fn last_raw(&self) -> Option<RawTokenUsage> {
        self.last_raw
    }

    pub fn record(&mut self, usage: RawTokenUsage) -> NormalizedUsage {
        let normalized = match self.provider_type {
            ProviderType::Cumulative => NormalizedUsage {
                new_input_tokens: usage.input_tokens.saturating_sub(self.context_baseline),
                context_window_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            },
            ProviderType::Incremental => {
                self.running_total = self.running_total.saturating_add(usage.input_tokens);
                NormalizedUsage {
                    new_input_tokens: usage.input_tokens,
                    context_window_tokens: self.running_total,
                    output_tokens: usage.output_tokens,
                }
            }
        };
        self.last_raw = Some(usage);
        self.last_normalized = Some(normalized);
        normalized
    }
}
