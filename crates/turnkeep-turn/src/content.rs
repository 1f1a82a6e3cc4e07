//! L6 Turn Content Tracker — in-memory per-turn and accumulated streaming
//! state for one active run, plus the pre-tool flush and interrupt-capture
//! algorithms (§4.6).
//!
//! One instance lives per active run; it is owned by the coordinator (L8)
//! and is never shared across sessions.

use chrono::{DateTime, Utc};
use serde_json::Value;
use turnkeep_core::ContentBlock;

/// One item in a turn's flat content sequence (§3 "Content sequence item").
#[derive(Clone, Debug, PartialEq)]
pub enum ContentSequenceItem {
    Text { text: String },
    ToolRef { tool_call_id: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Clone, Debug)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub status: ToolCallStatus,
    pub result: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    fn pending(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One tool call announced in a `tool_use_batch` delta (§4.6
/// `registerToolIntents`).
#[derive(Clone, Debug)]
pub struct ToolIntent {
    pub id: String,
    pub name: String,
    pub args: Value,
}

/// Interrupt capture output (§4.6 `buildInterruptedContent`): the
/// assistant-content block list plus synthetic `tool_result` blocks for any
/// tool call that had started but did not complete.
#[derive(Clone, Debug, Default)]
pub struct InterruptedContent {
    pub assistant_blocks: Vec<ContentBlock>,
    pub tool_results: Vec<ContentBlock>,
}

/// Holds both the accumulated (whole-run) and per-turn streaming views, plus
/// the in-flight tool call bookkeeping that both draw from.
#[derive(Default)]
pub struct TurnContentTracker {
    // Accumulated view — persists across all turns of one run.
    accumulated_text: String,
    accumulated_thinking: String,
    accumulated_thinking_signature: Option<String>,
    accumulated_tool_calls: Vec<ToolCall>,
    accumulated_sequence: Vec<ContentSequenceItem>,

    // Per-turn view — cleared at the start of each turn.
    this_turn_sequence: Vec<ContentSequenceItem>,
    this_turn_tool_calls: std::collections::HashMap<String, ToolCall>,
    this_turn_tool_call_order: Vec<String>,
    this_turn_thinking: String,
    this_turn_thinking_signature: Option<String>,

    current_turn: u32,
    current_turn_start_time: Option<DateTime<Utc>>,
    pre_tool_content_flushed: bool,

    // Snapshot of the accumulated view taken at `onTurnStart`, restored by
    // `discardTurnAttempt` when a provider retry needs to replay the turn
    // without double-counting the failed attempt's deltas.
    turn_start_accumulated_text_len: usize,
    turn_start_accumulated_thinking_len: usize,
    turn_start_accumulated_tool_calls_len: usize,
    turn_start_accumulated_sequence_len: usize,
    turn_start_accumulated_thinking_signature: Option<String>,
}

impl TurnContentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_turn(&self) -> u32 {
        self.current_turn
    }

    pub fn pre_tool_content_flushed(&self) -> bool {
        self.pre_tool_content_flushed
    }

    /// `addTextDelta(s)` — appends to accumulated text and to the last
    /// sequence item if it is text, else pushes a new text item; mirrored
    /// into the per-turn view.
    pub fn add_text_delta(&mut self, s: &str) {
        self.accumulated_text.push_str(s);
        push_text(&mut self.accumulated_sequence, s);
        push_text(&mut self.this_turn_sequence, s);
    }

    /// `addThinkingDelta(s)` — appended to thinking buffers only; thinking
    /// never enters the sequence because it is prepended at flush time.
    pub fn add_thinking_delta(&mut self, s: &str) {
        self.accumulated_thinking.push_str(s);
        self.this_turn_thinking.push_str(s);
    }

    pub fn set_thinking_signature(&mut self, signature: impl Into<String>) {
        let sig = signature.into();
        self.accumulated_thinking_signature = Some(sig.clone());
        self.this_turn_thinking_signature = Some(sig);
    }

    /// `registerToolIntents` — called when the provider announces a batch of
    /// tool calls; creates `pending` entries and pushes `tool_ref` items to
    /// both sequences.
    pub fn register_tool_intents(&mut self, intents: Vec<ToolIntent>) {
        for intent in intents {
            let tc = ToolCall::pending(intent.id.clone(), intent.name, intent.args);
            self.accumulated_tool_calls.push(tc.clone());
            self.accumulated_sequence.push(ContentSequenceItem::ToolRef { tool_call_id: intent.id.clone() });
            self.this_turn_sequence.push(ContentSequenceItem::ToolRef { tool_call_id: intent.id.clone() });
            self.this_turn_tool_call_order.push(intent.id.clone());
            self.this_turn_tool_calls.insert(intent.id, tc);
        }
    }

    /// `startToolCall` — flips a pre-registered entry to `running`; for
    /// providers that don't batch-announce, registers it lazily.
    pub fn start_tool_call(&mut self, id: &str, name: &str, args: Value, ts: DateTime<Utc>) {
        if let Some(tc) = self.this_turn_tool_calls.get_mut(id) {
            tc.status = ToolCallStatus::Running;
            tc.started_at = Some(ts);
        } else {
            let mut tc = ToolCall::pending(id, name, args);
            tc.status = ToolCallStatus::Running;
            tc.started_at = Some(ts);
            self.this_turn_sequence.push(ContentSequenceItem::ToolRef { tool_call_id: id.to_string() });
            self.this_turn_tool_call_order.push(id.to_string());
            self.this_turn_tool_calls.insert(id.to_string(), tc.clone());
            self.accumulated_sequence.push(ContentSequenceItem::ToolRef { tool_call_id: id.to_string() });
            self.accumulated_tool_calls.push(tc);
        }
        if let Some(tc) = self.accumulated_tool_calls.iter_mut().find(|t| t.id == id) {
            tc.status = ToolCallStatus::Running;
            tc.started_at = Some(ts);
        }
    }

    /// `endToolCall` — flips status to `completed`/`error`, records the
    /// result.
    pub fn end_tool_call(&mut self, id: &str, result: impl Into<String>, is_error: bool, ts: DateTime<Utc>) {
        let result = result.into();
        let status = if is_error { ToolCallStatus::Error } else { ToolCallStatus::Completed };
        if let Some(tc) = self.this_turn_tool_calls.get_mut(id) {
            tc.status = status;
            tc.result = Some(result.clone());
            tc.completed_at = Some(ts);
        }
        if let Some(tc) = self.accumulated_tool_calls.iter_mut().find(|t| t.id == id) {
            tc.status = status;
            tc.result = Some(result);
            tc.completed_at = Some(ts);
        }
    }

    pub fn tool_call(&self, id: &str) -> Option<&ToolCall> {
        self.this_turn_tool_calls.get(id)
    }

    /// Tool call ids registered so far this turn, in registration order —
    /// what the coordinator walks to append `tool.call` events and dispatch
    /// (§4.8 "tool dispatch preserves registration order").
    pub fn pending_tool_ids(&self) -> Vec<String> {
        self.this_turn_tool_call_order.clone()
    }

    /// `onTurnStart` — increments turn, clears per-turn buffers, and
    /// snapshots the accumulated view so a later retry of this same turn can
    /// roll back to it via `discardTurnAttempt`.
    pub fn on_turn_start(&mut self, turn: u32, started_at: DateTime<Utc>) {
        self.current_turn = turn;
        self.current_turn_start_time = Some(started_at);
        self.this_turn_sequence.clear();
        self.this_turn_tool_calls.clear();
        self.this_turn_tool_call_order.clear();
        self.this_turn_thinking.clear();
        self.this_turn_thinking_signature = None;
        self.pre_tool_content_flushed = false;

        self.turn_start_accumulated_text_len = self.accumulated_text.len();
        self.turn_start_accumulated_thinking_len = self.accumulated_thinking.len();
        self.turn_start_accumulated_tool_calls_len = self.accumulated_tool_calls.len();
        self.turn_start_accumulated_sequence_len = self.accumulated_sequence.len();
        self.turn_start_accumulated_thinking_signature = self.accumulated_thinking_signature.clone();
    }

    /// `discardTurnAttempt` — rewinds both the accumulated and per-turn
    /// views to how they stood right before the current turn's attempt
    /// began streaming, without advancing `current_turn`. Called before a
    /// provider retry so the replayed stream's deltas don't get appended on
    /// top of the failed attempt's (§4.8 provider retry).
    pub fn discard_turn_attempt(&mut self) {
        self.accumulated_text.truncate(self.turn_start_accumulated_text_len);
        self.accumulated_thinking.truncate(self.turn_start_accumulated_thinking_len);
        self.accumulated_tool_calls.truncate(self.turn_start_accumulated_tool_calls_len);
        self.accumulated_sequence.truncate(self.turn_start_accumulated_sequence_len);
        self.accumulated_thinking_signature = self.turn_start_accumulated_thinking_signature.clone();

        self.this_turn_sequence.clear();
        self.this_turn_tool_calls.clear();
        self.this_turn_tool_call_order.clear();
        self.this_turn_thinking.clear();
        self.this_turn_thinking_signature = None;
    }

    /// `onTurnEnd` — returns the per-turn content for packaging into a
    /// `message.assistant` event, then clears per-turn buffers. Returns
    /// `None` if a pre-tool flush already emitted everything this turn had.
    pub fn on_turn_end(&mut self) -> Option<Vec<ContentBlock>> {
        let blocks = self.build_turn_blocks();
        self.this_turn_sequence.clear();
        self.this_turn_tool_calls.clear();
        self.this_turn_tool_call_order.clear();
        self.this_turn_thinking.clear();
        self.this_turn_thinking_signature = None;
        blocks
    }

    /// `onAgentStart` — resets in-flight state; callers that want to keep a
    /// token baseline across runs in the same session do so via the token
    /// tracker, which this call does not touch.
    pub fn on_agent_start(&mut self) {
        self.accumulated_text.clear();
        self.accumulated_thinking.clear();
        self.accumulated_thinking_signature = None;
        self.accumulated_tool_calls.clear();
        self.accumulated_sequence.clear();
        self.this_turn_sequence.clear();
        self.this_turn_tool_calls.clear();
        self.this_turn_tool_call_order.clear();
        self.this_turn_thinking.clear();
        self.this_turn_thinking_signature = None;
        self.current_turn = 0;
        self.current_turn_start_time = None;
        self.pre_tool_content_flushed = false;
    }

    /// `onAgentEnd` — clears everything.
    pub fn on_agent_end(&mut self) {
        *self = Self::default();
    }

    /// `flushPreToolContent` (§4.6, the critical algorithm). The first call
    /// to `startToolCall` in a turn should trigger this; it returns the
    /// blocks that must appear in the turn's `message.assistant` event
    /// *before* any `tool.call` event is appended.
    pub fn flush_pre_tool_content(&mut self) -> Option<Vec<ContentBlock>> {
        let blocks = self.build_turn_blocks();
        self.pre_tool_content_flushed = true;
        blocks
    }

    fn build_turn_blocks(&self) -> Option<Vec<ContentBlock>> {
        let mut blocks = Vec::new();
        if !self.this_turn_thinking.is_empty() {
            blocks.push(ContentBlock::Thinking {
                text: self.this_turn_thinking.clone(),
                signature: self.this_turn_thinking_signature.clone(),
            });
        }
        for item in &self.this_turn_sequence {
            match item {
                ContentSequenceItem::Text { text } => blocks.push(ContentBlock::Text { text: text.clone() }),
                ContentSequenceItem::ToolRef { tool_call_id } => {
                    if let Some(tc) = self.this_turn_tool_calls.get(tool_call_id) {
                        blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.arguments.clone(),
                        });
                    }
                }
            }
        }
        if blocks.is_empty() {
            None
        } else {
            Some(blocks)
        }
    }

    /// `buildInterruptedContent` — constructs, from the accumulated view,
    /// the assistant-content block list and a parallel list of synthetic
    /// `tool_result` blocks (one per tool call that had started, with
    /// `isError=true` and content `"[Interrupted]"` for any that did not
    /// complete).
    pub fn build_interrupted_content(&self) -> InterruptedContent {
        let mut assistant_blocks = Vec::new();
        if !self.accumulated_thinking.is_empty() {
            assistant_blocks.push(ContentBlock::Thinking {
                text: self.accumulated_thinking.clone(),
                signature: self.accumulated_thinking_signature.clone(),
            });
        }
        for item in &self.accumulated_sequence {
            match item {
                ContentSequenceItem::Text { text } => assistant_blocks.push(ContentBlock::Text { text: text.clone() }),
                ContentSequenceItem::ToolRef { tool_call_id } => {
                    if let Some(tc) = self.accumulated_tool_calls.iter().find(|t| &t.id == tool_call_id) {
                        assistant_blocks.push(ContentBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.arguments.clone(),
                        });
                    }
                }
            }
        }

        let tool_results = self
            .accumulated_tool_calls
            .iter()
            .filter(|tc| tc.status != ToolCallStatus::Completed && tc.status != ToolCallStatus::Error)
            .map(|tc| ContentBlock::ToolResult {
                tool_call_id: tc.id.clone(),
                content: "[Interrupted]".to_string(),
                is_error: true,
            })
            .collect();

        InterruptedContent { assistant_blocks, tool_results }
    }
}

fn push_text(sequence: &mut Vec<ContentSequenceItem>, s: &str) {
    match sequence.last_mut() {
        Some(ContentSequenceItem::Text { text }) => text.push_str(s),
        _ => sequence.push(ContentSequenceItem::Text { text: s.to_string() }),
    }
}
