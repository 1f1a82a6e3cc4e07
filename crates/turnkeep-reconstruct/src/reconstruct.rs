//! L4 Message Reconstructor — collapses an ancestor chain of events into a
//! canonical ordered message list (§4.4).

use turnkeep_core::{ContentBlock, Event, EventId, EventPayload, Message};
use turnkeep_store::DagNavigator;

/// Diagnostic emitted when reconstruction cannot complete an alternation-valid
/// sequence (§4.4 failure semantics). Reconstruction still returns the
/// structurally-valid prefix; the caller decides whether to discard the tail
/// or raise.
#[derive(Clone, Debug, PartialEq)]
pub struct DanglingToolUse {
    pub tool_call_id: String,
}

/// The output of `messages_at` / `reconstruct`.
#[derive(Clone, Debug, Default)]
pub struct Reconstructed {
    pub messages: Vec<Message>,
    pub dangling: Option<DanglingToolUse>,
}

/// Walk `ancestors(id)` and reconstruct the canonical message list.
pub async fn messages_at(navigator: &DagNavigator<'_>, id: &EventId) -> turnkeep_core::Result<Reconstructed> {
    let chain = navigator.ancestors(id).await?;
    Ok(reconstruct(&chain))
}

/// Pure reconstruction over an already-fetched, oldest-first ancestor chain.
pub fn reconstruct(chain: &[Event]) -> Reconstructed {
    let mut messages: Vec<Message> = Vec::new();
    let mut event_index_by_id: Vec<(EventId, usize)> = Vec::new();
    let mut pending_tool_use_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut dangling: Option<DanglingToolUse> = None;

    for event in chain {
        match &event.payload {
            EventPayload::MessageUser { content } => {
                messages.push(Message::User { content: content.clone() });
                event_index_by_id.push((event.id.clone(), messages.len() - 1));
            }
            EventPayload::MessageAssistant { content, .. } => {
                for block in content {
                    if let ContentBlock::ToolUse { id, .. } = block {
                        pending_tool_use_ids.insert(id.clone());
                    }
                }
                messages.push(Message::Assistant { content: content.clone() });
                event_index_by_id.push((event.id.clone(), messages.len() - 1));
            }
            EventPayload::ToolCall { .. } => {
                // Rule 4: contributes nothing directly; the tool_use block is
                // already inside the preceding assistant message.
            }
            EventPayload::ToolResult { tool_call_id, content, is_error } => {
                pending_tool_use_ids.remove(tool_call_id);
                let block = ContentBlock::ToolResult {
                    tool_call_id: tool_call_id.clone(),
                    content: content.clone(),
                    is_error: *is_error,
                };
                // Rule 5: merge consecutive tool.result events with no
                // intervening assistant message into one synthetic user message.
                if let Some(Message::User { content }) = messages.last_mut() {
                    if content.iter().all(ContentBlock::is_tool_result) {
                        content.push(block);
                        continue;
                    }
                }
                messages.push(Message::User { content: vec![block] });
                event_index_by_id.push((event.id.clone(), messages.len() - 1));
            }
            EventPayload::MessageDeleted { target } => {
                // Rule 6: remove a previously emitted message by event id; if
                // the target hasn't been emitted yet, ignore.
                if let Some(pos) = event_index_by_id.iter().position(|(id, _)| id == target) {
                    let (_, idx) = event_index_by_id.remove(pos);
                    messages.remove(idx);
                    for (_, existing_idx) in event_index_by_id.iter_mut() {
                        if *existing_idx > idx {
                            *existing_idx -= 1;
                        }
                    }
                }
            }
            EventPayload::CompactBoundary { summary, .. } => {
                // Rule 7: replace all prior contributions with one synthetic
                // user message holding the summary.
                messages.clear();
                event_index_by_id.clear();
                pending_tool_use_ids.clear();
                messages.push(Message::user_text(summary.clone()));
            }
            EventPayload::ContextCleared {} => {
                // Rule 8: drop all prior contributions, no replacement.
                messages.clear();
                event_index_by_id.clear();
                pending_tool_use_ids.clear();
            }
            _ => {
                // All other event types are control-plane (rule 1).
            }
        }
    }

    if let Some(tool_call_id) = pending_tool_use_ids.into_iter().next() {
        dangling = Some(DanglingToolUse { tool_call_id });
    }

    Reconstructed { messages, dangling }
}
