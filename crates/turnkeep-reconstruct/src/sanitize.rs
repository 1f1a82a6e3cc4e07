//! L5 Message Sanitizer — closed-set repairs applied to a reconstructed
//! message list before it ships to a provider (§4.5).

use turnkeep_core::{ContentBlock, Message};

/// One applied repair, suitable for logging.
#[derive(Clone, Debug, PartialEq)]
pub struct Fix {
    pub kind: FixKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixKind {
    RemovedThinkingOnlyMessage,
    DroppedEmptyAssistantMessage,
    DanglingToolUse,
    OrphanToolResult,
    MergedAlternationViolation,
}

/// `sanitize(messages) -> (messages', fixes[])`. Idempotent: applying this to
/// its own output yields the same messages and no further fixes.
pub fn sanitize(messages: Vec<Message>) -> (Vec<Message>, Vec<Fix>) {
    let mut fixes = Vec::new();
    let mut messages = remove_unsigned_thinking_only(messages, &mut fixes);
    messages = drop_empty_assistant_messages(messages, &mut fixes);
    messages = drop_dangling_tool_use(messages, &mut fixes);
    messages = drop_orphan_tool_results(messages, &mut fixes);
    messages = merge_alternation_violations(messages, &mut fixes);
    (messages, fixes)
}

/// Rule 1: an assistant message whose every block is an unsigned `thinking`
/// block is removed; a signed thinking block is preserved.
fn remove_unsigned_thinking_only(messages: Vec<Message>, fixes: &mut Vec<Fix>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| {
            let Message::Assistant { content } = m else { return true };
            let all_unsigned_thinking = !content.is_empty()
                && content.iter().all(|b| matches!(b, ContentBlock::Thinking { signature: None, .. }));
            if all_unsigned_thinking {
                fixes.push(Fix {
                    kind: FixKind::RemovedThinkingOnlyMessage,
                    detail: "removed_thinking_only_message".into(),
                });
            }
            !all_unsigned_thinking
        })
        .collect()
}

/// Rule 2: drop assistant messages left empty by rule 1 (or otherwise empty).
fn drop_empty_assistant_messages(messages: Vec<Message>, fixes: &mut Vec<Fix>) -> Vec<Message> {
    messages
        .into_iter()
        .filter(|m| {
            let Message::Assistant { content } = m else { return true };
            let empty = content.is_empty();
            if empty {
                fixes.push(Fix { kind: FixKind::DroppedEmptyAssistantMessage, detail: "dropped_empty_assistant_message".into() });
            }
            !empty
        })
        .collect()
}

/// Rule 3: strip `tool_use` blocks whose id never appears in a later
/// `tool_result`; drop the message if stripping empties it.
fn drop_dangling_tool_use(messages: Vec<Message>, fixes: &mut Vec<Fix>) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    for (i, message) in messages.iter().enumerate() {
        let Message::Assistant { content } = message else {
            out.push(message.clone());
            continue;
        };

        let later_tool_result_ids: std::collections::HashSet<&str> = messages[i + 1..]
            .iter()
            .flat_map(|m| m.content().iter().filter_map(ContentBlock::tool_result_id))
            .collect();

        let mut stripped_any = false;
        let kept: Vec<ContentBlock> = content
            .iter()
            .filter(|b| match b.tool_use_id() {
                Some(id) if !later_tool_result_ids.contains(id) => {
                    stripped_any = true;
                    false
                }
                _ => true,
            })
            .cloned()
            .collect();

        if stripped_any {
            fixes.push(Fix { kind: FixKind::DanglingToolUse, detail: "dangling_tool_use".into() });
        }
        if kept.is_empty() && stripped_any {
            continue;
        }
        out.push(Message::Assistant { content: kept });
    }
    out
}

/// Rule 4: drop a synthetic user message whose `tool_result` ids never
/// appeared in a preceding assistant `tool_use`.
fn drop_orphan_tool_results(messages: Vec<Message>, fixes: &mut Vec<Fix>) -> Vec<Message> {
    let mut out = Vec::with_capacity(messages.len());
    let mut seen_tool_use_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

    for message in messages {
        if message.is_assistant() {
            for id in message.tool_use_ids() {
                seen_tool_use_ids.insert(id.to_string());
            }
            out.push(message);
            continue;
        }

        if message.is_tool_result_only() {
            let all_orphan = message
                .content()
                .iter()
                .filter_map(ContentBlock::tool_result_id)
                .all(|id| !seen_tool_use_ids.contains(id));
            if all_orphan {
                fixes.push(Fix { kind: FixKind::OrphanToolResult, detail: "orphan_tool_result".into() });
                continue;
            }
        }
        out.push(message);
    }
    out
}

/// Rule 5: merge consecutive same-role messages (excluding synthetic
/// tool-result-only users, which only merge with each other via L4 rule 5
/// already) — assistant blocks are appended; user text is newline-joined.
fn merge_alternation_violations(messages: Vec<Message>, fixes: &mut Vec<Fix>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for message in messages {
        let merged = match (out.last_mut(), &message) {
            (Some(Message::Assistant { content: prev }), Message::Assistant { content: next }) => {
                prev.extend(next.clone());
                true
            }
            (Some(Message::User { content: prev }), Message::User { content: next })
                if !is_tool_result_only(prev) && !is_tool_result_only(next) =>
            {
                let prev_text = blocks_to_text(prev);
                let next_text = blocks_to_text(next);
                *prev = vec![ContentBlock::Text { text: format!("{prev_text}\n{next_text}") }];
                true
            }
            _ => false,
        };
        if merged {
            fixes.push(Fix { kind: FixKind::MergedAlternationViolation, detail: "merged_alternation_violation".into() });
        } else {
            out.push(message);
        }
    }
    out
}

fn is_tool_result_only(content: &[ContentBlock]) -> bool {
    !content.is_empty() && content.iter().all(ContentBlock::is_tool_result)
}

fn blocks_to_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}
