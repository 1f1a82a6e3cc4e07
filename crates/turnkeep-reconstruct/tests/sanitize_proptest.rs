//! Property tests for the two universal invariants spec §8 calls out by
//! name for the sanitizer: idempotence, and alternation-or-empty on the
//! output regardless of how tangled the input chain was.

use proptest::prelude::*;
use turnkeep_core::{ContentBlock, Message};
use turnkeep_reconstruct::sanitize;

fn arb_content_block() -> impl Strategy<Value = ContentBlock> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(|text| ContentBlock::Text { text }),
        ("[a-z ]{0,12}", proptest::option::of(any::<bool>()))
            .prop_map(|(text, signed)| ContentBlock::Thinking { text, signature: signed.map(|_| "sig".to_string()) }),
        "tc_[0-9]{1,2}".prop_map(|id| ContentBlock::ToolUse { id, name: "Read".into(), input: serde_json::json!({}) }),
        ("tc_[0-9]{1,2}", any::<bool>())
            .prop_map(|(tool_call_id, is_error)| ContentBlock::ToolResult { tool_call_id, content: "r".into(), is_error }),
    ]
}

fn arb_message() -> impl Strategy<Value = Message> {
    (any::<bool>(), proptest::collection::vec(arb_content_block(), 0..4)).prop_map(|(is_user, content)| {
        if is_user {
            Message::User { content }
        } else {
            Message::Assistant { content }
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Sanitizing an already-sanitized chain must be a no-op fixed point —
    /// the 5 rules only ever remove or merge, never add back what they just
    /// took out (spec §4.5, §8's sanitize-idempotence invariant).
    #[test]
    fn sanitize_is_idempotent(messages in proptest::collection::vec(arb_message(), 0..12)) {
        let (once, _fixes) = sanitize(messages);
        let (twice, fixes_on_already_clean) = sanitize(once.clone());
        prop_assert_eq!(once, twice);
        prop_assert!(fixes_on_already_clean.is_empty());
    }

    /// Rule 5 merges every consecutive same-role pair except two synthetic
    /// tool-result-only user messages back to back — those are only ever
    /// produced pre-merged by the reconstructor (L4 rule 5), so the
    /// sanitizer leaves them as-is rather than text-joining tool results
    /// (spec §4.5 rule order, §8 alternation invariant).
    #[test]
    fn sanitized_output_has_no_mergeable_same_role_pair(messages in proptest::collection::vec(arb_message(), 0..12)) {
        let (sanitized, _fixes) = sanitize(messages);
        for pair in sanitized.windows(2) {
            let same_role = pair[0].is_user() == pair[1].is_user();
            if same_role {
                prop_assert!(pair[0].is_user() && pair[0].is_tool_result_only() && pair[1].is_tool_result_only());
            }
        }
    }
}
