use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use turnkeep_core::{ContentBlock, CreateSessionOptions, EventPayload, EventType};
use turnkeep_llm::mock::{MockProvider, ScriptedTurn};
use turnkeep_llm::{RawTokenUsage, StopReason, StreamDelta, ToolCallIntent};
use turnkeep_reconstruct::{messages_at, sanitize};
use turnkeep_runtime::{AgentRunCoordinator, BroadcastBus, CoordinatorConfig, RunOutcome, SubscriptionFilter};
use turnkeep_store::{Db, DagNavigator, EventLog, SessionRegistry};
use turnkeep_tools::{Tool, ToolRegistry, ToolResult};
use turnkeep_turn::EventLinearizer;

struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }
    fn description(&self) -> &str {
        "reads a file"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    fn is_read_only(&self) -> bool {
        true
    }
    async fn execute(&self, _args: serde_json::Value) -> ToolResult {
        ToolResult::text("FILE")
    }
}

/// A tool whose `execute` never resolves on its own — used to force
/// cancellation to be the only way a dispatched call can end, so an
/// interrupt-mid-tool test is deterministic rather than racy.
struct BlockingTool;

#[async_trait]
impl Tool for BlockingTool {
    fn name(&self) -> &str {
        "Block"
    }
    fn description(&self) -> &str {
        "never returns on its own"
    }
    fn input_schema(&self) -> serde_json::Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _args: serde_json::Value) -> ToolResult {
        futures::future::pending::<()>().await;
        unreachable!()
    }
}

fn harness(provider: MockProvider, tools: ToolRegistry) -> (Arc<AgentRunCoordinator>, Arc<EventLog>, Arc<SessionRegistry>, turnkeep_core::Session, Arc<BroadcastBus>) {
    let db = Db::open_in_memory().unwrap();
    let log = Arc::new(EventLog::new(db.clone()));
    let registry = Arc::new(SessionRegistry::new(db));
    let session = registry.create(CreateSessionOptions { working_directory: "/tmp".into(), model: "m".into() }).unwrap();
    let linearizer = Arc::new(EventLinearizer::new(log.clone()));
    let bus = Arc::new(BroadcastBus::new());
    let coordinator = Arc::new(AgentRunCoordinator::new(
        log.clone(),
        registry.clone(),
        linearizer,
        Arc::new(provider),
        Arc::new(tools),
        bus.clone(),
        CoordinatorConfig::default(),
    ));
    (coordinator, log, registry, session, bus)
}

fn response_complete(stop_reason: StopReason) -> StreamDelta {
    StreamDelta::ResponseComplete {
        token_usage: RawTokenUsage { input_tokens: 10, output_tokens: 5, ..Default::default() },
        stop_reason,
    }
}

#[tokio::test]
async fn s1_basic_turn_with_one_tool_call() {
    let turn1 = ScriptedTurn {
        deltas: vec![
            StreamDelta::TextDelta { text: "Reading...".into() },
            StreamDelta::ToolUseBatch { calls: vec![ToolCallIntent { id: "tc_1".into(), name: "Read".into(), args: json!({"file_path": "test.ts"}) }] },
            response_complete(StopReason::ToolUse),
        ],
    };
    let turn2 = ScriptedTurn::text("Done reading.");
    let mut tools = ToolRegistry::new();
    tools.register(ReadTool);
    let (coordinator, log, registry, session, _bus) = harness(MockProvider::new(vec![turn1, turn2]), tools);

    let outcome = coordinator.run(&session.id, vec![ContentBlock::Text { text: "Read test.ts".into() }]).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { turns: 2 });

    let head = registry.get(&session.id).unwrap().head_event_id;
    let nav = DagNavigator::new(&log);
    let reconstructed = messages_at(&nav, &head).await.unwrap();
    assert!(reconstructed.dangling.is_none());
    let (messages, _fixes) = sanitize(reconstructed.messages);

    assert_eq!(messages.len(), 4);
    assert!(messages[0].is_user());
    assert!(messages[1].is_assistant());
    assert_eq!(messages[1].content().len(), 2);
    assert!(messages[2].is_tool_result_only());
    match &messages[2].content()[0] {
        ContentBlock::ToolResult { tool_call_id, content, is_error } => {
            assert_eq!(tool_call_id, "tc_1");
            assert_eq!(content, "FILE");
            assert!(!is_error);
        }
        _ => panic!("expected tool_result"),
    }
    assert!(messages[3].is_assistant());
}

#[tokio::test]
async fn s3_parallel_tool_calls_preserve_id_order_on_the_chain_and_in_reconstruction() {
    let turn1 = ScriptedTurn {
        deltas: vec![
            StreamDelta::ToolUseBatch {
                calls: vec![
                    ToolCallIntent { id: "tc_1".into(), name: "Read".into(), args: json!({}) },
                    ToolCallIntent { id: "tc_2".into(), name: "Read".into(), args: json!({}) },
                    ToolCallIntent { id: "tc_3".into(), name: "Read".into(), args: json!({}) },
                ],
            },
            response_complete(StopReason::ToolUse),
        ],
    };
    let turn2 = ScriptedTurn::text("all done");
    let mut tools = ToolRegistry::new();
    tools.register(ReadTool);
    let (coordinator, log, registry, session, _bus) = harness(MockProvider::new(vec![turn1, turn2]), tools);

    coordinator.run(&session.id, vec![ContentBlock::Text { text: "go".into() }]).await.unwrap();

    let events = log.get_by_session(&session.id).unwrap();
    let calls: Vec<_> = events
        .iter()
        .filter(|e| e.event_type() == EventType::ToolCall)
        .map(|e| match &e.payload {
            EventPayload::ToolCall { tool_call_id, .. } => tool_call_id.clone(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(calls, vec!["tc_1", "tc_2", "tc_3"]);

    let results: Vec<_> = events
        .iter()
        .filter(|e| e.event_type() == EventType::ToolResult)
        .map(|e| match &e.payload {
            EventPayload::ToolResult { tool_call_id, .. } => tool_call_id.clone(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(results, vec!["tc_1", "tc_2", "tc_3"]);

    let head = registry.get(&session.id).unwrap().head_event_id;
    let nav = DagNavigator::new(&log);
    let reconstructed = messages_at(&nav, &head).await.unwrap();
    let (messages, _) = sanitize(reconstructed.messages);
    assert_eq!(messages[1].tool_use_ids(), vec!["tc_1", "tc_2", "tc_3"]);
    assert_eq!(messages[2].content().len(), 3);
}

#[tokio::test]
async fn s5_cancellation_mid_tool_persists_interrupted_result_and_closes_the_turn() {
    let turn1 = ScriptedTurn {
        deltas: vec![StreamDelta::ToolUseBatch { calls: vec![ToolCallIntent { id: "tc_x".into(), name: "Block".into(), args: json!({}) }] }, response_complete(StopReason::ToolUse)],
    };
    let mut tools = ToolRegistry::new();
    tools.register(BlockingTool);
    let (coordinator, log, registry, session, _bus) = harness(MockProvider::new(vec![turn1]), tools);

    let coordinator2 = coordinator.clone();
    let session_id = session.id.clone();
    let run_handle = tokio::spawn(async move { coordinator2.run(&session_id, vec![ContentBlock::Text { text: "go".into() }]).await });

    // Give the coordinator enough time to flush pre-tool content, append
    // tool.call, and start dispatching before we interrupt it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    coordinator.cancel(&session.id);

    let outcome = run_handle.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Cancelled);

    let events = log.get_by_session(&session.id).unwrap();
    let tail_types: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert!(tail_types.contains(&EventType::MessageAssistant));
    assert!(tail_types.contains(&EventType::ToolCall));
    assert_eq!(tail_types.last(), Some(&EventType::StreamTurnEnd));

    let tool_result = events
        .iter()
        .find(|e| e.event_type() == EventType::ToolResult)
        .expect("tool.result for tc_x");
    match &tool_result.payload {
        EventPayload::ToolResult { tool_call_id, content, is_error } => {
            assert_eq!(tool_call_id, "tc_x");
            assert_eq!(content, "[Interrupted]");
            assert!(is_error);
        }
        _ => unreachable!(),
    }

    let turn_end = events.iter().find(|e| e.event_type() == EventType::StreamTurnEnd).unwrap();
    match &turn_end.payload {
        EventPayload::StreamTurnEnd { interrupted, .. } => assert!(interrupted),
        _ => unreachable!(),
    }

    let head = registry.get(&session.id).unwrap().head_event_id;
    let nav = DagNavigator::new(&log);
    let reconstructed = messages_at(&nav, &head).await.unwrap();
    assert!(reconstructed.dangling.is_none());
    let (messages, _fixes) = sanitize(reconstructed.messages);
    for pair in messages.windows(2) {
        assert_ne!(pair[0].is_user(), pair[1].is_user());
    }
}

#[tokio::test]
async fn busy_run_is_rejected_unless_queued() {
    let turn1 = ScriptedTurn {
        deltas: vec![StreamDelta::ToolUseBatch { calls: vec![ToolCallIntent { id: "tc_x".into(), name: "Block".into(), args: json!({}) }] }, response_complete(StopReason::ToolUse)],
    };
    let mut tools = ToolRegistry::new();
    tools.register(BlockingTool);
    let (coordinator, _log, _registry, session, _bus) = harness(MockProvider::new(vec![turn1]), tools);

    let coordinator2 = coordinator.clone();
    let session_id = session.id.clone();
    let run_handle = tokio::spawn(async move { coordinator2.run(&session_id, vec![ContentBlock::Text { text: "go".into() }]).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(coordinator.is_busy(&session.id));
    let rejected = coordinator.run(&session.id, vec![ContentBlock::Text { text: "interrupting".into() }]).await;
    assert!(matches!(rejected, Err(turnkeep_core::Error::Busy(_))));

    coordinator.cancel(&session.id);
    run_handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn retryable_provider_error_does_not_duplicate_the_failed_attempts_text() {
    let failed_attempt = ScriptedTurn {
        deltas: vec![
            StreamDelta::TextDelta { text: "Partial reply before the error.".into() },
            StreamDelta::ProviderError { retryable: true, retry_after_ms: None, message: "overloaded".into() },
        ],
    };
    let retried_attempt = ScriptedTurn::text("Final reply.");
    let (coordinator, log, registry, session, _bus) = harness(MockProvider::new(vec![failed_attempt, retried_attempt]), ToolRegistry::new());

    let outcome = coordinator.run(&session.id, vec![ContentBlock::Text { text: "hello".into() }]).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed { turns: 1 });

    let head = registry.get(&session.id).unwrap().head_event_id;
    let nav = DagNavigator::new(&log);
    let reconstructed = messages_at(&nav, &head).await.unwrap();
    let (messages, _fixes) = sanitize(reconstructed.messages);

    assert_eq!(messages.len(), 2);
    assert!(messages[1].is_assistant());
    assert_eq!(messages[1].content().to_vec(), vec![ContentBlock::Text { text: "Final reply.".into() }]);

    let error_events = log.get_by_session(&session.id).unwrap().into_iter().filter(|e| e.event_type() == EventType::ErrorProvider).count();
    assert_eq!(error_events, 1);
}

#[tokio::test]
async fn subscribers_receive_persisted_notifications_for_a_completed_run() {
    let turn = ScriptedTurn::text("hi there");
    let (coordinator, _log, _registry, session, bus) = harness(MockProvider::new(vec![turn]), ToolRegistry::new());
    let mut sub = bus.subscribe(SubscriptionFilter::All);

    coordinator.run(&session.id, vec![ContentBlock::Text { text: "hello".into() }]).await.unwrap();

    // The coordinator's own append path must have published one persisted
    // notification per committed event, in commit order, after the run
    // completes (§4.10) — not merely after the bus API is exercised standalone.
    let mut seen = Vec::new();
    while let Ok(notification) = sub.persisted.try_recv() {
        seen.push(notification.event.event_type());
    }
    assert_eq!(
        seen,
        vec![EventType::MessageUser, EventType::StreamTurnStart, EventType::MessageAssistant, EventType::StreamTurnEnd]
    );
}
