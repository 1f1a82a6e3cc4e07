//! Integration tests for turnkeep-store: EventLog, SessionRegistry, DagNavigator, ForkEngine.

use turnkeep_core::{ContentBlock, CreateSessionOptions, Error, EventPayload, ForkSessionOptions};
use turnkeep_store::{DagNavigator, Db, EventLog, ForkEngine, SearchFilter, SessionRegistry};

fn harness() -> (EventLog, SessionRegistry) {
    let db = Db::open_in_memory().unwrap();
    (EventLog::new(db.clone()), SessionRegistry::new(db))
}

// ===========================================================================
// Event Log append / atomicity
// ===========================================================================

#[test]
fn append_chain_produces_strictly_linear_parent_links() {
    let (log, registry) = harness();
    let session = registry
        .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
        .unwrap();

    let mut prev = session.root_event_id.clone();
    for i in 0..5 {
        let event = log
            .append(&session.id, EventPayload::MessageUser { content: vec![ContentBlock::Text { text: format!("msg {i}") }] }, None)
            .unwrap();
        assert_eq!(event.parent_id, Some(prev.clone()));
        prev = event.id;
    }

    let reloaded = registry.get(&session.id).unwrap();
    assert_eq!(reloaded.head_event_id, prev);
}

#[test]
fn appending_to_nonexistent_session_errors() {
    let (log, _registry) = harness();
    let result = log.append(
        &turnkeep_core::SessionId::new("ghost"),
        EventPayload::ContextCleared {},
        None,
    );
    assert!(matches!(result, Err(Error::SessionNotFound(_))));
}

// ===========================================================================
// Search
// ===========================================================================

#[test]
fn search_filters_by_session_and_reports_existence_not_ranking() {
    let (log, registry) = harness();
    let a = registry
        .create(CreateSessionOptions { working_directory: "/tmp/a".into(), model: "default-model".into() })
        .unwrap();
    let b = registry
        .create(CreateSessionOptions { working_directory: "/tmp/b".into(), model: "default-model".into() })
        .unwrap();

    log.append(&a.id, EventPayload::MessageUser { content: vec![ContentBlock::Text { text: "find the widget".into() }] }, None).unwrap();
    log.append(&b.id, EventPayload::MessageUser { content: vec![ContentBlock::Text { text: "find the widget".into() }] }, None).unwrap();

    let found = log.search("widget", SearchFilter { session_id: Some(a.id.clone()), ..Default::default() }).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].session_id, a.id);
}

// ===========================================================================
// S4 — Deep fork chain (10 levels)
// ===========================================================================

#[tokio::test]
async fn s4_deep_fork_chain_ten_levels() {
    let (log, registry) = harness();
    let engine = ForkEngine::new(&registry);

    let mut session = registry
        .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
        .unwrap();
    let mut seen_session_ids = vec![session.id.clone()];

    let first = log
        .append(&session.id, EventPayload::MessageUser { content: vec![ContentBlock::Text { text: "Level 0".into() }] }, None)
        .unwrap();
    let mut head = first.id.clone();

    for level in 1..10 {
        let (forked, root) = engine.fork(&session, &head, ForkSessionOptions::default()).unwrap();
        assert!(!seen_session_ids.contains(&forked.id));
        seen_session_ids.push(forked.id.clone());

        let event = log
            .append(&forked.id, EventPayload::MessageUser { content: vec![ContentBlock::Text { text: format!("Level {level}") }] }, None)
            .unwrap();

        assert_eq!(root.clone(), forked.root_event_id);
        session = forked;
        head = event.id;
    }

    assert_eq!(seen_session_ids.len(), 10);

    let nav = DagNavigator::new(&log);
    let chain = nav.ancestors(&head).await.unwrap();
    // 10 user messages plus the 9 session.fork root events on top of level 0's session.start.
    let user_texts: Vec<_> = chain
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::MessageUser { content } => content.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            }),
            _ => None,
        })
        .collect();
    assert_eq!(user_texts, (0..10).map(|i| format!("Level {i}")).collect::<Vec<_>>());
}

// ===========================================================================
// Rewind
// ===========================================================================

#[test]
fn rewind_ends_old_session_when_requested() {
    let (log, registry) = harness();
    let session = registry
        .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
        .unwrap();
    let event = log.append(&session.id, EventPayload::ContextCleared {}, None).unwrap();

    let engine = ForkEngine::new(&registry);
    let (rewound, _root) = engine.rewind(&session, &event.id, ForkSessionOptions::default(), true).unwrap();

    assert!(registry.get(&session.id).unwrap().is_ended());
    assert!(!registry.get(&rewound.id).unwrap().is_ended());
}
