//! L10 Broadcast Bus — fan-out of streaming deltas and persisted-event
//! notifications to subscribers (§4.10).
//!
//! Two independent channels, two independent backpressure policies:
//! - the streaming-delta channel is a `tokio::sync::broadcast`, whose native
//!   lagging behavior *is* drop-oldest for a slow subscriber;
//! - the persisted-event channel is a per-subscriber bounded `mpsc`, so a
//!   full queue blocks the sender (block-or-disconnect) rather than losing
//!   a durable notification.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, mpsc};
use turnkeep_core::{Event, SessionId};

const DELTA_CHANNEL_CAPACITY: usize = 1024;
const PERSISTED_CHANNEL_CAPACITY: usize = 256;

/// The closed set of streaming delta notifications (§4.10).
#[derive(Clone, Debug)]
pub enum DeltaEvent {
    TextDelta { session_id: SessionId, text: String },
    ThinkingDelta { session_id: SessionId, text: String },
    ToolStart { session_id: SessionId, id: String, name: String },
    ToolEnd { session_id: SessionId, id: String },
    TurnStart { session_id: SessionId, turn: u32 },
    TurnEnd { session_id: SessionId, turn: u32 },
    Compaction { session_id: SessionId },
    SkillRemoved { session_id: SessionId, name: String },
    BrowserFrame { session_id: SessionId },
    TodosUpdated { session_id: SessionId },
}

impl DeltaEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            DeltaEvent::TextDelta { session_id, .. }
            | DeltaEvent::ThinkingDelta { session_id, .. }
            | DeltaEvent::ToolStart { session_id, .. }
            | DeltaEvent::ToolEnd { session_id, .. }
            | DeltaEvent::TurnStart { session_id, .. }
            | DeltaEvent::TurnEnd { session_id, .. }
            | DeltaEvent::Compaction { session_id }
            | DeltaEvent::SkillRemoved { session_id, .. }
            | DeltaEvent::BrowserFrame { session_id }
            | DeltaEvent::TodosUpdated { session_id } => session_id,
        }
    }
}

/// A persisted-event notification, always emitted strictly after the
/// append it describes has committed.
#[derive(Clone, Debug)]
pub struct PersistedNotification {
    pub event: Event,
}

/// What a subscriber wants to hear about.
#[derive(Clone, Debug)]
pub enum SubscriptionFilter {
    All,
    Sessions(std::collections::HashSet<SessionId>),
}

impl SubscriptionFilter {
    fn matches(&self, session_id: &SessionId) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Sessions(set) => set.contains(session_id),
        }
    }
}

pub struct Subscription {
    pub id: u64,
    pub deltas: broadcast::Receiver<DeltaEvent>,
    pub persisted: mpsc::Receiver<PersistedNotification>,
    filter: SubscriptionFilter,
}

impl Subscription {
    /// Apply this subscription's filter to a raw delta received off the
    /// shared broadcast channel. Deltas for sessions outside the filter
    /// should be discarded by the caller, not treated as a miss.
    pub fn wants(&self, delta: &DeltaEvent) -> bool {
        self.filter.matches(delta.session_id())
    }
}

struct PersistedSubscriber {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<PersistedNotification>,
}

pub struct BroadcastBus {
    delta_tx: broadcast::Sender<DeltaEvent>,
    persisted_subscribers: DashMap<u64, PersistedSubscriber>,
    next_id: AtomicU64,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastBus {
    pub fn new() -> Self {
        let (delta_tx, _) = broadcast::channel(DELTA_CHANNEL_CAPACITY);
        Self { delta_tx, persisted_subscribers: DashMap::new(), next_id: AtomicU64::new(0) }
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (persisted_tx, persisted_rx) = mpsc::channel(PERSISTED_CHANNEL_CAPACITY);
        self.persisted_subscribers.insert(id, PersistedSubscriber { filter: filter.clone(), tx: persisted_tx });
        Subscription { id, deltas: self.delta_tx.subscribe(), persisted: persisted_rx, filter }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.persisted_subscribers.remove(&id);
    }

    /// Publish a streaming delta. Best-effort, arrival order; a lagging
    /// subscriber silently drops the oldest unread deltas (broadcast's
    /// native behavior) rather than blocking the producer.
    pub fn publish_delta(&self, delta: DeltaEvent) {
        let _ = self.delta_tx.send(delta);
    }

    /// Publish a persisted-event notification, called strictly after the
    /// append that produced `event` has committed. Delivered in commit
    /// order per session because the coordinator's per-session linearizer
    /// (L7) guarantees appends — and therefore these calls — are themselves
    /// strictly ordered. Slow subscribers block this call (their mpsc
    /// queue is bounded) rather than dropping a durable notification; a
    /// subscriber whose receiver was dropped is pruned.
    pub async fn publish_persisted(&self, event: Event) {
        let mut dead = Vec::new();
        // Snapshot subscribers so we don't hold a DashMap guard across awaits.
        let targets: Vec<(u64, mpsc::Sender<PersistedNotification>)> = self
            .persisted_subscribers
            .iter()
            .filter(|entry| entry.value().filter.matches(&event.session_id))
            .map(|entry| (*entry.key(), entry.value().tx.clone()))
            .collect();

        for (id, tx) in targets {
            if tx.send(PersistedNotification { event: event.clone() }).await.is_err() {
                dead.push(id);
            }
        }
        for id in dead {
            self.persisted_subscribers.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.persisted_subscribers.len()
    }
}
