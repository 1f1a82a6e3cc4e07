//! L7 Event Linearizer — serializes event emission for a session so
//! `parentId` chains stay linear even when multiple producers (the turn
//! loop, a hook callback, an interrupt handler) want to append concurrently
//! (§4.7).

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;
use turnkeep_core::{Event, EventPayload, Result, SessionId};
use turnkeep_store::EventLog;

/// Per-session single-writer queue, expressed as a sharded lock rather than
/// an explicit actor: at most one `append_linearized` call for a given
/// session is ever inside the critical section at a time, which gives the
/// same ordering guarantee as an actor mailbox.
pub struct EventLinearizer {
    log: Arc<EventLog>,
    locks: DashMap<SessionId, Arc<AsyncMutex<()>>>,
}

impl EventLinearizer {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log, locks: DashMap::new() }
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<AsyncMutex<()>> {
        self.locks.entry(session_id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Append one event, using the session's current head as `parentId`.
    /// `on_created` is awaited after the write commits but before the next
    /// queued append for this session is allowed to proceed — this is what
    /// lets a caller emit a persisted-event broadcast notification whose
    /// happens-after relation must precede the next event (§4.7, §4.10).
    pub async fn append_linearized<F, Fut>(&self, session_id: &SessionId, payload: EventPayload, on_created: F) -> Result<Event>
    where
        F: FnOnce(Event) -> Fut + Send,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;
        let event = self.log.append(session_id, payload, None)?;
        debug!(session = %session_id, event_id = %event.id, event_type = %event.event_type(), "appended linearized event");
        on_created(event.clone()).await;
        Ok(event)
    }

    /// Drop the per-session lock entry once a session is known to be ended,
    /// so the map does not grow unboundedly across a long-lived process.
    pub fn forget(&self, session_id: &SessionId) {
        self.locks.remove(session_id);
    }
}
