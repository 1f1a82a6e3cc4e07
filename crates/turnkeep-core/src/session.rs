//! The session metadata row (§3 "Session").

use crate::ids::{EventId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A session's metadata. Never mutated except to advance `head_event_id`
/// and to set `ended_at` — the root event id is immutable for the session's
/// lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub root_event_id: EventId,
    pub head_event_id: EventId,
    pub working_directory: String,
    pub current_model: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub parent_session_id: Option<SessionId>,
    pub fork_name: Option<String>,
}

impl Session {
    pub fn is_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn is_fork(&self) -> bool {
        self.parent_session_id.is_some()
    }
}

/// Options accepted when creating a brand-new (non-forked) session.
#[derive(Clone, Debug, Default)]
pub struct CreateSessionOptions {
    pub working_directory: String,
    pub model: String,
}

/// Options accepted when forking a session from an existing event.
#[derive(Clone, Debug, Default)]
pub struct ForkSessionOptions {
    pub name: Option<String>,
    pub working_directory: Option<String>,
    pub model: Option<String>,
}
