//! L9 Fork/Rewind Engine — forks a session at an arbitrary ancestor event
//! without copying history; rewind is fork plus an optional old-session end.

use crate::registry::SessionRegistry;
use turnkeep_core::{EventId, ForkSessionOptions, Result, Session};

pub struct ForkEngine<'a> {
    registry: &'a SessionRegistry,
}

impl<'a> ForkEngine<'a> {
    pub fn new(registry: &'a SessionRegistry) -> Self {
        Self { registry }
    }

    /// Fork `parent` at `from_event`. Returns the new session and the
    /// `session.fork` root event whose `parent_id` crosses into the
    /// parent session's log.
    pub fn fork(&self, parent: &Session, from_event: &EventId, options: ForkSessionOptions) -> Result<(Session, EventId)> {
        let forked = self.registry.fork(parent, from_event, options)?;
        let root = forked.root_event_id.clone();
        Ok((forked, root))
    }

    /// Rewind is fork plus optionally ending the old session. The caller's
    /// own head pointer (e.g. a gateway session map) is never mutated by
    /// this engine — it only returns the new session so the caller can
    /// redirect if `redirect` semantics are desired on their side.
    pub fn rewind(
        &self,
        parent: &Session,
        from_event: &EventId,
        options: ForkSessionOptions,
        end_old: bool,
    ) -> Result<(Session, EventId)> {
        let (forked, root) = self.fork(parent, from_event, options)?;
        if end_old {
            self.registry.end(&parent.id)?;
        }
        Ok((forked, root))
    }
}
