//! L3 DAG Navigator — ancestor/descendant/branch traversal over the event log.

use crate::log::EventLog;
use std::collections::VecDeque;
use turnkeep_core::{Event, EventId, Result};

const YIELD_EVERY: usize = 256;

pub struct DagNavigator<'a> {
    log: &'a EventLog,
}

impl<'a> DagNavigator<'a> {
    pub fn new(log: &'a EventLog) -> Self {
        Self { log }
    }

    /// The chain from `id` back to its session root, inclusive, oldest first.
    /// Bounded by chain length; chunks every `YIELD_EVERY` hops so a long
    /// walk cannot starve the executor.
    pub async fn ancestors(&self, id: &EventId) -> Result<Vec<Event>> {
        let mut chain = Vec::new();
        let mut current = self.log.get(id)?;
        let mut hops = 0usize;
        loop {
            let parent_id = current.parent_id.clone();
            chain.push(current);
            let Some(parent_id) = parent_id else { break };
            current = self.log.get(&parent_id)?;
            hops += 1;
            if hops % YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Breadth-first walk of every descendant of `id` (not including `id`
    /// itself), in discovery order. Stays within `id`'s own session — a
    /// `session.fork` root in another session can share `parent_id` with an
    /// event here, but descendant walks never cross that boundary (§4.3).
    pub fn descendants(&self, id: &EventId) -> Result<Vec<Event>> {
        let session_id = self.log.get(id)?.session_id;
        let mut out = Vec::new();
        let mut queue: VecDeque<EventId> = VecDeque::new();
        queue.push_back(id.clone());

        while let Some(current) = queue.pop_front() {
            for child in self.log.get_children(&session_id, &current)? {
                queue.push_back(child.id.clone());
                out.push(child);
            }
        }
        Ok(out)
    }

    /// All events for the session, sequence-ordered — the "trunk" used when
    /// no forks are involved.
    pub fn branch(&self, session_id: &turnkeep_core::SessionId) -> Result<Vec<Event>> {
        self.log.get_by_session(session_id)
    }

    /// `branches(sessionId) -> { main, forks[] }` (§3 "DAG Navigator"):
    /// the session's own linear event chain plus, for every event that is
    /// also the fork point of another session, which session forked there.
    /// A session's own chain never branches internally — forking always
    /// creates a *new* session rooted at the crossing event — so branch
    /// points are found by asking the registry which sessions forked from
    /// this one and mapping each fork's root back to its parent event.
    pub fn branches(&self, registry: &crate::registry::SessionRegistry, session_id: &turnkeep_core::SessionId) -> Result<Branches> {
        let main = self.branch(session_id)?;
        let child_sessions = registry.list_forks_of(session_id)?;

        let mut points: std::collections::HashMap<EventId, Vec<turnkeep_core::SessionId>> = std::collections::HashMap::new();
        for child in &child_sessions {
            let root = self.log.get(&child.root_event_id)?;
            if let Some(parent_event_id) = root.parent_id {
                points.entry(parent_event_id).or_default().push(child.id.clone());
            }
        }

        let mut forks: Vec<BranchPoint> = points
            .into_iter()
            .map(|(event_id, forked_sessions)| BranchPoint { event_id, forked_sessions })
            .collect();
        forks.sort_by(|a, b| a.event_id.as_str().cmp(b.event_id.as_str()));

        Ok(Branches { main, forks })
    }
}

/// One event in a session's log from which at least one other session forks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchPoint {
    pub event_id: EventId,
    pub forked_sessions: Vec<turnkeep_core::SessionId>,
}

/// Output of `branches`: the session's own chain plus every point along it
/// where another session branched off.
#[derive(Clone, Debug, Default)]
pub struct Branches {
    pub main: Vec<Event>,
    pub forks: Vec<BranchPoint>,
}
