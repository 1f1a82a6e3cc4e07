//! L2 Session Registry — session metadata rows sharing the event store's
//! connection so `create`/`fork` can touch both tables atomically.

use crate::db::Db;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use turnkeep_core::{CreateSessionOptions, Error, EventId, EventPayload, ForkSessionOptions, Result, Session, SessionId};

pub struct SessionRegistry {
    db: Db,
}

impl SessionRegistry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Create a brand-new session with a synthetic `session.start` root event.
    pub fn create(&self, options: CreateSessionOptions) -> Result<Session> {
        let conn = self.db.conn().lock();
        let tx = conn.unchecked_transaction().map_err(|e| Error::Storage(e.to_string()))?;

        let session_id = SessionId::generate();
        let root_event_id = EventId::generate();
        let now = Utc::now();

        let payload = EventPayload::SessionStart {
            working_directory: options.working_directory.clone(),
            model: options.model.clone(),
        };
        tx.execute(
            "INSERT INTO events (id, session_id, parent_id, sequence, type, payload, timestamp)
             VALUES (?1, ?2, NULL, 1, ?3, ?4, ?5)",
            params![
                root_event_id.as_str(),
                session_id.as_str(),
                payload.event_type().to_string(),
                serde_json::to_string(&payload)?,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO sessions (id, root_event_id, head_event_id, working_directory, current_model, created_at, ended_at, parent_session_id, fork_name)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, NULL, NULL, NULL)",
            params![session_id.as_str(), root_event_id.as_str(), options.working_directory, options.model, now.to_rfc3339()],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Session {
            id: session_id,
            root_event_id: root_event_id.clone(),
            head_event_id: root_event_id,
            working_directory: options.working_directory,
            current_model: options.model,
            created_at: now,
            ended_at: None,
            parent_session_id: None,
            fork_name: None,
        })
    }

    /// Create a new session forked at `from_event`, belonging to `parent_session`.
    /// The new session's root event's `parent_id` crosses into the parent
    /// session's log — this is the zero-copy fork (§4.9).
    pub fn fork(
        &self,
        parent_session: &Session,
        from_event: &EventId,
        options: ForkSessionOptions,
    ) -> Result<Session> {
        let conn = self.db.conn().lock();
        let tx = conn.unchecked_transaction().map_err(|e| Error::Storage(e.to_string()))?;

        let from_event_exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM events WHERE id = ?1)",
                params![from_event.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        if !from_event_exists {
            return Err(Error::ParentMissing(from_event.clone()));
        }

        let session_id = SessionId::generate();
        let root_event_id = EventId::generate();
        let now = Utc::now();
        let working_directory = options.working_directory.unwrap_or_else(|| parent_session.working_directory.clone());
        let model = options.model.unwrap_or_else(|| parent_session.current_model.clone());

        let payload = EventPayload::SessionFork { fork_name: options.name.clone() };
        tx.execute(
            "INSERT INTO events (id, session_id, parent_id, sequence, type, payload, timestamp)
             VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)",
            params![
                root_event_id.as_str(),
                session_id.as_str(),
                from_event.as_str(),
                payload.event_type().to_string(),
                serde_json::to_string(&payload)?,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO sessions (id, root_event_id, head_event_id, working_directory, current_model, created_at, ended_at, parent_session_id, fork_name)
             VALUES (?1, ?2, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
            params![
                session_id.as_str(),
                root_event_id.as_str(),
                working_directory,
                model,
                now.to_rfc3339(),
                parent_session.id.as_str(),
                options.name,
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Session {
            id: session_id,
            root_event_id: root_event_id.clone(),
            head_event_id: root_event_id,
            working_directory,
            current_model: model,
            created_at: now,
            ended_at: None,
            parent_session_id: Some(parent_session.id.clone()),
            fork_name: options.name,
        })
    }

    pub fn end(&self, session_id: &SessionId) -> Result<()> {
        let conn = self.db.conn().lock();
        let existing: Option<String> = conn
            .query_row(
                "SELECT ended_at FROM sessions WHERE id = ?1",
                params![session_id.as_str()],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;
        if existing.is_some() {
            return Err(Error::SessionEnded(session_id.clone()));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2",
            params![now, session_id.as_str()],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    pub fn get(&self, session_id: &SessionId) -> Result<Session> {
        let conn = self.db.conn().lock();
        conn.query_row(
            "SELECT id, root_event_id, head_event_id, working_directory, current_model, created_at, ended_at, parent_session_id, fork_name
             FROM sessions WHERE id = ?1",
            params![session_id.as_str()],
            row_to_session,
        )
        .optional()
        .map_err(|e| Error::Storage(e.to_string()))?
        .ok_or_else(|| Error::SessionNotFound(session_id.clone()))
    }

    pub fn list(&self) -> Result<Vec<Session>> {
        let conn = self.db.conn().lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, root_event_id, head_event_id, working_directory, current_model, created_at, ended_at, parent_session_id, fork_name
                 FROM sessions ORDER BY created_at ASC",
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt.query_map([], row_to_session).map_err(|e| Error::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| Error::Storage(e.to_string()))
    }

    /// Direct child sessions forked from `session_id`.
    pub fn list_forks_of(&self, session_id: &SessionId) -> Result<Vec<Session>> {
        let conn = self.db.conn().lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, root_event_id, head_event_id, working_directory, current_model, created_at, ended_at, parent_session_id, fork_name
                 FROM sessions WHERE parent_session_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt.query_map(params![session_id.as_str()], row_to_session).map_err(|e| Error::Storage(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| Error::Storage(e.to_string()))
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let created_at: String = row.get(5)?;
    let ended_at: Option<String> = row.get(6)?;
    Ok(Session {
        id: SessionId::new(row.get::<_, String>(0)?),
        root_event_id: EventId::new(row.get::<_, String>(1)?),
        head_event_id: EventId::new(row.get::<_, String>(2)?),
        working_directory: row.get(3)?,
        current_model: row.get(4)?,
        created_at: created_at
            .parse()
            .map_err(|e: chrono::ParseError| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?,
        ended_at: ended_at
            .map(|s| s.parse())
            .transpose()
            .map_err(|e: chrono::ParseError| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?,
        parent_session_id: row.get::<_, Option<String>>(7)?.map(SessionId::new),
        fork_name: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn create_produces_session_with_matching_root_and_head() {
        let registry = registry();
        let session = registry
            .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
            .unwrap();
        assert_eq!(session.root_event_id, session.head_event_id);
        assert!(!session.is_ended());
        assert!(!session.is_fork());
    }

    #[test]
    fn fork_links_into_parent_session_and_records_lineage() {
        let registry = registry();
        let parent = registry
            .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
            .unwrap();
        let forked = registry
            .fork(&parent, &parent.root_event_id, ForkSessionOptions { name: Some("branch-a".into()), ..Default::default() })
            .unwrap();

        assert!(forked.is_fork());
        assert_eq!(forked.parent_session_id, Some(parent.id.clone()));
        assert_eq!(forked.fork_name.as_deref(), Some("branch-a"));

        let children = registry.list_forks_of(&parent.id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, forked.id);
    }

    #[test]
    fn fork_from_nonexistent_event_fails_with_parent_missing() {
        let registry = registry();
        let parent = registry
            .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
            .unwrap();
        let bogus = EventId::generate();
        let result = registry.fork(&parent, &bogus, ForkSessionOptions::default());
        assert!(matches!(result, Err(Error::ParentMissing(id)) if id == bogus));
    }

    #[test]
    fn end_is_idempotent_guarded() {
        let registry = registry();
        let session = registry
            .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
            .unwrap();
        registry.end(&session.id).unwrap();
        let reloaded = registry.get(&session.id).unwrap();
        assert!(reloaded.is_ended());

        let result = registry.end(&session.id);
        assert!(matches!(result, Err(Error::SessionEnded(_))));
    }

    #[test]
    fn get_missing_session_errors() {
        let registry = registry();
        let result = registry.get(&SessionId::new("missing"));
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }
}
