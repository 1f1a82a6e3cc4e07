//! L1 Event Log — the durable, append-only store of `Event` rows.

use crate::db::Db;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use turnkeep_core::{Error, Event, EventId, EventPayload, Result, SessionId};

/// Optional filters accepted by `search`.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub session_id: Option<SessionId>,
    pub event_type: Option<String>,
    pub limit: Option<usize>,
}

pub struct EventLog {
    db: Db,
}

impl EventLog {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Append one event to `session_id`. If `parent_id` is `None`, the
    /// session's current `head_event_id` is used. Inserts the row and
    /// advances the session's head inside one transaction — either both
    /// happen or neither does.
    pub fn append(
        &self,
        session_id: &SessionId,
        payload: EventPayload,
        parent_id: Option<EventId>,
    ) -> Result<Event> {
        let conn = self.db.conn().lock();
        let tx = conn.unchecked_transaction().map_err(|e| Error::Storage(e.to_string()))?;

        let (current_head, ended_at): (String, Option<String>) = tx
            .query_row(
                "SELECT head_event_id, ended_at FROM sessions WHERE id = ?1",
                params![session_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| Error::Storage(e.to_string()))?
            .ok_or_else(|| Error::SessionNotFound(session_id.clone()))?;

        if ended_at.is_some() {
            return Err(Error::SessionEnded(session_id.clone()));
        }

        let parent_id = match parent_id {
            Some(id) => {
                let exists: bool = tx
                    .query_row(
                        "SELECT EXISTS(SELECT 1 FROM events WHERE id = ?1 AND session_id = ?2)",
                        params![id.as_str(), session_id.as_str()],
                        |row| row.get(0),
                    )
                    .map_err(|e| Error::Storage(e.to_string()))?;
                if !exists {
                    return Err(Error::ParentMissing(id));
                }
                id
            }
            None => EventId::new(current_head),
        };

        let sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE session_id = ?1",
                params![session_id.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let sequence = sequence + 1;

        let id = EventId::generate();
        let timestamp = Utc::now();
        let event_type = payload.event_type().to_string();
        let payload_json = serde_json::to_string(&payload)?;

        tx.execute(
            "INSERT INTO events (id, session_id, parent_id, sequence, type, payload, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.as_str(),
                session_id.as_str(),
                parent_id.as_str(),
                sequence,
                event_type,
                payload_json,
                timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            "UPDATE sessions SET head_event_id = ?1 WHERE id = ?2",
            params![id.as_str(), session_id.as_str()],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Event { id, session_id: session_id.clone(), parent_id: Some(parent_id), sequence, timestamp, payload })
    }

    pub fn get(&self, id: &EventId) -> Result<Event> {
        let conn = self.db.conn().lock();
        row_to_event(
            &conn,
            "SELECT id, session_id, parent_id, sequence, type, payload, timestamp FROM events WHERE id = ?1",
            params![id.as_str()],
        )?
        .ok_or_else(|| Error::EventNotFound(id.clone()))
    }

    /// Child events whose `parent_id` is `id` **within `session_id`**, in
    /// sequence order. Bounded to one session because a `session.fork` root
    /// in another session can also carry `parent_id = id` — without this
    /// filter a descendant walk would cross into the forked session, which
    /// §4.3's edge policy forbids ("descendant walk stays within a single
    /// session").
    pub fn get_children(&self, session_id: &SessionId, id: &EventId) -> Result<Vec<Event>> {
        let conn = self.db.conn().lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, parent_id, sequence, type, payload, timestamp
                 FROM events WHERE parent_id = ?1 AND session_id = ?2 ORDER BY sequence ASC",
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![id.as_str(), session_id.as_str()], row_to_event_fields)
            .map_err(|e| Error::Storage(e.to_string()))?;
        collect_events(rows)
    }

    /// All events for a session in sequence order.
    pub fn get_by_session(&self, session_id: &SessionId) -> Result<Vec<Event>> {
        let conn = self.db.conn().lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, session_id, parent_id, sequence, type, payload, timestamp
                 FROM events WHERE session_id = ?1 ORDER BY sequence ASC",
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(params![session_id.as_str()], row_to_event_fields)
            .map_err(|e| Error::Storage(e.to_string()))?;
        collect_events(rows)
    }

    /// Substring search over the JSON payload text, existence not ranking.
    pub fn search(&self, query: &str, filter: SearchFilter) -> Result<Vec<Event>> {
        let conn = self.db.conn().lock();
        let mut sql = String::from(
            "SELECT id, session_id, parent_id, sequence, type, payload, timestamp
             FROM events WHERE payload LIKE ?1 ESCAPE '\\'",
        );
        let like = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));
        let mut owned_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(like)];

        if let Some(session_id) = &filter.session_id {
            sql.push_str(" AND session_id = ?");
            sql.push_str(&owned_params.len().saturating_add(1).to_string());
            owned_params.push(Box::new(session_id.as_str().to_string()));
        }
        if let Some(event_type) = &filter.event_type {
            sql.push_str(" AND type = ?");
            sql.push_str(&owned_params.len().saturating_add(1).to_string());
            owned_params.push(Box::new(event_type.clone()));
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Storage(e.to_string()))?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = owned_params.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), row_to_event_fields)
            .map_err(|e| Error::Storage(e.to_string()))?;
        collect_events(rows)
    }
}

fn row_to_event_fields(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let id: String = row.get(0)?;
    let session_id: String = row.get(1)?;
    let parent_id: Option<String> = row.get(2)?;
    let sequence: i64 = row.get(3)?;
    let payload_json: String = row.get(5)?;
    let timestamp: String = row.get(6)?;

    let payload: EventPayload = serde_json::from_str(&payload_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;
    let timestamp: DateTime<Utc> = timestamp
        .parse()
        .map_err(|e: chrono::ParseError| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(Event {
        id: EventId::new(id),
        session_id: SessionId::new(session_id),
        parent_id: parent_id.map(EventId::new),
        sequence,
        timestamp,
        payload,
    })
}

fn row_to_event(
    conn: &rusqlite::Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Event>> {
    conn.query_row(sql, params, row_to_event_fields).optional().map_err(|e| Error::Storage(e.to_string()))
}

fn collect_events(rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<Event>>) -> Result<Vec<Event>> {
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(|e| Error::Storage(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SessionRegistry;
    use turnkeep_core::CreateSessionOptions;

    fn fresh() -> (EventLog, SessionRegistry, turnkeep_core::Session) {
        let db = Db::open_in_memory().unwrap();
        let log = EventLog::new(db.clone());
        let registry = SessionRegistry::new(db);
        let session = registry
            .create(CreateSessionOptions { working_directory: "/tmp".into(), model: "default-model".into() })
            .unwrap();
        (log, registry, session)
    }

    #[test]
    fn append_advances_session_head_and_sequence() {
        let (log, registry, session) = fresh();
        let e1 = log
            .append(&session.id, EventPayload::MessageUser { content: vec![] }, None)
            .unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e1.parent_id, Some(session.root_event_id.clone()));

        let e2 = log
            .append(&session.id, EventPayload::MessageAssistant { content: vec![], turn: Some(1), interrupted: false, usage: None }, None)
            .unwrap();
        assert_eq!(e2.sequence, 2);
        assert_eq!(e2.parent_id, Some(e1.id.clone()));

        let reloaded = registry.get(&session.id).unwrap();
        assert_eq!(reloaded.head_event_id, e2.id);
    }

    #[test]
    fn append_to_ended_session_fails() {
        let (log, registry, session) = fresh();
        registry.end(&session.id).unwrap();
        let result = log.append(&session.id, EventPayload::ContextCleared {}, None);
        assert!(matches!(result, Err(Error::SessionEnded(_))));
    }

    #[test]
    fn append_with_nonexistent_explicit_parent_fails() {
        let (log, _registry, session) = fresh();
        let bogus = EventId::generate();
        let result = log.append(&session.id, EventPayload::ContextCleared {}, Some(bogus.clone()));
        assert!(matches!(result, Err(Error::ParentMissing(id)) if id == bogus));
    }

    #[test]
    fn get_children_returns_in_sequence_order() {
        let (log, _registry, session) = fresh();
        let e1 = log.append(&session.id, EventPayload::ContextCleared {}, None).unwrap();
        let _e2 = log.append(&session.id, EventPayload::ContextCleared {}, Some(e1.id.clone())).unwrap();
        let children = log.get_children(&session.id, &e1.id).unwrap();
        assert_eq!(children.len(), 1);
    }

    #[test]
    fn get_children_does_not_cross_into_a_forked_session() {
        let (log, registry, session) = fresh();
        let e1 = log.append(&session.id, EventPayload::ContextCleared {}, None).unwrap();
        let forked = registry
            .fork(&session, &e1.id, turnkeep_core::ForkSessionOptions::default())
            .unwrap();
        // The fork root's parent_id is e1, but it lives in a different session.
        assert_eq!(log.get(&forked.root_event_id).unwrap().parent_id, Some(e1.id.clone()));

        let children = log.get_children(&session.id, &e1.id).unwrap();
        assert!(children.is_empty());
    }

    #[test]
    fn search_matches_substring_in_payload() {
        let (log, _registry, session) = fresh();
        log.append(
            &session.id,
            EventPayload::MessageUser { content: vec![turnkeep_core::ContentBlock::Text { text: "find the needle".into() }] },
            None,
        )
        .unwrap();
        log.append(
            &session.id,
            EventPayload::MessageUser { content: vec![turnkeep_core::ContentBlock::Text { text: "nothing here".into() }] },
            None,
        )
        .unwrap();

        let found = log.search("needle", SearchFilter::default()).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn search_respects_limit_and_type_filter() {
        let (log, _registry, session) = fresh();
        for _ in 0..3 {
            log.append(&session.id, EventPayload::ContextCleared {}, None).unwrap();
        }
        let found = log
            .search("", SearchFilter { event_type: Some("context.cleared".into()), limit: Some(2), ..Default::default() })
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
