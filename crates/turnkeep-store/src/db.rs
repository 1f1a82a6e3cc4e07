//! Connection setup and schema migration for the durable event store.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use turnkeep_core::{Error, Result};

const MIGRATIONS: &[&str] = &[include_str!("../migrations/001_initial.sql")];

/// A shared, WAL-journaled SQLite connection backing the event log and
/// session registry. Both tables live in one database so appends that touch
/// both (e.g. `create`, `fork`) commit inside a single transaction.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) a WAL-journaled database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage(e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage(e.to_string()))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(|e| Error::Storage(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(|e| Error::Storage(e.to_string()))?;
        let db = Self { conn: Arc::new(Mutex::new(conn)) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY)",
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .map_err(|e| Error::Storage(e.to_string()))?;

        for (i, migration) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
            tracing::info!(version = i + 1, "applying event store migration");
            conn.execute_batch(migration).map_err(|e| Error::Storage(e.to_string()))?;
            conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [i as i64 + 1])
                .map_err(|e| Error::Storage(e.to_string()))?;
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }
}
