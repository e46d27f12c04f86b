//! SQLite-backed audit sink

use chrono::{DateTime, Local};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::{AuditEvent, AuditEventType, AuditSink, StoreResult};

/// Append-only audit table in a SQLite database
pub struct SqliteAuditSink {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteAuditSink {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let sink = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        sink.init_schema()?;
        Ok(sink)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let sink = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        sink.init_schema()?;
        Ok(sink)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                category TEXT NOT NULL,
                session_id TEXT,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_session ON audit_log(session_id);
            "#,
        )?;

        debug!("Audit schema initialized");
        Ok(())
    }

    /// Most recent events, newest first
    pub fn recent(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.lock();

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit], |row| {
            let id: i64 = row.get(0)?;
            let timestamp_str: String = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, timestamp_str, event_json))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp_str, event_json) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&timestamp_str)
                .map(|dt| dt.with_timezone(&Local))
                .unwrap_or_else(|_| termgate_util::now());
            let event: AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    pub fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Audit database lock poisoned");
                false
            }
        }
    }
}

impl AuditSink for SqliteAuditSink {
    fn append(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.lock();
        let event_json = serde_json::to_string(&event.event)?;
        let session_id = event.event.session_id().map(|id| id.to_string());

        conn.execute(
            "INSERT INTO audit_log (timestamp, category, session_id, event_json)
             VALUES (?, ?, ?, ?)",
            params![
                event.timestamp.to_rfc3339(),
                event.event.category(),
                session_id,
                event_json
            ],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite:{}", path.display()),
            None => "sqlite::memory:".to_string(),
        }
    }
}
