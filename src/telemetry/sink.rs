//! Telemetry storage backends.
//!
//! ## Table: telemetry_events
//! - id: event UUID
//! - conversation_id: conversation (nullable)
//! - event_type: "TOOL" or "GUARDRAIL"
//! - name: tool or guardrail name
//! - status: USED / PASSED / BLOCKED / UNKNOWN
//! - metadata: JSON payload
//! - created_at: RFC 3339 timestamp

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{EventType, TelemetryEvent};

/// Errors from the telemetry write path
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Telemetry storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Telemetry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt telemetry row: {0}")]
    Corrupt(String),
}

/// Append-only destination for telemetry events.
///
/// Implementations must tolerate concurrent appends.
pub trait TelemetrySink: Send + Sync {
    fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError>;
}

/// SQLite-backed telemetry store
pub struct SqliteTelemetrySink {
    conn: Mutex<Connection>,
}

impl SqliteTelemetrySink {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, TelemetryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self, TelemetryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, TelemetryError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS telemetry_events (
                id TEXT PRIMARY KEY,
                conversation_id TEXT,
                event_type TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_telemetry_events_type_time
             ON telemetry_events (event_type, created_at DESC)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Most recent events, newest first
    pub fn recent(
        &self,
        event_type: Option<EventType>,
        limit: usize,
    ) -> Result<Vec<TelemetryEvent>, TelemetryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, event_type, name, status, metadata, created_at
             FROM telemetry_events
             WHERE ?1 IS NULL OR event_type = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(
            params![event_type.map(|t| t.as_str()), limit as i64],
            |row| {
                Ok(RawEvent {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    event_type: row.get(2)?,
                    name: row.get(3)?,
                    status: row.get(4)?,
                    metadata: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.into_event()?);
        }
        Ok(events)
    }

    /// Number of stored events
    pub fn count(&self) -> Result<u64, TelemetryError> {
        let conn = self.lock();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM telemetry_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl TelemetrySink for SqliteTelemetrySink {
    fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let metadata = serde_json::to_string(&event.metadata)?;
        let conn = self.lock();
        conn.execute(
            "INSERT INTO telemetry_events
                (id, conversation_id, event_type, name, status, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id.to_string(),
                event.conversation_id,
                event.event_type.as_str(),
                event.name,
                event.status,
                metadata,
                event
                    .created_at
                    .to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;
        Ok(())
    }
}

/// Row as stored, before parsing
struct RawEvent {
    id: String,
    conversation_id: Option<String>,
    event_type: String,
    name: String,
    status: String,
    metadata: Option<String>,
    created_at: String,
}

impl RawEvent {
    fn into_event(self) -> Result<TelemetryEvent, TelemetryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| TelemetryError::Corrupt(format!("id '{}': {}", self.id, e)))?;
        let event_type = EventType::parse(&self.event_type)
            .ok_or_else(|| TelemetryError::Corrupt(format!("event type '{}'", self.event_type)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| TelemetryError::Corrupt(format!("timestamp '{}': {}", self.created_at, e)))?
            .with_timezone(&Utc);
        let metadata = match self.metadata {
            Some(raw) => serde_json::from_str(&raw)?,
            None => serde_json::Value::Null,
        };

        Ok(TelemetryEvent {
            id,
            conversation_id: self.conversation_id,
            event_type,
            name: self.name,
            status: self.status,
            metadata,
            created_at,
        })
    }
}

/// In-process sink keeping events in a vector
#[derive(Default)]
pub struct MemoryTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TelemetrySink for MemoryTelemetrySink {
    fn write(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_back() {
        let sink = SqliteTelemetrySink::in_memory().unwrap();
        let event = TelemetryEvent::new(EventType::Tool, "calculate", "USED", json!({"args": {"expression": "1 + 1"}}))
            .with_conversation(Some("conv_1".to_string()));

        sink.write(&event).unwrap();

        let events = sink.recent(None, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, event.id);
        assert_eq!(events[0].conversation_id.as_deref(), Some("conv_1"));
        assert_eq!(events[0].metadata["args"]["expression"], "1 + 1");
    }

    #[test]
    fn test_recent_filters_by_type_newest_first() {
        let sink = SqliteTelemetrySink::in_memory().unwrap();
        for name in ["a", "b", "c"] {
            sink.write(&TelemetryEvent::new(EventType::Guardrail, name, "PASSED", json!({})))
                .unwrap();
        }
        sink.write(&TelemetryEvent::new(EventType::Tool, "calculate", "USED", json!({})))
            .unwrap();

        let guardrails = sink.recent(Some(EventType::Guardrail), 10).unwrap();
        let names: Vec<&str> = guardrails.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);

        assert_eq!(sink.recent(Some(EventType::Tool), 10).unwrap().len(), 1);
        assert_eq!(sink.recent(None, 2).unwrap().len(), 2);
        assert_eq!(sink.count().unwrap(), 4);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("telemetry.db");

        let sink = SqliteTelemetrySink::open(&path).unwrap();
        sink.write(&TelemetryEvent::new(EventType::Tool, "t", "USED", json!(null)))
            .unwrap();

        assert!(path.exists());
        let reopened = SqliteTelemetrySink::open(&path).unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
