//! SQLite-based store implementation

use chrono::{DateTime, Local};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{AuditEvent, PersistedState, Store, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Audit log (append-only)
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_json TEXT NOT NULL
            );

            -- Policy state, one row per field, JSON-encoded values
            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

impl Store for SqliteStore {
    fn load_state(&self) -> StoreResult<Option<PersistedState>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT key, value FROM state")?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            Ok((key, value))
        })?;

        let mut fields = Map::new();
        for row in rows {
            let (key, value) = row?;
            fields.insert(key, serde_json::from_str(&value)?);
        }

        if fields.is_empty() {
            return Ok(None);
        }

        let state: PersistedState = serde_json::from_value(Value::Object(fields))?;
        Ok(Some(state))
    }

    fn save_state(&self, state: &PersistedState) -> StoreResult<()> {
        let fields = match serde_json::to_value(state)? {
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::Serialization(format!(
                    "Expected a flat record, got {}",
                    other
                )));
            }
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO state (key, value)
                VALUES (?, ?)
                ON CONFLICT(key)
                DO UPDATE SET value = excluded.value
                "#,
            )?;
            for (key, value) in &fields {
                stmt.execute(params![key, value.to_string()])?;
            }
        }
        tx.commit()?;

        debug!(fields = fields.len(), "State saved");
        Ok(())
    }

    fn append_audit(&self, mut event: AuditEvent) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&event.event)?;

        conn.execute(
            "INSERT INTO audit_log (timestamp, event_json) VALUES (?, ?)",
            params![event.timestamp.to_rfc3339(), event_json],
        )?;

        event.id = conn.last_insert_rowid();
        debug!(event_id = event.id, "Audit event appended");

        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, timestamp, event_json FROM audit_log ORDER BY id DESC LIMIT ?",
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
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
                .unwrap_or_else(|_| homegate_util::now());
            let event: crate::AuditEventType = serde_json::from_str(&event_json)?;

            events.push(AuditEvent {
                id,
                timestamp,
                event,
            });
        }

        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use homegate_util::MonthKey;

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn test_audit_log() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(AuditEvent::new(AuditEventType::DailyLimitChanged {
                from: 120,
                to: 90,
            }))
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0].event,
            AuditEventType::DailyLimitChanged { from: 120, to: 90 }
        ));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));

        assert_eq!(store.get_recent_audits(1).unwrap().len(), 1);
    }

    #[test]
    fn empty_store_has_no_state() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load_state().unwrap().is_none());
    }

    #[test]
    fn state_is_stored_per_key() {
        let store = SqliteStore::in_memory().unwrap();
        let today = homegate_util::now().date_naive();

        let state = PersistedState {
            daily_limit_minutes: 90,
            daily_used_minutes: 42,
            last_usage_date: Some(today),
            overrides_used: 2,
            override_month: Some(MonthKey::from_date(today)),
            total_blocks_count: 7,
            home_wifi_ssid: "HomeNet".into(),
            ..Default::default()
        };
        store.save_state(&state).unwrap();

        let conn = store.conn().unwrap();
        let used: String = conn
            .query_row(
                "SELECT value FROM state WHERE key = 'daily_used_minutes'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(used, "42");
        drop(conn);

        assert_eq!(store.load_state().unwrap().unwrap(), state);
    }

    #[test]
    fn save_overwrites_previous_values() {
        let store = SqliteStore::in_memory().unwrap();

        let mut state = PersistedState::default();
        store.save_state(&state).unwrap();

        state.daily_used_minutes = 15;
        state.total_usage_minutes = 15;
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.daily_used_minutes, 15);
        assert_eq!(loaded.total_usage_minutes, 15);
    }

    #[test]
    fn missing_keys_take_defaults_and_unknown_keys_are_ignored() {
        let store = SqliteStore::in_memory().unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute(
                "INSERT INTO state (key, value) VALUES ('overrides_used', '1'), ('retired_setting', '\"x\"')",
                [],
            )
            .unwrap();
        }

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.overrides_used, 1);
        assert_eq!(loaded.daily_limit_minutes, 120);
        assert!(loaded.last_usage_date.is_none());
    }

    #[test]
    fn corrupt_value_is_an_error() {
        let store = SqliteStore::in_memory().unwrap();
        {
            let conn = store.conn().unwrap();
            conn.execute(
                "INSERT INTO state (key, value) VALUES ('override_month', '\"not-a-month\"')",
                [],
            )
            .unwrap();
        }

        assert!(matches!(
            store.load_state(),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("homegate.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            let state = PersistedState {
                total_usage_minutes: 600,
                ..Default::default()
            };
            store.save_state(&state).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_state().unwrap().unwrap().total_usage_minutes, 600);
    }
}
