//! Schema versioning for the event database
//!
//! The version lives in the `metadata` table. Version 1 is the legacy
//! plaintext layout, version 2 the encrypted one. Opening a version 1
//! database migrates it once, in a single transaction:
//! - every legacy row is read and missing fields get defaults
//! - each row is re-validated, failures are logged and dropped
//! - survivors are sealed and written into the new layout
//!
//! Safe to call on every open: a current database is left untouched.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::secrets::EncryptionKey;
use crate::storage::error::{SqlResultExt, StoreError};
use crate::storage::records::StoredRecord;
use crate::storage::types::Category;
use crate::validation::validate_event;

pub const CURRENT_SCHEMA_VERSION: i64 = 2;
pub const LEGACY_SCHEMA_VERSION: i64 = 1;

/// Placeholder for legacy rows without a title
pub const UNTITLED_EVENT: &str = "Untitled event";

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Plaintext layout written by version 1 stores
pub const LEGACY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        timestamp,
        latitude,
        longitude,
        title TEXT,
        category TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_events_latitude ON events(latitude);
    CREATE INDEX IF NOT EXISTS idx_events_longitude ON events(longitude);
    CREATE INDEX IF NOT EXISTS idx_events_title ON events(title);
    CREATE INDEX IF NOT EXISTS idx_events_category ON events(category);
";

const CURRENT_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        encrypted_data BLOB,
        iv BLOB
    );
    CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
    CREATE INDEX IF NOT EXISTS idx_events_latitude ON events(latitude);
    CREATE INDEX IF NOT EXISTS idx_events_longitude ON events(longitude);
";

/// Outcome of [`migrate_to_current`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Legacy rows rewritten into the encrypted layout
    pub migrated: usize,
    /// Legacy rows that failed validation and were dropped
    pub discarded: usize,
}

/// Create the current layout (idempotent) and stamp its version
pub fn create_current_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(CURRENT_SCHEMA).during("create schema")?;
    set_version(conn, CURRENT_SCHEMA_VERSION)
}

/// Detected schema version, `None` for an empty database
pub fn schema_version(conn: &Connection) -> Result<Option<i64>, StoreError> {
    if table_exists(conn, "metadata")? {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()
            .during("read schema version")?;

        if let Some(stored) = stored {
            return stored
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StoreError::Corruption {
                    op: "read schema version",
                    detail: format!("unreadable schema version '{}'", stored),
                });
        }
    }

    if !table_exists(conn, "events")? {
        return Ok(None);
    }

    // Unversioned events table: tell the layouts apart by their columns
    let columns = table_columns(conn, "events")?;
    if columns.iter().any(|c| c == "title") {
        Ok(Some(LEGACY_SCHEMA_VERSION))
    } else if columns.iter().any(|c| c == "encrypted_data") {
        Ok(Some(CURRENT_SCHEMA_VERSION))
    } else {
        Err(StoreError::Corruption {
            op: "read schema version",
            detail: "events table has an unrecognized layout".to_string(),
        })
    }
}

/// Bring the database to [`CURRENT_SCHEMA_VERSION`]
pub fn migrate_to_current(
    conn: &mut Connection,
    key: &EncryptionKey,
) -> Result<MigrationReport, StoreError> {
    match schema_version(conn)? {
        None | Some(CURRENT_SCHEMA_VERSION) => {
            create_current_schema(conn)?;
            Ok(MigrationReport::default())
        }
        Some(LEGACY_SCHEMA_VERSION) => migrate_legacy(conn, key),
        Some(found) if found > CURRENT_SCHEMA_VERSION => {
            let err = StoreError::UnsupportedVersion {
                found,
                supported: CURRENT_SCHEMA_VERSION,
            };
            tracing::error!(error = %err, "refusing to open database");
            Err(err)
        }
        Some(found) => Err(StoreError::Corruption {
            op: "read schema version",
            detail: format!("unknown schema version {}", found),
        }),
    }
}

fn migrate_legacy(conn: &mut Connection, key: &EncryptionKey) -> Result<MigrationReport, StoreError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .during("begin migration")?;

    let candidates = read_legacy_rows(&tx)?;
    tracing::info!(rows = candidates.len(), "migrating legacy plaintext events");

    // Dropping the table takes the legacy indexes with it
    tx.execute_batch("DROP TABLE events;").during("drop legacy table")?;
    tx.execute_batch(CURRENT_SCHEMA).during("create schema")?;

    let mut report = MigrationReport::default();
    let mut seen = HashSet::new();

    for candidate in candidates {
        let id = candidate
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<missing>")
            .to_string();

        let event = match validate_event(&Value::Object(candidate)) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event_id = %id, error = %e, "dropping legacy event");
                report.discarded += 1;
                continue;
            }
        };

        if !seen.insert(event.id.clone()) {
            tracing::warn!(event_id = %id, "dropping duplicate legacy event");
            report.discarded += 1;
            continue;
        }

        StoredRecord::seal(&event, key)?.insert(&tx)?;
        report.migrated += 1;
    }

    set_version(&tx, CURRENT_SCHEMA_VERSION)?;
    tx.commit().during("commit migration")?;

    tracing::info!(
        migrated = report.migrated,
        discarded = report.discarded,
        "legacy migration complete"
    );
    Ok(report)
}

fn read_legacy_rows(conn: &Connection) -> Result<Vec<Map<String, Value>>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT id, timestamp, latitude, longitude, title, category FROM events")
        .during("read legacy events")?;

    let rows = stmt
        .query_map([], |row| {
            let mut candidate = Map::new();
            for (index, field) in ["id", "timestamp", "latitude", "longitude"]
                .into_iter()
                .enumerate()
            {
                if let Some(value) = json_value(row.get_ref(index)?) {
                    candidate.insert(field.to_string(), value);
                }
            }

            if let Some(timestamp) = candidate.get("timestamp").and_then(legacy_timestamp) {
                candidate.insert("timestamp".to_string(), Value::from(timestamp));
            }

            let title = json_value(row.get_ref(4)?)
                .filter(|v| !v.as_str().is_some_and(|s| s.trim().is_empty()))
                .unwrap_or_else(|| Value::from(UNTITLED_EVENT));
            candidate.insert("title".to_string(), title);

            let category = json_value(row.get_ref(5)?)
                .filter(|v| !v.as_str().is_some_and(|s| s.trim().is_empty()))
                .unwrap_or_else(|| Value::from(Category::Other.as_str()));
            candidate.insert("category".to_string(), category);

            Ok(candidate)
        })
        .during("read legacy events")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during("read legacy events")?;

    Ok(rows)
}

/// SQLite value as JSON, `None` for NULL
fn json_value(value: ValueRef<'_>) -> Option<Value> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::from(i)),
        ValueRef::Real(f) => Some(serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)),
        ValueRef::Text(text) => Some(Value::String(String::from_utf8_lossy(text).into_owned())),
        ValueRef::Blob(_) => Some(Value::Null),
    }
}

/// Legacy timestamps were sometimes stored as whole reals or as text
fn legacy_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) if n.is_i64() => None,
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64),
        Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| {
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|dt| dt.timestamp_millis())
        }),
        _ => None,
    }
}

fn set_version(conn: &Connection, version: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![SCHEMA_VERSION_KEY, version.to_string()],
    )
    .during("write schema version")?;
    Ok(())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .during("inspect schema")?;
    Ok(count > 0)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .during("inspect schema")?;
    let columns = stmt
        .query_map([table], |row| row.get(0))
        .during("inspect schema")?
        .collect::<rusqlite::Result<Vec<String>>>()
        .during("inspect schema")?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_SCHEMA).unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_gets_current_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        let key = EncryptionKey::generate().unwrap();

        assert_eq!(schema_version(&conn).unwrap(), None);
        let report = migrate_to_current(&mut conn, &key).unwrap();
        assert_eq!(report, MigrationReport::default());
        assert_eq!(schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_legacy_rows_are_migrated_with_defaults() {
        let mut conn = legacy_db();
        conn.execute_batch(
            "INSERT INTO events VALUES ('a', 1000, 10.0, 20.0, 'Storm', 'natural_disaster');
             INSERT INTO events VALUES ('b', 2000, 11.0, 21.0, NULL, NULL);
             INSERT INTO events VALUES ('c', 3000, 12.0, 22.0, 'Match', 'sports');
             INSERT INTO events VALUES ('d', 4000, 95.0, 22.0, 'Off the map', 'other');
             INSERT INTO events VALUES ('e', '2024-01-01T00:00:00Z', 1.0, 2.0, 'Text time', 'health');",
        )
        .unwrap();
        let key = EncryptionKey::generate().unwrap();

        assert_eq!(schema_version(&conn).unwrap(), Some(LEGACY_SCHEMA_VERSION));
        let report = migrate_to_current(&mut conn, &key).unwrap();
        assert_eq!(report, MigrationReport { migrated: 3, discarded: 2 });
        assert_eq!(schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));

        let records = StoredRecord::fetch_where(&conn, "", &[]).unwrap();
        let events: Vec<_> = records.iter().map(|r| r.open(&key).unwrap()).collect();
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e", "b", "a"]);

        let b = &events[1];
        assert_eq!(b.title, UNTITLED_EVENT);
        assert_eq!(b.category, Category::Other);
        assert_eq!(events[0].timestamp, 1_704_067_200_000);

        // Legacy title/category indexes are gone
        let legacy_indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name IN ('idx_events_title', 'idx_events_category')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(legacy_indexes, 0);

        // Plaintext title is no longer on disk
        let raw: Vec<u8> = conn
            .query_row(
                "SELECT encrypted_data FROM events WHERE id = 'a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("Storm"));
    }

    #[test]
    fn test_migration_runs_once() {
        let mut conn = legacy_db();
        conn.execute_batch("INSERT INTO events VALUES ('a', 1000, 10.0, 20.0, 'Storm', 'political');")
            .unwrap();
        let key = EncryptionKey::generate().unwrap();

        assert_eq!(migrate_to_current(&mut conn, &key).unwrap().migrated, 1);
        assert_eq!(
            migrate_to_current(&mut conn, &key).unwrap(),
            MigrationReport::default()
        );
    }

    #[test]
    fn test_newer_version_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        create_current_schema(&conn).unwrap();
        set_version(&conn, CURRENT_SCHEMA_VERSION + 1).unwrap();

        let key = EncryptionKey::generate().unwrap();
        assert!(matches!(
            migrate_to_current(&mut conn, &key),
            Err(StoreError::UnsupportedVersion { found: 3, supported: 2 })
        ));
    }
}
