//! Encrypted event store
//!
//! One SQLite connection behind a mutex. Every public operation runs as a
//! single statement or transaction inside [`EventStore::with_recovery`],
//! which rebuilds the database and retries when SQLite reports corruption.

use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ToSql};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::{is_corruption, SqlResultExt, StoreError};
use super::records::StoredRecord;
use super::subscribers::{SubscriberRegistry, SubscriptionId};
use super::types::{Category, Event, EventQuery};
use crate::config::StorageConfig;
use crate::db::{remove_database_files, SqliteDatabase};
use crate::migration;
use crate::secrets::{EncryptionKey, KeyManager, KeyStore};
use crate::validation::{check_event, validate_event, ValidationError};

/// Database paths currently held by an open store in this process
static OPEN_PATHS: Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

/// Exclusive claim on a database path, released on drop
#[derive(Debug)]
struct PathClaim(PathBuf);

impl PathClaim {
    fn acquire(path: &Path) -> Result<Self, StoreError> {
        let key = claim_key(path);
        let mut open = OPEN_PATHS.lock();
        if open.contains(&key) {
            tracing::error!(path = %key.display(), "event store already open");
            return Err(StoreError::AlreadyOpen(key));
        }
        open.push(key.clone());
        Ok(Self(key))
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        OPEN_PATHS.lock().retain(|p| p != &self.0);
    }
}

/// Absolute path with the parent directory canonicalized, so that
/// `./events.db` and `/abs/dir/events.db` collide.
fn claim_key(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or(absolute),
        _ => absolute,
    }
}

/// Tuning knobs for [`EventStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How many times one operation may rebuild a corrupted database
    pub max_recovery_attempts: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 1,
        }
    }
}

/// Encrypted, self-healing store of [`Event`]s
#[derive(Debug)]
pub struct EventStore {
    db: Mutex<SqliteDatabase>,
    keys: KeyManager,
    subscribers: SubscriberRegistry,
    options: StoreOptions,
    // Declared last so the connection is closed before the path is released
    _claim: Option<PathClaim>,
}

impl EventStore {
    /// Open (creating or migrating as needed) the store at `path`
    pub fn open<P: AsRef<Path>>(
        path: P,
        keystore: KeyStore,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let claim = PathClaim::acquire(path)?;

        let db = match SqliteDatabase::open(path) {
            Ok(db) => db,
            Err(e) if is_corruption(&e) => {
                tracing::warn!(path = %path.display(), error = %e, "database unreadable, recreating");
                remove_database_files(path).map_err(|source| StoreError::Io {
                    op: "open database",
                    source,
                })?;
                SqliteDatabase::open(path).during("open database")?
            }
            Err(source) => {
                return Err(StoreError::Storage {
                    op: "open database",
                    source,
                })
            }
        };

        Self::init(db, KeyManager::new(keystore), options, Some(claim))
    }

    /// Store backed by in-memory databases, for tests and scratch work
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let db = SqliteDatabase::open_in_memory().during("open database")?;
        let keystore = KeyStore::open_in_memory()?;
        Self::init(db, KeyManager::new(keystore), StoreOptions::default(), None)
    }

    /// Open the store described by the `[storage]` configuration section
    pub fn open_with_config(config: &StorageConfig) -> Result<Self, StoreError> {
        let dir = config.data_dir_path();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            op: "create data directory",
            source,
        })?;

        let keystore = KeyStore::open(config.keystore_path())?;
        let options = StoreOptions {
            max_recovery_attempts: config.max_recovery_attempts,
        };
        Self::open(config.database_path(), keystore, options)
    }

    fn init(
        mut db: SqliteDatabase,
        keys: KeyManager,
        options: StoreOptions,
        claim: Option<PathClaim>,
    ) -> Result<Self, StoreError> {
        let key = keys.get_or_create_key()?;

        match migration::migrate_to_current(db.connection_mut(), &key) {
            Ok(report) if report.migrated + report.discarded > 0 => {
                tracing::info!(
                    migrated = report.migrated,
                    discarded = report.discarded,
                    "upgraded legacy event database"
                );
            }
            Ok(_) => {}
            Err(e) if e.is_corruption() => {
                tracing::warn!(error = %e, "database corrupted on open, recreating");
                recover(&mut db, "open database")?;
            }
            Err(e) => return Err(e),
        }

        Ok(Self {
            db: Mutex::new(db),
            keys,
            subscribers: SubscriberRegistry::new(),
            options,
            _claim: claim,
        })
    }

    /// Backing database file, `None` for in-memory stores
    pub fn path(&self) -> Option<PathBuf> {
        self.db.lock().path().map(Path::to_path_buf)
    }

    /// Run `f` against the connection, rebuilding the database and retrying
    /// when it fails with a corruption error.
    fn with_recovery<T, F>(&self, op: &'static str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Connection, &EncryptionKey) -> Result<T, StoreError>,
    {
        let key = self.keys.get_or_create_key()?;
        let mut db = self.db.lock();
        let mut attempts = 0;

        loop {
            match f(db.connection_mut(), &*key) {
                Err(e) if e.is_corruption() => {
                    if attempts >= self.options.max_recovery_attempts {
                        tracing::error!(op, attempts, error = %e, "database corruption persists");
                        return Err(StoreError::Corruption {
                            op,
                            detail: e.to_string(),
                        });
                    }
                    attempts += 1;
                    tracing::warn!(op, attempt = attempts, error = %e, "database corruption detected, recreating");
                    recover(&mut db, op)?;
                }
                Err(e) => {
                    if matches!(e, StoreError::Storage { .. }) {
                        tracing::error!(op, error = %e, "storage operation failed");
                    }
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Validate, encrypt and insert one event, then notify subscribers
    pub fn create(&self, event: &Event) -> Result<Event, StoreError> {
        check_event(event)?;

        self.with_recovery("create event", |conn, key| {
            StoredRecord::seal(event, key)?.insert(conn)
        })?;
        tracing::debug!(event_id = %event.id, "created event");

        self.subscribers.notify(event);
        Ok(event.clone())
    }

    /// Alias of [`create`](Self::create)
    pub fn append(&self, event: &Event) -> Result<Event, StoreError> {
        self.create(event)
    }

    /// Insert a batch in one transaction.
    ///
    /// Every event is validated before anything is written; one invalid
    /// event rejects the whole batch. Subscribers hear about each event
    /// after the commit.
    pub fn create_many(&self, events: &[Event]) -> Result<Vec<Event>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        for event in events {
            check_event(event)?;
        }

        self.with_recovery("create events", |conn, key| {
            let tx = conn.transaction().during("begin batch")?;
            for event in events {
                StoredRecord::seal(event, key)?.insert(&tx)?;
            }
            tx.commit().during("commit batch")
        })?;
        tracing::debug!(count = events.len(), "created events");

        for event in events {
            self.subscribers.notify(event);
        }
        Ok(events.to_vec())
    }

    /// Alias of [`create_many`](Self::create_many)
    pub fn append_many(&self, events: &[Event]) -> Result<Vec<Event>, StoreError> {
        self.create_many(events)
    }

    /// Merge `patch` into the stored event, re-validate and re-encrypt.
    ///
    /// The stored record is left untouched when the merged event is invalid.
    pub fn update(&self, id: &str, patch: &Map<String, Value>) -> Result<Event, StoreError> {
        if let Some(new_id) = patch.get("id") {
            if new_id.as_str() != Some(id) {
                return Err(ValidationError::single("id", "cannot be changed").logged().into());
            }
        }

        let event = self.with_recovery("update event", |conn, key| {
            let tx = conn.transaction().during("begin update")?;

            let Some(record) = StoredRecord::fetch(&tx, id)? else {
                tracing::warn!(event_id = %id, "update of missing event");
                return Err(StoreError::NotFound(id.to_string()));
            };
            let current = record.open(key).inspect_err(log_crypto_failure)?;

            let mut merged = serde_json::to_value(&current)?;
            if let Value::Object(fields) = &mut merged {
                for (field, value) in patch {
                    fields.insert(field.clone(), value.clone());
                }
            }
            let updated = validate_event(&merged)?;

            StoredRecord::seal(&updated, key)?.replace(&tx)?;
            tx.commit().during("commit update")?;
            Ok(updated)
        })?;

        tracing::debug!(event_id = %id, "updated event");
        Ok(event)
    }

    /// Remove an event. Returns whether it existed; a missing id is not an error.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.with_recovery("delete event", |conn, _| {
            conn.execute("DELETE FROM events WHERE id = ?1", [id])
                .during("delete event")
        })?;
        tracing::debug!(event_id = %id, removed, "deleted event");
        Ok(removed > 0)
    }

    /// Remove every event, returning how many were removed
    pub fn clear(&self) -> Result<usize, StoreError> {
        let removed = self.with_recovery("clear events", |conn, _| {
            conn.execute("DELETE FROM events", []).during("clear events")
        })?;
        tracing::debug!(removed, "cleared events");
        Ok(removed)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch one event; `None` when absent.
    ///
    /// A record that cannot be decrypted is an error here, unlike in
    /// [`list`](Self::list).
    pub fn read(&self, id: &str) -> Result<Option<Event>, StoreError> {
        self.with_recovery("read event", |conn, key| {
            StoredRecord::fetch(conn, id)?
                .map(|record| record.open(key).inspect_err(log_crypto_failure))
                .transpose()
        })
    }

    /// All readable events, newest first (ties broken by id)
    pub fn list(&self) -> Result<Vec<Event>, StoreError> {
        let records =
            self.with_recovery("list events", |conn, _| StoredRecord::fetch_where(conn, "", &[]))?;
        self.open_all(records)
    }

    /// Filter [`list`](Self::list) by exact category and by a case-insensitive
    /// substring of the title or category name
    pub fn search(
        &self,
        category: Option<Category>,
        query: Option<&str>,
    ) -> Result<Vec<Event>, StoreError> {
        let needle = query
            .map(str::to_lowercase)
            .filter(|q| !q.is_empty());

        let events = self
            .list()?
            .into_iter()
            .filter(|event| category.map_or(true, |c| event.category == c))
            .filter(|event| match &needle {
                Some(needle) => {
                    event.title.to_lowercase().contains(needle.as_str())
                        || event.category.as_str().contains(needle.as_str())
                }
                None => true,
            })
            .collect();
        Ok(events)
    }

    /// Time range and bounding box filtered on the indexed plaintext
    /// columns, categories after decryption
    pub fn query(&self, query: &EventQuery) -> Result<Vec<Event>, StoreError> {
        let mut conditions = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(from) = query.from {
            conditions.push("timestamp >= ?");
            values.push(SqlValue::Integer(from));
        }
        if let Some(to) = query.to {
            conditions.push("timestamp <= ?");
            values.push(SqlValue::Integer(to));
        }
        if let Some(bounds) = query.bounds {
            conditions.push("latitude BETWEEN ? AND ?");
            values.push(SqlValue::Real(bounds.south));
            values.push(SqlValue::Real(bounds.north));

            if bounds.west <= bounds.east {
                conditions.push("longitude BETWEEN ? AND ?");
            } else {
                // antimeridian wrap
                conditions.push("(longitude >= ? OR longitude <= ?)");
            }
            values.push(SqlValue::Real(bounds.west));
            values.push(SqlValue::Real(bounds.east));
        }

        let filter = conditions.join(" AND ");
        let records = self.with_recovery("query events", |conn, _| {
            let args: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
            StoredRecord::fetch_where(conn, &filter, &args)
        })?;

        let events = self.open_all(records)?;
        if query.categories.is_empty() {
            return Ok(events);
        }
        Ok(events
            .into_iter()
            .filter(|event| query.categories.contains(&event.category))
            .collect())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self.with_recovery("count events", |conn, _| {
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
                .during("count events")
        })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Decrypt records, skipping (and logging) any that fail
    fn open_all(&self, records: Vec<StoredRecord>) -> Result<Vec<Event>, StoreError> {
        let key = self.keys.get_or_create_key()?;
        Ok(records
            .into_iter()
            .filter_map(|record| match record.open(&key) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(event_id = %record.id, error = %e, "skipping unreadable event");
                    None
                }
            })
            .collect())
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    /// Register a callback run synchronously after each created event
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Key manager owned by this store
    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    /// Shared handle to the cached encryption key
    pub fn encryption_key(&self) -> Result<Arc<EncryptionKey>, StoreError> {
        Ok(self.keys.get_or_create_key()?)
    }
}

/// Throw the database away and lay down an empty current schema
fn recover(db: &mut SqliteDatabase, op: &'static str) -> Result<(), StoreError> {
    db.recreate()
        .map_err(|source| StoreError::Recreate { op, source })?;
    migration::create_current_schema(db.connection())
}

fn log_crypto_failure(error: &StoreError) {
    tracing::warn!(error = %error, "event could not be decrypted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: &str, timestamp: i64) -> Event {
        Event {
            id: id.to_string(),
            title: format!("Event {id}"),
            category: Category::Political,
            latitude: 48.85,
            longitude: 2.35,
            timestamp,
        }
    }

    #[test]
    fn test_create_read_roundtrip() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        let created = store.create(&event("a", 1))?;
        assert_eq!(store.read("a")?, Some(created));
        assert_eq!(store.read("missing")?, None);
        Ok(())
    }

    #[test]
    fn test_duplicate_id_is_storage_error() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        store.create(&event("a", 1))?;
        assert!(matches!(
            store.create(&event("a", 2)),
            Err(StoreError::Storage { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_event_rejected() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        let mut bad = event("a", 1);
        bad.latitude = 120.0;

        let err = store.create(&bad).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(store.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_batch_is_all_or_nothing() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        let mut batch = vec![event("a", 1), event("b", 2)];
        batch.push(Event {
            title: String::new(),
            ..event("c", 3)
        });

        assert!(store.create_many(&batch).is_err());
        assert_eq!(store.count()?, 0);

        batch.pop();
        assert_eq!(store.create_many(&batch)?.len(), 2);
        assert_eq!(store.count()?, 2);
        Ok(())
    }

    #[test]
    fn test_list_order() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        store.create_many(&[event("b", 5), event("a", 5), event("c", 9)])?;

        let ids: Vec<_> = store.list()?.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        Ok(())
    }

    #[test]
    fn test_update_merges_and_revalidates() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        store.create(&event("a", 1))?;

        let patch = json!({ "title": "Renamed", "category": "health" });
        let updated = store.update("a", patch.as_object().unwrap())?;
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.category, Category::Health);
        assert_eq!(store.read("a")?, Some(updated));

        let id_change = json!({ "id": "b" });
        assert!(matches!(
            store.update("a", id_change.as_object().unwrap()),
            Err(StoreError::Validation(_))
        ));

        let missing = store.update("zzz", patch.as_object().unwrap());
        assert!(matches!(missing, Err(StoreError::NotFound(id)) if id == "zzz"));
        Ok(())
    }

    #[test]
    fn test_delete_and_clear() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        store.create_many(&[event("a", 1), event("b", 2)])?;

        assert!(store.delete("a")?);
        assert!(!store.delete("a")?);
        assert_eq!(store.clear()?, 1);
        assert_eq!(store.clear()?, 0);
        Ok(())
    }

    #[test]
    fn test_recovers_from_dropped_table() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        store.create(&event("a", 1))?;

        store.db.lock().connection().execute_batch("DROP TABLE events;")?;

        assert_eq!(store.count()?, 0);
        store.create(&event("b", 2))?;
        assert_eq!(store.count()?, 1);
        Ok(())
    }

    #[test]
    fn test_recovery_cap() -> anyhow::Result<()> {
        let store = EventStore::open_in_memory()?;
        let mut calls = 0;

        let result: Result<(), _> = store.with_recovery("always broken", |conn, _| {
            calls += 1;
            conn.execute("DELETE FROM no_such_table", [])
                .map(|_| ())
                .during("always broken")
        });

        assert!(matches!(result, Err(StoreError::Corruption { .. })));
        assert_eq!(calls, 2);
        Ok(())
    }

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EventStore>();
    }
}
