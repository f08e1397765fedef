//! Database plumbing for EventSphere
//!
//! Simple SQLite wrapper shared by the event store and the keystore.
//!
//! # Example
//! ```no_run
//! use eventsphere::db::SqliteDatabase;
//!
//! let db = SqliteDatabase::open("events.db")?;
//! db.connection().execute("CREATE TABLE test (id INTEGER)", [])?;
//! # Ok::<(), rusqlite::Error>(())
//! ```

pub mod sqlite;

pub use sqlite::{remove_database_files, RecreateError, SqliteDatabase};
