//! Storage layer for EventSphere - encrypted SQLite event store
//!
//! Events are split on write:
//! - time and position stay in plaintext, indexed columns
//! - title and category are sealed with XChaCha20-Poly1305
//!
//! # Example
//!
//! ```no_run
//! use eventsphere::storage::{Category, Event, EventStore};
//!
//! let store = EventStore::open_in_memory()?;
//! store.create(&Event {
//!     id: "evt-1".into(),
//!     title: "Flooding in the delta".into(),
//!     category: Category::NaturalDisaster,
//!     latitude: 23.7,
//!     longitude: 90.4,
//!     timestamp: 1_700_000_000_000,
//! })?;
//! assert_eq!(store.count()?, 1);
//! # Ok::<(), eventsphere::storage::StoreError>(())
//! ```

pub mod error;
pub mod events;
pub mod records;
pub mod subscribers;
pub mod types;

pub use error::{is_corruption, StoreError};
pub use events::{EventStore, StoreOptions};
pub use records::StoredRecord;
pub use subscribers::{SubscriberRegistry, SubscriptionId};
pub use types::{AugmentedEvent, Category, Event, EventQuery, GeoBounds, GeoCoordinate};
