pub mod clustering;
pub mod config;
pub mod db;
pub mod migration;
pub mod paths;
pub mod secrets;
pub mod storage;
pub mod validation;

// Re-export commonly used types
pub use clustering::{cluster_coordinates, ClusterError, ClusterPipeline, ClusterResult};
pub use config::Config;
pub use storage::{AugmentedEvent, Category, Event, EventQuery, EventStore, StoreError};
pub use validation::{validate_augmented_event, validate_event, ValidationError};
