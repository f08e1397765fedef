//! Single source of truth for the EventSphere filesystem layout.
//!
//! This module defines WHERE data lives. It has no I/O and no validation.
//!
//! ```text
//! <config_dir>/eventsphere/
//! └── config.toml              # Optional user config
//!
//! <data_local_dir>/eventsphere/
//! ├── events.db                # Encrypted event table (rebuildable on corruption)
//! └── keystore.db              # Exported encryption key (survives rebuilds)
//! ```

use std::path::PathBuf;

/// Environment variable pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "EVENTSPHERE_CONFIG";

/// Environment variable holding the `tracing` filter for the CLI.
pub const LOG_ENV_VAR: &str = "EVENTSPHERE_LOG";

/// Default event database file name inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "events.db";

/// Default keystore file name inside the data directory.
pub const DEFAULT_KEYSTORE_FILE: &str = "keystore.db";

/// Data directory: `<data_local_dir>/eventsphere/`
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eventsphere")
}

/// User config file: `<config_dir>/eventsphere/config.toml`
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eventsphere")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_names() {
        assert!(data_dir().ends_with("eventsphere"));
        assert!(config_path().to_string_lossy().ends_with("config.toml"));
        assert_ne!(DEFAULT_DATABASE_FILE, DEFAULT_KEYSTORE_FILE);
    }
}
