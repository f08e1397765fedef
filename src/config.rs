//! EventSphere configuration (`config.toml`)
//!
//! Every field has a default, so a missing file or a partial file is fine.
//!
//! ```toml
//! [storage]
//! data_dir = "~/.local/share/eventsphere"
//! database = "events.db"
//! keystore = "keystore.db"
//! max_recovery_attempts = 1
//!
//! [clustering]
//! transport = "thread"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::clustering::TransportKind;
use crate::paths;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
}

/// Where the event and key databases live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Data directory, `~` is expanded
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Event database file, relative to `data_dir` unless absolute
    #[serde(default = "default_database")]
    pub database: String,

    /// Keystore file, relative to `data_dir` unless absolute
    #[serde(default = "default_keystore")]
    pub keystore: String,

    /// Rebuilds allowed per operation before corruption is reported
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: default_database(),
            keystore: default_keystore(),
            max_recovery_attempts: default_max_recovery_attempts(),
        }
    }
}

fn default_data_dir() -> String {
    paths::data_dir().to_string_lossy().to_string()
}

fn default_database() -> String {
    paths::DEFAULT_DATABASE_FILE.to_string()
}

fn default_keystore() -> String {
    paths::DEFAULT_KEYSTORE_FILE.to_string()
}

fn default_max_recovery_attempts() -> u32 {
    1
}

impl StorageConfig {
    /// Storage rooted at `dir`, other fields at their defaults
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            data_dir: dir.to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.data_dir).as_ref())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir_path().join(shellexpand::tilde(&self.database).as_ref())
    }

    pub fn keystore_path(&self) -> PathBuf {
        self.data_dir_path().join(shellexpand::tilde(&self.keystore).as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusteringConfig {
    /// How label requests reach the similarity computation
    #[serde(default)]
    pub transport: TransportKind,
}

impl Config {
    /// Load configuration.
    ///
    /// Lookup order: `explicit`, then `$EVENTSPHERE_CONFIG`, then the user
    /// config file. A missing file at the default location yields defaults;
    /// a missing file that was asked for explicitly is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        if let Some(path) = std::env::var_os(paths::CONFIG_ENV_VAR) {
            return Self::load_from_file(Path::new(&path));
        }

        let path = paths::config_path();
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::load_from_str(&content)
            .with_context(|| format!("Invalid config file: {:?}", path.as_ref()))
    }

    /// Load configuration from string
    pub fn load_from_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            anyhow::bail!("storage.data_dir must not be empty");
        }
        if self.storage.database.trim().is_empty() || self.storage.keystore.trim().is_empty() {
            anyhow::bail!("storage.database and storage.keystore must not be empty");
        }
        if self.storage.database_path() == self.storage.keystore_path() {
            anyhow::bail!("storage.database and storage.keystore must be different files");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::load_from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.storage.max_recovery_attempts, 1);
        assert_eq!(config.clustering.transport, TransportKind::Thread);
    }

    #[test]
    fn test_partial_config() {
        let config = Config::load_from_str(
            r#"
            [storage]
            data_dir = "/tmp/es"
            max_recovery_attempts = 3

            [clustering]
            transport = "inline"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.database_path(), PathBuf::from("/tmp/es/events.db"));
        assert_eq!(config.storage.keystore_path(), PathBuf::from("/tmp/es/keystore.db"));
        assert_eq!(config.storage.max_recovery_attempts, 3);
        assert_eq!(config.clustering.transport, TransportKind::Inline);
    }

    #[test]
    fn test_rejects_bad_config() {
        assert!(Config::load_from_str("[storage]\nunknown = 1").is_err());
        assert!(Config::load_from_str("[clustering]\ntransport = \"gpu\"").is_err());
        assert!(Config::load_from_str("[storage]\ndatabase = \"same.db\"\nkeystore = \"same.db\"").is_err());
    }

    #[test]
    fn test_tilde_expansion() {
        let storage = StorageConfig {
            data_dir: "~/eventsphere-data".to_string(),
            ..StorageConfig::default()
        };
        assert!(!storage.data_dir_path().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_load_from_file() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[storage]\nkeystore = \"keys.db\"\n")?;

        let config = Config::load(Some(&path))?;
        assert_eq!(config.storage.keystore, "keys.db");

        assert!(Config::load(Some(&temp.path().join("missing.toml"))).is_err());
        Ok(())
    }
}
