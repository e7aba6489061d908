//! Configuration loading for threadpost-node.
//!
//! Configuration is loaded from a TOML file. Every field has a default, so an
//! empty file (or a missing section) is a valid configuration.

use serde::Deserialize;
use std::path::PathBuf;
use threadpost_core::DEFAULT_PAGE_SIZE;

/// Database path that selects an in-memory store.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Root configuration for a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Outbox configuration.
    #[serde(default)]
    pub outbox: OutboxConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Outbox configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// Messages loaded per flush page (default: 16).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Seconds between scheduled flushes (default: 60).
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
    /// Run the background flush task (default: true).
    #[serde(default = "default_flush_enabled")]
    pub flush_enabled: bool,
}

// Default value functions
fn default_database_path() -> PathBuf {
    PathBuf::from("threadpost.db")
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_flush_interval() -> u64 {
    60
}

fn default_flush_enabled() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            flush_interval_secs: default_flush_interval(),
            flush_enabled: default_flush_enabled(),
        }
    }
}

impl StorageConfig {
    /// Whether the database lives only in memory.
    pub fn is_in_memory(&self) -> bool {
        self.database.as_os_str() == IN_MEMORY_DATABASE
    }
}

impl Config {
    /// Configuration with an in-memory database (for testing).
    pub fn in_memory() -> Self {
        Self {
            storage: StorageConfig {
                database: PathBuf::from(IN_MEMORY_DATABASE),
            },
            outbox: OutboxConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.storage.database, PathBuf::from("threadpost.db"));
        assert_eq!(config.outbox.page_size, 16);
        assert_eq!(config.outbox.flush_interval_secs, 60);
        assert!(config.outbox.flush_enabled);
        assert!(!config.storage.is_in_memory());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[storage]
database = "/data/peer.db"

[outbox]
page_size = 4
flush_interval_secs = 5
flush_enabled = false
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.storage.database, PathBuf::from("/data/peer.db"));
        assert_eq!(config.outbox.page_size, 4);
        assert_eq!(config.outbox.flush_interval_secs, 5);
        assert!(!config.outbox.flush_enabled);
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let config: Config = toml::from_str("[outbox]\npage_size = 2\n").unwrap();
        assert_eq!(config.outbox.page_size, 2);
        assert_eq!(config.outbox.flush_interval_secs, 60);
        assert_eq!(config.storage.database, PathBuf::from("threadpost.db"));

        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.outbox.page_size, 16);
    }

    #[test]
    fn in_memory_config() {
        assert!(Config::in_memory().storage.is_in_memory());
    }

    #[test]
    fn from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[storage]\ndatabase = \":memory:\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.storage.is_in_memory());
    }

    #[test]
    fn from_file_reports_path() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/peer.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
        assert!(err.to_string().contains("/nonexistent/peer.toml"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[outbox]\npage_size = \"many\"").unwrap();
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }
}
