//! Configuration loading for the CouchDB river.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/couchdb-river/config.toml.

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Largest reader -> indexer queue a river will allocate.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Source database connection and feed options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchdbSettings {
    /// Base URL of the CouchDB server
    #[serde(default = "default_couchdb_url")]
    pub url: String,

    /// Database whose `_changes` feed is followed
    #[serde(default)]
    pub database: String,

    #[serde(default)]
    pub user: Option<String>,

    /// Password (prefer RIVER__COUCHDB__PASSWORD over the config file)
    #[serde(default)]
    pub password: Option<String>,

    /// Accept any TLS hostname. Explicit opt-in only.
    #[serde(default)]
    pub no_verify_hostname: bool,

    /// Heartbeat interval requested from the server
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Silence after which the connection is considered dead.
    /// Defaults to three heartbeats.
    #[serde(default)]
    pub read_timeout_ms: Option<u64>,

    /// Server-side filter function, e.g. `app/by_type`
    #[serde(default)]
    pub filter: Option<String>,

    /// Extra query parameters passed to the filter function
    #[serde(default)]
    pub filter_params: BTreeMap<String, String>,

    /// Strip `_attachments` from documents before indexing
    #[serde(default)]
    pub ignore_attachments: bool,
}

fn default_couchdb_url() -> String {
    "http://localhost:5984".to_string()
}

fn default_heartbeat_ms() -> u64 {
    10_000
}

impl Default for CouchdbSettings {
    fn default() -> Self {
        Self {
            url: default_couchdb_url(),
            database: String::new(),
            user: None,
            password: None,
            no_verify_hostname: false,
            heartbeat_ms: default_heartbeat_ms(),
            read_timeout_ms: None,
            filter: None,
            filter_params: BTreeMap::new(),
            ignore_attachments: false,
        }
    }
}

impl CouchdbSettings {
    /// Effective read timeout in milliseconds.
    pub fn read_timeout_ms(&self) -> u64 {
        self.read_timeout_ms
            .unwrap_or_else(|| self.heartbeat_ms.saturating_mul(3))
    }
}

/// Target index and batching options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// Base URL of the Elasticsearch cluster
    #[serde(default = "default_index_url")]
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Target index; defaults to the database name
    #[serde(default)]
    pub name: Option<String>,

    /// Mapping type for clusters that still use them
    #[serde(default)]
    pub doc_type: Option<String>,

    /// Maximum operations per bulk request
    #[serde(default = "default_bulk_size")]
    pub bulk_size: usize,

    /// How long to wait for more changes before flushing a batch
    #[serde(default = "default_bulk_timeout_ms")]
    pub bulk_timeout_ms: u64,

    /// Queue capacity between reader and indexer; defaults to bulk_size * 5
    #[serde(default)]
    pub throttle_size: Option<usize>,
}

fn default_index_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_bulk_size() -> usize {
    100
}

fn default_bulk_timeout_ms() -> u64 {
    10
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            url: default_index_url(),
            user: None,
            password: None,
            name: None,
            doc_type: None,
            bulk_size: default_bulk_size(),
            bulk_timeout_ms: default_bulk_timeout_ms(),
            throttle_size: None,
        }
    }
}

impl IndexSettings {
    /// Capacity of the reader -> indexer queue.
    pub fn queue_capacity(&self) -> usize {
        self.throttle_size
            .unwrap_or_else(|| self.bulk_size.saturating_mul(5))
    }
}

/// Identity of this river and its error pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiverSection {
    /// River name, part of the checkpoint document id
    #[serde(default = "default_river_name")]
    pub name: String,

    /// Index holding the checkpoint document
    #[serde(default = "default_river_index")]
    pub index: String,

    /// Pause after a feed I/O failure
    #[serde(default = "default_throttle_delay_ms")]
    pub throttle_delay_ms: u64,

    /// Pause after any other reader failure
    #[serde(default = "default_error_delay_ms")]
    pub error_delay_ms: u64,
}

fn default_river_name() -> String {
    "couchdb".to_string()
}

fn default_river_index() -> String {
    "river".to_string()
}

fn default_throttle_delay_ms() -> u64 {
    5_000
}

fn default_error_delay_ms() -> u64 {
    10_000
}

impl Default for RiverSection {
    fn default() -> Self {
        Self {
            name: default_river_name(),
            index: default_river_index(),
            throttle_delay_ms: default_throttle_delay_ms(),
            error_delay_ms: default_error_delay_ms(),
        }
    }
}

/// Retry policy for whole-batch sink failures.
///
/// `max_retries = 0` submits each batch exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub max_retries: u32,

    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_initial_interval_ms() -> u64 {
    100
}

fn default_max_interval_ms() -> u64 {
    5_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_interval_ms: default_initial_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

/// Main river settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiverSettings {
    #[serde(default)]
    pub couchdb: CouchdbSettings,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub river: RiverSection,

    #[serde(default)]
    pub retry: RetrySettings,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RiverSettings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/couchdb-river/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (RIVER__SECTION__KEY)
    ///
    /// CLI flags should be applied by the caller, followed by `validate()`.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir = ProjectDirs::from("", "", "couchdb-river")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RIVER")
                .separator("__")
                .try_parsing(true),
        );

        let settings: RiverSettings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Check the values the pipeline depends on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.couchdb.database.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "couchdb.database",
                reason: "must be set".to_string(),
            });
        }
        if self.couchdb.heartbeat_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "couchdb.heartbeat_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.couchdb.read_timeout_ms() == 0 {
            return Err(ConfigError::Invalid {
                key: "couchdb.read_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.index.bulk_size == 0 {
            return Err(ConfigError::Invalid {
                key: "index.bulk_size",
                reason: "must be > 0".to_string(),
            });
        }
        let capacity = self.index.queue_capacity();
        if capacity == 0 || capacity > MAX_QUEUE_CAPACITY {
            return Err(ConfigError::Invalid {
                key: "index.throttle_size",
                reason: format!("must be between 1 and {MAX_QUEUE_CAPACITY}, got {capacity}"),
            });
        }
        Ok(())
    }

    /// Index that receives documents when an event carries no override.
    pub fn index_name(&self) -> &str {
        self.index
            .name
            .as_deref()
            .unwrap_or(&self.couchdb.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = RiverSettings::default();
        assert_eq!(settings.couchdb.url, "http://localhost:5984");
        assert_eq!(settings.couchdb.heartbeat_ms, 10_000);
        assert_eq!(settings.couchdb.read_timeout_ms(), 30_000);
        assert_eq!(settings.index.bulk_size, 100);
        assert_eq!(settings.index.queue_capacity(), 500);
        assert_eq!(settings.river.name, "couchdb");
        assert_eq!(settings.retry.max_retries, 0);
        assert!(!settings.couchdb.no_verify_hostname);
    }

    #[test]
    fn test_index_name_falls_back_to_database() {
        let mut settings = RiverSettings::default();
        settings.couchdb.database = "orders".to_string();
        assert_eq!(settings.index_name(), "orders");

        settings.index.name = Some("orders-v2".to_string());
        assert_eq!(settings.index_name(), "orders-v2");
    }

    #[test]
    fn test_validate() {
        let mut settings = RiverSettings::default();
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "couchdb.database", .. })
        ));

        settings.couchdb.database = "db".to_string();
        assert!(settings.validate().is_ok());

        settings.index.throttle_size = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_queue() {
        let mut settings = RiverSettings::default();
        settings.couchdb.database = "db".to_string();

        settings.index.throttle_size = Some(usize::MAX);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "index.throttle_size", .. })
        ));

        // The derived capacity saturates instead of overflowing.
        settings.index.throttle_size = None;
        settings.index.bulk_size = usize::MAX;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "index.throttle_size", .. })
        ));

        settings.index.bulk_size = 100;
        settings.index.throttle_size = Some(MAX_QUEUE_CAPACITY);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_read_timeout() {
        let mut settings = RiverSettings::default();
        settings.couchdb.database = "db".to_string();
        settings.couchdb.read_timeout_ms = Some(0);
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::Invalid { key: "couchdb.read_timeout_ms", .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[couchdb]
database = "orders"
user = "admin"
password = "secret"
filter = "app/by_type"

[couchdb.filter_params]
type = "order"

[index]
bulk_size = 50
throttle_size = 7

[retry]
max_retries = 3
"#
        )
        .unwrap();

        let settings = RiverSettings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.couchdb.database, "orders");
        assert_eq!(settings.couchdb.user.as_deref(), Some("admin"));
        assert!(settings.couchdb.filter.is_some());
        assert_eq!(settings.couchdb.filter_params["type"], "order");
        assert_eq!(settings.index.bulk_size, 50);
        assert_eq!(settings.index.queue_capacity(), 7);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.river.index, "river");
    }

    #[test]
    fn test_load_missing_cli_file_fails() {
        let result = RiverSettings::load(Some("/nonexistent/couchdb-river.toml"));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
