//! Command implementations for couchdb-river.
//!
//! Handles:
//! - start: run the river until SIGINT/SIGTERM
//! - checkpoint show: print the stored seq
//! - checkpoint reset: delete the checkpoint document

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use river_core::{CheckpointStore, River};
use river_sink::{BulkRequest, BulkSink, ElasticsearchClient, ElasticsearchConfig};
use river_types::RiverSettings;

/// CLI values that take precedence over every other config source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database: Option<String>,
    pub couchdb_url: Option<String>,
    pub es_url: Option<String>,
    pub log_level: Option<String>,
}

impl Overrides {
    /// Apply onto loaded settings.
    pub fn apply(self, settings: &mut RiverSettings) {
        if let Some(database) = self.database {
            settings.couchdb.database = database;
        }
        if let Some(url) = self.couchdb_url {
            settings.couchdb.url = url;
        }
        if let Some(url) = self.es_url {
            settings.index.url = url;
        }
        if let Some(log_level) = self.log_level {
            settings.log_level = log_level;
        }
    }
}

/// Load, override and validate settings.
pub fn resolve_settings(config_path: Option<&str>, overrides: Overrides) -> Result<RiverSettings> {
    let mut settings = RiverSettings::load(config_path).context("Failed to load configuration")?;
    overrides.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn elasticsearch(settings: &RiverSettings) -> Result<Arc<ElasticsearchClient>> {
    let mut config = ElasticsearchConfig::new(settings.index.url.clone());
    if let Some(user) = &settings.index.user {
        config = config.with_basic_auth(user.clone(), settings.index.password.clone());
    }
    let client = ElasticsearchClient::new(config).context("Failed to create Elasticsearch client")?;
    Ok(Arc::new(client))
}

/// Resolve once either SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the river.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Connect the Elasticsearch sink
/// 3. Spawn the feed reader and indexer
/// 4. Stop gracefully on SIGINT/SIGTERM
pub async fn start_river(config_path: Option<&str>, overrides: Overrides) -> Result<()> {
    let settings = resolve_settings(config_path, overrides)?;
    init_logging(&settings.log_level)?;

    info!("CouchDB river starting...");
    info!("Configuration:");
    info!("  CouchDB: {}/{}", settings.couchdb.url, settings.couchdb.database);
    info!("  Elasticsearch: {}/{}", settings.index.url, settings.index_name());
    info!("  Bulk size: {}", settings.index.bulk_size);
    info!("  Log level: {}", settings.log_level);

    let sink = elasticsearch(&settings)?;
    let mut river = River::new(settings, sink.clone(), sink).context("Failed to create river")?;
    river.start().context("Failed to start river")?;

    shutdown_signal().await;

    river.stop().await.context("Failed to stop river")?;
    let stats = river.stats();
    info!(
        batches = stats.batches,
        indexed = stats.indexed,
        deleted = stats.deleted,
        failed_batches = stats.failed_batches,
        "River shut down"
    );

    Ok(())
}

/// Print the stored checkpoint for the configured database.
pub async fn show_checkpoint(config_path: Option<&str>, overrides: Overrides) -> Result<()> {
    let settings = resolve_settings(config_path, overrides)?;
    init_logging(&settings.log_level)?;

    let sink = elasticsearch(&settings)?;
    let checkpoint = CheckpointStore::from_settings(sink, &settings);
    let last_seq = checkpoint
        .read()
        .await
        .context("Failed to read checkpoint")?;

    println!("Database: {}", settings.couchdb.database);
    match last_seq {
        Some(seq) => println!("Last seq: {}", seq),
        None => println!("Last seq: (none, the next start replays from the beginning)"),
    }

    Ok(())
}

/// Delete the stored checkpoint for the configured database.
pub async fn reset_checkpoint(config_path: Option<&str>, overrides: Overrides) -> Result<()> {
    let settings = resolve_settings(config_path, overrides)?;
    init_logging(&settings.log_level)?;

    let sink = elasticsearch(&settings)?;
    let checkpoint = CheckpointStore::from_settings(sink.clone(), &settings);

    let mut request = BulkRequest::new();
    request.add(checkpoint.reset_operation());
    let response = sink
        .bulk(&request)
        .await
        .context("Failed to delete checkpoint")?;
    if response.has_failures() {
        anyhow::bail!(response.failure_message());
    }

    println!("Checkpoint reset for {}", settings.couchdb.database);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_overrides_win() {
        let mut settings = RiverSettings::default();
        settings.couchdb.database = "from-file".to_string();

        Overrides {
            database: Some("orders".to_string()),
            es_url: Some("http://es:9200".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        }
        .apply(&mut settings);

        assert_eq!(settings.couchdb.database, "orders");
        assert_eq!(settings.couchdb.url, "http://localhost:5984");
        assert_eq!(settings.index.url, "http://es:9200");
        assert_eq!(settings.log_level, "debug");
    }

    #[test]
    fn test_resolve_settings_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[couchdb]
database = "orders"

[index]
bulk_size = 25
"#
        )
        .unwrap();

        let path = file.path().to_string_lossy().to_string();
        let settings = resolve_settings(
            Some(&path),
            Overrides {
                couchdb_url: Some("http://couch:5984".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(settings.couchdb.database, "orders");
        assert_eq!(settings.couchdb.url, "http://couch:5984");
        assert_eq!(settings.index.bulk_size, 25);
    }

    #[test]
    fn test_resolve_settings_requires_database() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "log_level = \"warn\"").unwrap();

        let path = file.path().to_string_lossy().to_string();
        assert!(resolve_settings(Some(&path), Overrides::default()).is_err());
    }
}
