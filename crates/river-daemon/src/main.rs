//! CouchDB River
//!
//! Follows a CouchDB database's continuous changes feed and replays every
//! change into an Elasticsearch index, resuming from a checkpoint stored in
//! the index after any restart.
//!
//! # Usage
//!
//! ```bash
//! couchdb-river start [--database DB] [--couchdb-url URL] [--es-url URL]
//! couchdb-river checkpoint show
//! couchdb-river checkpoint reset
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/couchdb-river/config.toml)
//! 3. Environment variables (RIVER__SECTION__KEY)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use river_daemon::{
    reset_checkpoint, show_checkpoint, start_river, CheckpointCommands, Cli, Commands, Overrides,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            database,
            couchdb_url,
            es_url,
        } => {
            let overrides = Overrides {
                database,
                couchdb_url,
                es_url,
                log_level: cli.log_level,
            };
            start_river(cli.config.as_deref(), overrides).await?;
        }
        Commands::Checkpoint { database, command } => {
            let overrides = Overrides {
                database,
                log_level: cli.log_level,
                ..Default::default()
            };
            match command {
                CheckpointCommands::Show => {
                    show_checkpoint(cli.config.as_deref(), overrides).await?;
                }
                CheckpointCommands::Reset => {
                    reset_checkpoint(cli.config.as_deref(), overrides).await?;
                }
            }
        }
    }

    Ok(())
}
