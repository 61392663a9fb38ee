//! CLI argument parsing for couchdb-river.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// CouchDB River
///
/// Replicates a CouchDB changes feed into an Elasticsearch index.
#[derive(Parser, Debug)]
#[command(name = "couchdb-river")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/couchdb-river/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// River commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Follow the changes feed until interrupted
    Start {
        /// Source database (overrides couchdb.database)
        #[arg(short, long)]
        database: Option<String>,

        /// CouchDB base URL (overrides couchdb.url)
        #[arg(long)]
        couchdb_url: Option<String>,

        /// Elasticsearch base URL (overrides index.url)
        #[arg(long)]
        es_url: Option<String>,
    },

    /// Inspect or reset the stored checkpoint
    Checkpoint {
        /// Source database (overrides couchdb.database)
        #[arg(short, long, global = true)]
        database: Option<String>,

        #[command(subcommand)]
        command: CheckpointCommands,
    },
}

/// Checkpoint subcommands
#[derive(Subcommand, Debug)]
pub enum CheckpointCommands {
    /// Print the last committed seq
    Show,

    /// Delete the checkpoint; the next start replays the feed from the beginning
    Reset,
}
