//! couchdb-river library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, checkpoint show/reset)

pub mod cli;
pub mod commands;

pub use cli::{CheckpointCommands, Cli, Commands};
pub use commands::{reset_checkpoint, show_checkpoint, start_river, Overrides};
