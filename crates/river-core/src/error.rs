//! Error types for the river pipeline.

use std::time::Duration;

use river_sink::SinkError;
use river_types::ConfigError;
use thiserror::Error;

/// Failures of one `_changes` connection attempt.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The checkpoint could not be read back from the sink
    #[error("Checkpoint read failed: {0}")]
    Checkpoint(#[from] SinkError),

    /// The feed URL could not be built
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(String),

    /// Connection refused, TLS failure, reset before headers
    #[error("Connection failed: {0}")]
    Connect(#[from] reqwest::Error),

    /// The source answered with a non-success status
    #[error("Feed returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The stream broke mid-body
    #[error("Read failed: {0}")]
    Read(#[from] std::io::Error),

    /// Nothing arrived, not even a heartbeat
    #[error("No data received for {0:?}")]
    Silent(Duration),

    /// The indexer side of the queue is gone
    #[error("Event queue closed")]
    QueueClosed,
}

impl FeedError {
    /// Transport failures are throttled and retried from the last checkpoint.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::Connect(_) | FeedError::Status { .. } | FeedError::Read(_) | FeedError::Silent(_)
        )
    }
}

/// A transform hook rejected an event.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Transform failed: {0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(reason: impl Into<String>) -> Self {
        TransformError(reason.into())
    }
}

/// Errors surfaced by the river lifecycle.
#[derive(Error, Debug)]
pub enum RiverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("River is already running")]
    AlreadyRunning,

    #[error("River is not running")]
    NotRunning,

    /// A stopped river cannot be restarted; build a new one
    #[error("River has been stopped")]
    Stopped,

    #[error("River task failed: {0}")]
    Task(String),
}
