//! # river-core
//!
//! The streaming pipeline of the CouchDB river.
//!
//! A [`Slurper`] follows the continuous `_changes` feed and pushes raw lines
//! onto a bounded queue. An [`Indexer`] drains the queue, classifies and
//! transforms each change, and submits batches of upserts and deletes to a
//! [`river_sink::BulkSink`]. Each batch carries the write of its last `seq`
//! to the checkpoint document, which the reader resumes from after any
//! reconnect.
//!
//! ## Key Components
//!
//! - [`queue`]: bounded FIFO between reader and indexer (the backpressure point)
//! - [`CheckpointStore`]: reads the committed `seq` and builds checkpoint writes
//! - [`Slurper`]: feed reader with throttled reconnects
//! - [`Indexer`]: per-line classification and batch submission
//! - [`TransformHook`]: optional per-event rewrite or skip
//! - [`RetryPolicy`]: resubmission of rejected batches
//! - [`River`]: spawns and stops both tasks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use river_core::River;
//! use river_sink::MemorySink;
//! use river_types::RiverSettings;
//!
//! # async fn example() -> Result<(), river_core::RiverError> {
//! let mut settings = RiverSettings::default();
//! settings.couchdb.database = "orders".to_string();
//!
//! let sink = Arc::new(MemorySink::new());
//! let mut river = River::new(settings, sink.clone(), sink)?;
//! river.start()?;
//! // ...
//! river.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod indexer;
pub mod queue;
pub mod retry;
pub mod river;
pub mod slurper;
pub mod stats;
pub mod transform;

pub use checkpoint::CheckpointStore;
pub use error::{FeedError, RiverError, TransformError};
pub use indexer::{Indexer, IndexerConfig, LineOutcome};
pub use queue::{ChangeRecord, QueueReceiver, QueueSender};
pub use retry::RetryPolicy;
pub use river::{River, RiverState};
pub use slurper::{FeedConfig, Slurper};
pub use stats::{BatchStats, IndexerStats, StatsSnapshot};
pub use transform::{TransformChain, TransformHook, TransformResult, Transformed};
