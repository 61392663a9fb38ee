//! # river-sink
//!
//! The write side of the river: bulk operations and the clients that
//! execute them.
//!
//! ## Key Components
//!
//! - [`BulkOperation`] / [`BulkRequest`]: upserts and deletes addressed by index, id,
//!   routing and parent
//! - [`BulkSink`]: executes a batch and reports per-item failures
//! - [`DocumentStore`]: refresh + get, used to read the checkpoint back
//! - [`ElasticsearchClient`]: REST implementation of both traits
//! - [`MemorySink`]: in-process implementation for tests and dry runs

pub mod elasticsearch;
pub mod error;
pub mod memory;
pub mod operation;
pub mod sink;

pub use elasticsearch::{ElasticsearchClient, ElasticsearchConfig};
pub use error::SinkError;
pub use memory::MemorySink;
pub use operation::{BulkItemFailure, BulkOperation, BulkRequest, BulkResponse, DocumentAddress};
pub use sink::{BulkSink, DocumentStore};
