//! Sink traits.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::SinkError;
use crate::operation::{BulkRequest, BulkResponse};

/// Executes batches of index/delete operations.
///
/// `Err` means the batch as a whole was not accepted; per-item rejections
/// are reported inside an `Ok` response.
#[async_trait]
pub trait BulkSink: Send + Sync {
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse, SinkError>;
}

/// Point reads against the sink, used to recover the checkpoint.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Make every acknowledged write to `index` visible to `get_source`.
    async fn refresh(&self, index: &str) -> Result<(), SinkError>;

    /// Fetch a document body, or `None` if it does not exist.
    async fn get_source(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<Map<String, Value>>, SinkError>;
}
