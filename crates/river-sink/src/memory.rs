//! In-memory sink for tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::SinkError;
use crate::operation::{BulkItem, BulkOperation, BulkRequest, BulkResponse};
use crate::sink::{BulkSink, DocumentStore};

#[derive(Default)]
struct MemoryState {
    documents: HashMap<(String, String), Map<String, Value>>,
    requests: Vec<BulkRequest>,
    fail_next: usize,
    refreshes: usize,
}

/// Applies bulk operations to a map and records every request it sees.
#[derive(Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject the next `n` bulk calls as whole-batch failures.
    pub fn fail_next(&self, n: usize) {
        self.state().fail_next = n;
    }

    /// Seed a document directly.
    pub fn put_document(&self, index: &str, id: &str, source: Map<String, Value>) {
        self.state()
            .documents
            .insert((index.to_string(), id.to_string()), source);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.state()
            .documents
            .get(&(index.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of stored documents in `index`.
    pub fn count(&self, index: &str) -> usize {
        self.state()
            .documents
            .keys()
            .filter(|(i, _)| i == index)
            .count()
    }

    /// Every accepted request, in submission order.
    pub fn requests(&self) -> Vec<BulkRequest> {
        self.state().requests.clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.state().refreshes
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn bulk(&self, request: &BulkRequest) -> Result<BulkResponse, SinkError> {
        let mut state = self.state();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }

        let mut items = Vec::with_capacity(request.number_of_actions());
        for op in request.operations() {
            let address = op.address();
            let key = (address.index.clone(), address.id.clone());
            let status = match op {
                BulkOperation::Index { source, .. } => {
                    match state.documents.insert(key, source.clone()) {
                        Some(_) => 200,
                        None => 201,
                    }
                }
                BulkOperation::Delete { .. } => match state.documents.remove(&key) {
                    Some(_) => 200,
                    None => 404,
                },
            };
            items.push(HashMap::from([(
                op.action().to_string(),
                BulkItem {
                    index: address.index.clone(),
                    id: address.id.clone(),
                    status,
                    error: None,
                },
            )]));
        }
        state.requests.push(request.clone());

        Ok(BulkResponse {
            took: 0,
            errors: false,
            items,
        })
    }
}

#[async_trait]
impl DocumentStore for MemorySink {
    async fn refresh(&self, _index: &str) -> Result<(), SinkError> {
        self.state().refreshes += 1;
        Ok(())
    }

    async fn get_source(
        &self,
        index: &str,
        id: &str,
    ) -> Result<Option<Map<String, Value>>, SinkError> {
        Ok(self.document(index, id))
    }
}
