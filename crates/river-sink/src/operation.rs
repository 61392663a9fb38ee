//! Bulk operations and responses.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Where a document lives in the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAddress {
    pub index: String,
    pub doc_type: Option<String>,
    pub id: String,
    pub routing: Option<String>,
    pub parent: Option<String>,
}

impl DocumentAddress {
    /// Address with no type, routing or parent.
    pub fn new(index: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            id: id.into(),
            routing: None,
            parent: None,
        }
    }

    fn metadata(&self) -> Value {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), json!(self.index));
        if let Some(doc_type) = &self.doc_type {
            meta.insert("_type".to_string(), json!(doc_type));
        }
        meta.insert("_id".to_string(), json!(self.id));
        if let Some(routing) = &self.routing {
            meta.insert("routing".to_string(), json!(routing));
        }
        if let Some(parent) = &self.parent {
            meta.insert("parent".to_string(), json!(parent));
        }
        Value::Object(meta)
    }
}

/// A single mutation in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Create or replace the document
    Index {
        address: DocumentAddress,
        source: Map<String, Value>,
    },
    /// Remove the document
    Delete { address: DocumentAddress },
}

impl BulkOperation {
    pub fn index(address: DocumentAddress, source: Map<String, Value>) -> Self {
        BulkOperation::Index { address, source }
    }

    pub fn delete(address: DocumentAddress) -> Self {
        BulkOperation::Delete { address }
    }

    pub fn address(&self) -> &DocumentAddress {
        match self {
            BulkOperation::Index { address, .. } | BulkOperation::Delete { address } => address,
        }
    }

    /// Action name as used in the bulk protocol.
    pub fn action(&self) -> &'static str {
        match self {
            BulkOperation::Index { .. } => "index",
            BulkOperation::Delete { .. } => "delete",
        }
    }
}

/// An ordered batch of operations, submitted in one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkRequest {
    operations: Vec<BulkOperation>,
}

impl BulkRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, operation: BulkOperation) {
        self.operations.push(operation);
    }

    pub fn number_of_actions(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn operations(&self) -> &[BulkOperation] {
        &self.operations
    }

    /// Encode as newline-delimited JSON: one action line per operation,
    /// followed by the source line for index actions.
    pub fn to_ndjson(&self) -> Result<String, serde_json::Error> {
        let mut body = String::new();
        for op in &self.operations {
            let mut action = Map::new();
            action.insert(op.action().to_string(), op.address().metadata());
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            if let BulkOperation::Index { source, .. } = op {
                body.push_str(&serde_json::to_string(source)?);
                body.push('\n');
            }
        }
        Ok(body)
    }
}

/// Outcome of one item in a bulk response.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub error: Option<Value>,
}

/// A rejected item, flattened for reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemFailure {
    pub position: usize,
    pub action: String,
    pub index: String,
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Response to a bulk request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItem>>,
}

impl BulkResponse {
    /// Whether any item failed.
    pub fn has_failures(&self) -> bool {
        self.errors || self.items.iter().flat_map(|i| i.values()).any(|i| i.error.is_some())
    }

    /// Items that carried an error.
    pub fn failures(&self) -> Vec<BulkItemFailure> {
        self.items
            .iter()
            .enumerate()
            .flat_map(|(position, entry)| {
                entry.iter().filter_map(move |(action, item)| {
                    item.error.as_ref().map(|error| BulkItemFailure {
                        position,
                        action: action.clone(),
                        index: item.index.clone(),
                        id: item.id.clone(),
                        status: item.status,
                        reason: error
                            .get("reason")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| error.to_string()),
                    })
                })
            })
            .collect()
    }

    /// Human-readable summary of every failed item.
    pub fn failure_message(&self) -> String {
        let mut message = String::from("failure in bulk execution:");
        for f in self.failures() {
            let _ = write!(
                message,
                "\n[{}]: {} index [{}], id [{}], status [{}], message [{}]",
                f.position, f.action, f.index, f.id, f.status, f.reason
            );
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_ndjson_index_and_delete() {
        let mut request = BulkRequest::new();
        let mut address = DocumentAddress::new("orders", "a");
        address.routing = Some("r".to_string());
        request.add(BulkOperation::index(address, doc(json!({"n": 1}))));
        request.add(BulkOperation::delete(DocumentAddress::new("orders", "b")));

        let body = request.to_ndjson().unwrap();
        let lines: Vec<Value> = body
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["index"]["_id"], json!("a"));
        assert_eq!(lines[0]["index"]["routing"], json!("r"));
        assert!(lines[0]["index"].get("_type").is_none());
        assert_eq!(lines[1], json!({"n": 1}));
        assert_eq!(lines[2]["delete"]["_id"], json!("b"));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_type_and_parent_emitted_when_set() {
        let mut address = DocumentAddress::new("i", "c");
        address.doc_type = Some("t".to_string());
        address.parent = Some("p".to_string());
        let mut request = BulkRequest::new();
        request.add(BulkOperation::delete(address));

        let body = request.to_ndjson().unwrap();
        let line: Value = serde_json::from_str(body.trim()).unwrap();
        assert_eq!(line["delete"]["_type"], json!("t"));
        assert_eq!(line["delete"]["parent"], json!("p"));
    }

    #[test]
    fn test_response_failures() {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_index": "orders", "_id": "a", "status": 201}},
                {"delete": {"_index": "orders", "_id": "b", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "bad field"}}}
            ]
        }))
        .unwrap();

        assert!(response.has_failures());
        let failures = response.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].position, 1);
        assert_eq!(failures[0].action, "delete");
        assert_eq!(failures[0].reason, "bad field");
        assert!(response.failure_message().contains("id [b]"));
    }

    #[test]
    fn test_response_without_failures() {
        let response: BulkResponse = serde_json::from_value(json!({
            "took": 1,
            "errors": false,
            "items": [{"index": {"_index": "orders", "_id": "a", "status": 200}}]
        }))
        .unwrap();
        assert!(!response.has_failures());
        assert!(response.failures().is_empty());
    }
}
