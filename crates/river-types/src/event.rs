//! Decoded `_changes` records.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::seq::Seq;

/// Id prefix of CouchDB design documents, which are never indexed.
pub const DESIGN_DOC_PREFIX: &str = "_design/";

/// One change from the feed, as seen by the transform hook and the indexer.
///
/// The underscore-prefixed overrides (`_index`, `_type`, `_routing`,
/// `_parent`) are never sent by CouchDB; a transform sets them to redirect
/// a single event away from the configured defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Seq>,

    pub id: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Map<String, Value>>,

    /// Set by a transform to drop the event without touching the sink
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore: bool,

    #[serde(rename = "_index", default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    #[serde(rename = "_type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    #[serde(rename = "_routing", default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<String>,

    #[serde(rename = "_parent", default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    /// Everything else on the line (`changes`, `rev`, ...), kept for transforms
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ParsedEvent {
    /// Build a bare event for the given id.
    pub fn new(seq: impl Into<Seq>, id: impl Into<String>) -> Self {
        Self {
            seq: Some(seq.into()),
            id: id.into(),
            deleted: false,
            doc: None,
            ignore: false,
            index: None,
            doc_type: None,
            routing: None,
            parent: None,
            extra: Map::new(),
        }
    }

    /// Attach a document body.
    pub fn with_doc(mut self, doc: Map<String, Value>) -> Self {
        self.doc = Some(doc);
        self
    }

    /// Mark as a deletion.
    pub fn with_deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// Whether the id names a design document.
    pub fn is_design_doc(&self) -> bool {
        self.id.starts_with(DESIGN_DOC_PREFIX)
    }
}

/// A line from the feed after JSON decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedLine {
    /// A regular change record
    Change(ParsedEvent),
    /// A record carrying an `error` member
    Error(Value),
}

/// Decode one non-empty feed line.
///
/// Lines that are not JSON objects, or change records without a string
/// `id`, are reported as decoding errors.
pub fn decode_line(line: &str) -> Result<FeedLine, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("error").is_some() {
        return Ok(FeedLine::Error(value));
    }
    serde_json::from_value(value).map(FeedLine::Change)
}
