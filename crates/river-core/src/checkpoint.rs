//! Checkpoint tracking for the river.
//!
//! The last committed `seq` lives in a single document in the sink:
//!
//! ```json
//! { "<database>": { "last_seq": "<seq>", "updated_at": "<rfc3339>" } }
//! ```
//!
//! Reads go through [`DocumentStore`] after a forced refresh. Writes are
//! never issued directly; [`CheckpointStore::write_operation`] produces an
//! operation the indexer appends to the same bulk request as the mutations
//! it covers.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;

use river_sink::{BulkOperation, DocumentAddress, DocumentStore, SinkError};
use river_types::{RiverSettings, Seq};

/// Field holding the checkpoint inside the per-database object.
pub const LAST_SEQ: &str = "last_seq";

/// Reads and builds writes for this river's checkpoint document.
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
    index: String,
    doc_id: String,
    database: String,
}

impl CheckpointStore {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        river_index: impl Into<String>,
        river_name: &str,
        database: impl Into<String>,
    ) -> Self {
        Self {
            store,
            index: river_index.into(),
            doc_id: format!("{river_name}_seq"),
            database: database.into(),
        }
    }

    pub fn from_settings(store: Arc<dyn DocumentStore>, settings: &RiverSettings) -> Self {
        Self::new(
            store,
            settings.river.index.clone(),
            &settings.river.name,
            settings.couchdb.database.clone(),
        )
    }

    /// Location of the checkpoint document.
    pub fn address(&self) -> DocumentAddress {
        DocumentAddress::new(self.index.clone(), self.doc_id.clone())
    }

    /// Read the last committed checkpoint, or `None` to start from the origin.
    pub async fn read(&self) -> Result<Option<String>, SinkError> {
        self.store.refresh(&self.index).await?;

        let Some(source) = self.store.get_source(&self.index, &self.doc_id).await? else {
            info!(index = %self.index, id = %self.doc_id, "No {} value found in index", LAST_SEQ);
            return Ok(None);
        };

        let last_seq = source
            .get(&self.database)
            .and_then(Value::as_object)
            .and_then(|db| db.get(LAST_SEQ))
            .and_then(|value| match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            });

        match &last_seq {
            Some(seq) => info!(last_seq = %seq, "Read {} from index", LAST_SEQ),
            None => info!("Checkpoint document has no {} for this database", LAST_SEQ),
        }
        Ok(last_seq)
    }

    /// Upsert of the checkpoint document recording `seq`.
    pub fn write_operation(&self, seq: &Seq) -> Result<BulkOperation, serde_json::Error> {
        let last_seq = seq.to_checkpoint()?;

        let mut source = Map::new();
        source.insert(
            self.database.clone(),
            json!({
                LAST_SEQ: last_seq,
                "updated_at": Utc::now().to_rfc3339(),
            }),
        );
        Ok(BulkOperation::index(self.address(), source))
    }

    /// Delete of the checkpoint document; the next connection starts from the origin.
    pub fn reset_operation(&self) -> BulkOperation {
        BulkOperation::delete(self.address())
    }
}
