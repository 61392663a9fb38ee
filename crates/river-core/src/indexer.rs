//! Batch indexer.
//!
//! Drains the event queue, classifies each raw line, and submits batches of
//! upserts and deletes to the sink. Every batch that produced a checkpoint
//! candidate carries one trailing checkpoint write, so the stored position
//! only moves together with the mutations it covers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use river_sink::{BulkOperation, BulkRequest, BulkSink, DocumentAddress};
use river_types::{decode_line, FeedLine, ParsedEvent, RiverSettings, Seq};

use crate::checkpoint::CheckpointStore;
use crate::queue::{ChangeRecord, QueueReceiver};
use crate::retry::RetryPolicy;
use crate::stats::{BatchStats, IndexerStats};
use crate::transform::{TransformHook, Transformed};

/// Batching and addressing defaults.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Index used when an event carries no `_index` override
    pub index: String,
    /// Type used when an event carries no `_type` override
    pub doc_type: Option<String>,
    /// Maximum actions per batch, excluding the checkpoint write
    pub bulk_size: usize,
    /// How long to wait for the next record while filling a batch
    pub bulk_timeout: Duration,
    /// Strip `_attachments` from document bodies
    pub ignore_attachments: bool,
}

impl IndexerConfig {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            doc_type: None,
            bulk_size: 100,
            bulk_timeout: Duration::from_millis(10),
            ignore_attachments: false,
        }
    }

    pub fn from_settings(settings: &RiverSettings) -> Self {
        Self {
            index: settings.index_name().to_string(),
            doc_type: settings.index.doc_type.clone(),
            bulk_size: settings.index.bulk_size.max(1),
            bulk_timeout: Duration::from_millis(settings.index.bulk_timeout_ms),
            ignore_attachments: settings.couchdb.ignore_attachments,
        }
    }

    pub fn with_bulk_size(mut self, bulk_size: usize) -> Self {
        self.bulk_size = bulk_size.max(1);
        self
    }

    pub fn with_bulk_timeout(mut self, bulk_timeout: Duration) -> Self {
        self.bulk_timeout = bulk_timeout;
        self
    }
}

/// Classification of one queued line.
///
/// Everything except `Malformed` and `ErrorMarker` carries the event's
/// `seq` as a checkpoint candidate; only `Deleted` and `Indexed` carry a
/// sink mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    /// Not JSON, or not a change record
    Malformed,
    /// The feed reported an error in place of a change
    ErrorMarker,
    /// Design document, never indexed
    DesignDoc(Option<Seq>),
    /// The transform hook failed; the change is skipped for good
    TransformFailed(Option<Seq>),
    /// Marked `ignore` or skipped by the transform hook
    Ignored(Option<Seq>),
    Deleted(Option<Seq>, BulkOperation),
    Indexed(Option<Seq>, BulkOperation),
    /// Neither deleted nor carrying a document
    Unknown(Option<Seq>),
}

impl LineOutcome {
    /// Checkpoint candidate, if any.
    pub fn seq(&self) -> Option<&Seq> {
        match self {
            LineOutcome::Malformed | LineOutcome::ErrorMarker => None,
            LineOutcome::DesignDoc(seq)
            | LineOutcome::TransformFailed(seq)
            | LineOutcome::Ignored(seq)
            | LineOutcome::Unknown(seq)
            | LineOutcome::Deleted(seq, _)
            | LineOutcome::Indexed(seq, _) => seq.as_ref(),
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, LineOutcome::Deleted(..) | LineOutcome::Indexed(..))
    }

    fn into_parts(self) -> (Option<Seq>, Option<BulkOperation>) {
        match self {
            LineOutcome::Malformed | LineOutcome::ErrorMarker => (None, None),
            LineOutcome::DesignDoc(seq)
            | LineOutcome::TransformFailed(seq)
            | LineOutcome::Ignored(seq)
            | LineOutcome::Unknown(seq) => (seq, None),
            LineOutcome::Deleted(seq, op) | LineOutcome::Indexed(seq, op) => (seq, Some(op)),
        }
    }
}

/// Consumer side of the river.
pub struct Indexer {
    receiver: QueueReceiver,
    sink: Arc<dyn BulkSink>,
    checkpoint: CheckpointStore,
    config: IndexerConfig,
    transform: Option<Arc<dyn TransformHook>>,
    retry: RetryPolicy,
    stats: Arc<IndexerStats>,
    shutdown: CancellationToken,
}

impl Indexer {
    pub fn new(
        receiver: QueueReceiver,
        sink: Arc<dyn BulkSink>,
        checkpoint: CheckpointStore,
        config: IndexerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            sink,
            checkpoint,
            config,
            transform: None,
            retry: RetryPolicy::none(),
            stats: Arc::new(IndexerStats::new()),
            shutdown,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn TransformHook>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share totals with an outside observer.
    pub fn with_stats(mut self, stats: Arc<IndexerStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<IndexerStats> {
        self.stats.clone()
    }

    /// Consume the queue until stopped or until the reader side is gone.
    pub async fn run(mut self) {
        info!(index = %self.config.index, bulk_size = self.config.bulk_size, "Indexer started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let first = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                record = self.receiver.take() => record,
            };
            let Some(first) = first else {
                info!("Event queue closed");
                break;
            };
            if self.shutdown.is_cancelled() {
                break;
            }

            if AssertUnwindSafe(self.process_batch(first))
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Unexpected panic while indexing batch; continuing with next batch");
            }
        }

        info!("Closing indexer");
    }

    /// Build and submit one batch starting with `first`.
    pub async fn process_batch(&mut self, first: ChangeRecord) -> BatchStats {
        let mut request = BulkRequest::new();
        let mut stats = BatchStats::new();
        let mut last_seq = None;

        self.accept(&first, &mut request, &mut stats, &mut last_seq);

        while request.number_of_actions() < self.config.bulk_size {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                record = self.receiver.poll(self.config.bulk_timeout) => record,
            };
            let Some(record) = next else {
                break;
            };
            self.accept(&record, &mut request, &mut stats, &mut last_seq);
        }

        if let Some(seq) = &last_seq {
            match self.checkpoint.write_operation(seq) {
                Ok(op) => {
                    request.add(op);
                    stats.checkpoint = Some(seq.to_string());
                }
                Err(e) => {
                    error!(seq = %seq, error = %e, "Failed to serialize checkpoint; submitting batch without it");
                }
            }
        }

        if request.is_empty() {
            debug!(dropped = stats.dropped, "Nothing to submit");
            return stats;
        }

        debug!(
            mutations = stats.mutations(),
            consumed = stats.consumed(),
            checkpoint = stats.checkpoint.as_deref().unwrap_or("-"),
            "Submitting batch"
        );

        match self
            .retry
            .submit(self.sink.as_ref(), &request, &self.shutdown)
            .await
        {
            Ok(response) => {
                if response.has_failures() {
                    stats.failed = response.failures().len();
                    warn!(failed = stats.failed, "{}", response.failure_message());
                }
                debug!(
                    indexed = stats.indexed,
                    deleted = stats.deleted,
                    skipped = stats.skipped,
                    dropped = stats.dropped,
                    took_ms = response.took,
                    "Batch submitted"
                );
                self.stats.record(&stats);
            }
            Err(e) => {
                error!(
                    error = %e,
                    actions = request.number_of_actions(),
                    "Failed to execute bulk request"
                );
                stats.checkpoint = None;
                self.stats.record_failed_batch();
            }
        }

        stats
    }

    fn accept(
        &self,
        record: &ChangeRecord,
        request: &mut BulkRequest,
        stats: &mut BatchStats,
        last_seq: &mut Option<Seq>,
    ) {
        let outcome = self.process_line(record.as_str());
        match &outcome {
            LineOutcome::Malformed | LineOutcome::ErrorMarker => stats.record_drop(),
            LineOutcome::Indexed(..) => stats.record_index(),
            LineOutcome::Deleted(..) => stats.record_delete(),
            _ => stats.record_skip(),
        }

        let (seq, op) = outcome.into_parts();
        if let Some(op) = op {
            request.add(op);
        }
        if seq.is_some() {
            *last_seq = seq;
        }
    }

    /// Classify one raw line and build its sink operation.
    pub fn process_line(&self, line: &str) -> LineOutcome {
        let event = match decode_line(line) {
            Ok(FeedLine::Change(event)) => event,
            Ok(FeedLine::Error(value)) => {
                warn!(error = %value, "Received error from changes feed");
                return LineOutcome::ErrorMarker;
            }
            Err(e) => {
                warn!(error = %e, line, "Failed to parse change");
                return LineOutcome::Malformed;
            }
        };

        let seq = event.seq.clone();
        let id = event.id.clone();
        trace!(seq = ?seq, id = %id, "Processing change");

        if event.is_design_doc() {
            trace!(id = %id, "Ignoring design document");
            return LineOutcome::DesignDoc(seq);
        }

        let event = match &self.transform {
            None => event,
            Some(hook) => match hook.transform(event) {
                Ok(Transformed::Event(event)) => event,
                Ok(Transformed::Skip) => {
                    trace!(id = %id, "Skipped by transform");
                    return LineOutcome::Ignored(seq);
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "Failed to transform change; skipping it");
                    return LineOutcome::TransformFailed(seq);
                }
            },
        };

        if event.ignore {
            trace!(id = %id, "Ignoring change");
            return LineOutcome::Ignored(seq);
        }

        let address = self.address(&event, id);
        if event.deleted {
            return LineOutcome::Deleted(seq, BulkOperation::delete(address));
        }

        match event.doc {
            Some(mut doc) => {
                if self.config.ignore_attachments {
                    doc.remove("_attachments");
                }
                LineOutcome::Indexed(seq, BulkOperation::index(address, doc))
            }
            None => {
                warn!(id = %address.id, "Ignoring unknown change");
                LineOutcome::Unknown(seq)
            }
        }
    }

    fn address(&self, event: &ParsedEvent, id: String) -> DocumentAddress {
        DocumentAddress {
            index: event
                .index
                .clone()
                .unwrap_or_else(|| self.config.index.clone()),
            doc_type: event.doc_type.clone().or_else(|| self.config.doc_type.clone()),
            id,
            routing: event.routing.clone(),
            parent: event.parent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransformError;
    use crate::queue::{self, QueueSender};
    use crate::transform::TransformResult;
    use river_sink::MemorySink;
    use serde_json::{json, Value};

    fn change(seq: u64, id: &str, doc: Value) -> String {
        json!({"seq": seq, "id": id, "changes": [{"rev": "1-a"}], "doc": doc}).to_string()
    }

    fn deletion(seq: u64, id: &str) -> String {
        json!({"seq": seq, "id": id, "deleted": true, "changes": [{"rev": "2-b"}]}).to_string()
    }

    struct Fixture {
        sink: Arc<MemorySink>,
        checkpoint: CheckpointStore,
        tx: QueueSender,
        indexer: Indexer,
    }

    fn fixture(bulk_size: usize) -> Fixture {
        let sink = Arc::new(MemorySink::new());
        let checkpoint = CheckpointStore::new(sink.clone(), "river", "couchdb", "db");
        let (tx, rx) = queue::bounded(64);
        let config = IndexerConfig::new("db").with_bulk_size(bulk_size);
        let indexer = Indexer::new(
            rx,
            sink.clone(),
            checkpoint.clone(),
            config,
            CancellationToken::new(),
        );
        Fixture {
            sink,
            checkpoint,
            tx,
            indexer,
        }
    }

    async fn feed(tx: QueueSender, lines: Vec<String>) {
        for line in lines {
            tx.put(ChangeRecord::new(line)).await.unwrap();
        }
    }

    fn mutations(request: &BulkRequest) -> Vec<&BulkOperation> {
        request
            .operations()
            .iter()
            .filter(|op| op.address().index != "river")
            .collect()
    }

    #[tokio::test]
    async fn test_design_doc_and_delete_scenario() {
        let f = fixture(100);
        feed(
            f.tx,
            vec![
                change(1, "doc-1", json!({"_id": "doc-1", "n": 1})),
                change(2, "doc-2", json!({"_id": "doc-2", "n": 2})),
                change(3, "_design/app", json!({"views": {}})),
                change(4, "doc-4", json!({"_id": "doc-4", "n": 4})),
                deletion(5, "doc-9"),
            ],
        )
        .await;

        f.indexer.run().await;

        let requests = f.sink.requests();
        assert_eq!(requests.len(), 1);
        let ops = mutations(&requests[0]);
        assert_eq!(ops.len(), 4);
        let ids: Vec<_> = ops.iter().map(|op| op.address().id.as_str()).collect();
        assert_eq!(ids, vec!["doc-1", "doc-2", "doc-4", "doc-9"]);
        assert_eq!(ops[3].action(), "delete");

        // The checkpoint write trails the mutations.
        let last = requests[0].operations().last().unwrap();
        assert_eq!(last.address().id, "couchdb_seq");
        assert_eq!(f.checkpoint.read().await.unwrap(), Some("5".to_string()));
    }

    #[tokio::test]
    async fn test_transform_failure_still_advances_checkpoint() {
        let f = fixture(100);
        let hook = |event: ParsedEvent| -> TransformResult {
            if event.id == "bad" {
                Err(TransformError::new("cannot map"))
            } else {
                Ok(Transformed::Event(event))
            }
        };
        let indexer = f.indexer.with_transform(Arc::new(hook));
        feed(
            f.tx,
            vec![
                change(6, "good", json!({"k": 1})),
                change(7, "bad", json!({"k": 2})),
            ],
        )
        .await;

        indexer.run().await;

        assert!(f.sink.document("db", "good").is_some());
        assert!(f.sink.document("db", "bad").is_none());
        assert_eq!(f.checkpoint.read().await.unwrap(), Some("7".to_string()));
    }

    #[test]
    fn test_deleted_wins_over_doc() {
        let f = fixture(100);
        let line =
            json!({"seq": 3, "id": "a", "deleted": true, "doc": {"_id": "a", "_deleted": true}})
                .to_string();

        let outcome = f.indexer.process_line(&line);
        assert!(matches!(outcome, LineOutcome::Deleted(Some(_), BulkOperation::Delete { .. })));
    }

    #[test]
    fn test_unknown_change_advances_without_mutation() {
        let f = fixture(100);
        let line = json!({"seq": 8, "id": "a", "changes": []}).to_string();

        let outcome = f.indexer.process_line(&line);
        assert_eq!(outcome, LineOutcome::Unknown(Some(Seq::from(8))));
        assert!(!outcome.is_mutation());
    }

    #[test]
    fn test_malformed_and_error_lines_yield_no_seq() {
        let f = fixture(100);

        let outcome = f.indexer.process_line("{not json");
        assert_eq!(outcome, LineOutcome::Malformed);
        assert!(outcome.seq().is_none());

        let outcome = f.indexer.process_line(r#"{"error":"not_found","reason":"missing"}"#);
        assert_eq!(outcome, LineOutcome::ErrorMarker);
        assert!(outcome.seq().is_none());
    }

    #[test]
    fn test_overrides_and_attachments() {
        let sink = Arc::new(MemorySink::new());
        let (_tx, rx) = queue::bounded(1);
        let mut config = IndexerConfig::new("db");
        config.doc_type = Some("couchdb".to_string());
        config.ignore_attachments = true;
        let hook = |mut event: ParsedEvent| -> TransformResult {
            event.index = Some("archive".to_string());
            event.routing = Some("tenant-1".to_string());
            event.parent = Some("p-1".to_string());
            Ok(Transformed::Event(event))
        };
        let indexer = Indexer::new(
            rx,
            sink.clone(),
            CheckpointStore::new(sink, "river", "couchdb", "db"),
            config,
            CancellationToken::new(),
        )
        .with_transform(Arc::new(hook));

        let line = change(
            2,
            "a",
            json!({"_id": "a", "_attachments": {"f.txt": {"data": "aGk="}}, "title": "t"}),
        );
        let LineOutcome::Indexed(_, BulkOperation::Index { address, source }) =
            indexer.process_line(&line)
        else {
            panic!("Expected upsert");
        };

        assert_eq!(address.index, "archive");
        assert_eq!(address.doc_type.as_deref(), Some("couchdb"));
        assert_eq!(address.routing.as_deref(), Some("tenant-1"));
        assert_eq!(address.parent.as_deref(), Some("p-1"));
        assert!(!source.contains_key("_attachments"));
        assert_eq!(source["title"], json!("t"));
    }

    #[test]
    fn test_ignore_flag_and_skip() {
        let f = fixture(100);
        let indexer = f.indexer.with_transform(Arc::new(|mut event: ParsedEvent| -> TransformResult {
            if event.id == "skip" {
                return Ok(Transformed::Skip);
            }
            event.ignore = event.id == "ignore";
            Ok(Transformed::Event(event))
        }));

        let ignored = indexer.process_line(&change(1, "ignore", json!({})));
        assert_eq!(ignored, LineOutcome::Ignored(Some(Seq::from(1))));
        let skipped = indexer.process_line(&change(2, "skip", json!({})));
        assert_eq!(skipped, LineOutcome::Ignored(Some(Seq::from(2))));
    }

    #[tokio::test]
    async fn test_batches_split_at_bulk_size() {
        let f = fixture(2);
        feed(
            f.tx,
            (1..=5)
                .map(|i| change(i, &format!("doc-{i}"), json!({"n": i})))
                .collect(),
        )
        .await;

        let stats = f.indexer.stats();
        f.indexer.run().await;

        let requests = f.sink.requests();
        let sizes: Vec<_> = requests.iter().map(|r| mutations(r).len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(requests
            .iter()
            .all(|r| r.operations().last().unwrap().address().id == "couchdb_seq"));
        assert_eq!(f.checkpoint.read().await.unwrap(), Some("5".to_string()));

        let totals = stats.snapshot();
        assert_eq!(totals.batches, 3);
        assert_eq!(totals.indexed, 5);
    }

    #[tokio::test]
    async fn test_dropped_lines_do_not_advance_checkpoint() {
        let f = fixture(100);
        feed(
            f.tx,
            vec![
                change(1, "a", json!({})),
                "garbage".to_string(),
                r#"{"error":"unauthorized"}"#.to_string(),
            ],
        )
        .await;

        f.indexer.run().await;

        assert_eq!(f.checkpoint.read().await.unwrap(), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_only_dropped_lines_submit_nothing() {
        let mut f = fixture(100);
        drop(f.tx);

        let stats = f
            .indexer
            .process_batch(ChangeRecord::new("garbage"))
            .await;
        assert_eq!(stats.dropped, 1);
        assert!(f.sink.requests().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_is_not_retried_by_default() {
        let f = fixture(100);
        f.sink.fail_next(1);
        feed(f.tx.clone(), vec![change(1, "a", json!({}))]).await;

        let stats = f.indexer.stats();
        let handle = tokio::spawn(f.indexer.run());
        // Wait until the first batch has been rejected.
        while stats.snapshot().failed_batches == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        feed(f.tx, vec![change(2, "b", json!({}))]).await;
        handle.await.unwrap();

        assert!(f.sink.document("db", "a").is_none());
        assert!(f.sink.document("db", "b").is_some());
        assert_eq!(f.checkpoint.read().await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_panic_in_batch_is_contained() {
        let f = fixture(1);
        let indexer = f.indexer.with_transform(Arc::new(|event: ParsedEvent| -> TransformResult {
            if event.id == "boom" {
                panic!("transform exploded");
            }
            Ok(Transformed::Event(event))
        }));
        feed(
            f.tx,
            vec![change(1, "boom", json!({})), change(2, "ok", json!({}))],
        )
        .await;

        indexer.run().await;

        assert!(f.sink.document("db", "ok").is_some());
        assert_eq!(f.checkpoint.read().await.unwrap(), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_stop_exits_while_waiting() {
        let f = fixture(100);
        let shutdown = CancellationToken::new();
        let (_tx, rx) = queue::bounded(1);
        let indexer = Indexer::new(
            rx,
            f.sink.clone(),
            f.checkpoint.clone(),
            IndexerConfig::new("db"),
            shutdown.clone(),
        );

        let handle = tokio::spawn(indexer.run());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(f.sink.requests().is_empty());
    }
}
