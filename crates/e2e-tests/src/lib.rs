//! End-to-end test infrastructure for the CouchDB river.
//!
//! Provides a shared TestHarness (a mock CouchDB `_changes` endpoint plus an
//! in-memory sink) and builders for feed lines.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use river_core::{CheckpointStore, River};
use river_sink::MemorySink;
use river_types::RiverSettings;

/// Database name used by every harness.
pub const DATABASE: &str = "orders";

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Mock CouchDB server
    pub couch: MockServer,
    /// Sink receiving mutations and holding the checkpoint document
    pub sink: Arc<MemorySink>,
    /// Settings pointed at `couch`, with short delays
    pub settings: RiverSettings,
}

impl TestHarness {
    /// Start a mock CouchDB and an empty sink.
    pub async fn new() -> Self {
        let couch = MockServer::start().await;

        let mut settings = RiverSettings::default();
        settings.couchdb.url = couch.uri();
        settings.couchdb.database = DATABASE.to_string();
        settings.index.bulk_timeout_ms = 200;
        settings.river.throttle_delay_ms = 20;
        settings.river.error_delay_ms = 20;

        Self {
            couch,
            sink: Arc::new(MemorySink::new()),
            settings,
        }
    }

    /// Build a river over the harness sink with the current settings.
    pub fn river(&self) -> River {
        River::new(self.settings.clone(), self.sink.clone(), self.sink.clone())
            .expect("Failed to create river")
    }

    pub fn checkpoint(&self) -> CheckpointStore {
        CheckpointStore::from_settings(self.sink.clone(), &self.settings)
    }

    /// Seed a previously committed checkpoint.
    pub fn seed_checkpoint(&self, last_seq: &str) {
        let source = json!({ DATABASE: { "last_seq": last_seq } });
        self.sink.put_document(
            &self.settings.river.index,
            &format!("{}_seq", self.settings.river.name),
            source.as_object().cloned().unwrap_or_default(),
        );
    }

    /// Serve `lines` (then EOF) once, to the first request without a more
    /// specific mock. Later unmatched requests get a 404 and are throttled.
    pub async fn serve_changes(&self, lines: &[String]) {
        Mock::given(method("GET"))
            .and(path(format!("/{DATABASE}/_changes")))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_body(lines)))
            .up_to_n_times(1)
            .mount(&self.couch)
            .await;
    }

    /// Serve `lines` once, to a request resuming from `since`.
    pub async fn serve_changes_since(&self, since: &str, lines: &[String]) {
        Mock::given(method("GET"))
            .and(path(format!("/{DATABASE}/_changes")))
            .and(query_param("since", since))
            .respond_with(ResponseTemplate::new(200).set_body_string(feed_body(lines)))
            .up_to_n_times(1)
            .with_priority(2)
            .mount(&self.couch)
            .await;
    }

    /// Hold requests resuming from `since` open without data, like a quiet feed.
    pub async fn idle_after(&self, since: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{DATABASE}/_changes")))
            .and(query_param("since", since))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .with_priority(1)
            .mount(&self.couch)
            .await;
    }

    /// Poll the checkpoint until it equals `expected` or five seconds pass.
    pub async fn wait_for_checkpoint(&self, expected: &str) -> Option<String> {
        let checkpoint = self.checkpoint();
        let mut last = None;
        for _ in 0..250 {
            last = checkpoint.read().await.ok().flatten();
            if last.as_deref() == Some(expected) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        last
    }

    /// `since` values of every feed request received so far, in order.
    pub async fn requested_since(&self) -> Vec<Option<String>> {
        self.couch
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|request| {
                request
                    .url
                    .query_pairs()
                    .find(|(key, _)| key == "since")
                    .map(|(_, value)| value.into_owned())
            })
            .collect()
    }
}

fn feed_body(lines: &[String]) -> String {
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    body
}

/// A change carrying a document body.
pub fn doc_line(seq: impl Into<Value>, id: &str, doc: Value) -> String {
    json!({
        "seq": seq.into(),
        "id": id,
        "changes": [{"rev": "1-967a00dff5e02add41819138abb3284d"}],
        "doc": doc,
    })
    .to_string()
}

/// A deletion.
pub fn deleted_line(seq: impl Into<Value>, id: &str) -> String {
    json!({
        "seq": seq.into(),
        "id": id,
        "deleted": true,
        "changes": [{"rev": "2-eec205a9d413992850a6e32678485900"}],
    })
    .to_string()
}

/// A record carrying an error marker instead of a change.
pub fn error_line(reason: &str) -> String {
    json!({"error": "unknown_error", "reason": reason}).to_string()
}

/// A heartbeat.
pub fn heartbeat() -> String {
    String::new()
}
