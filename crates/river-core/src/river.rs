//! River lifecycle: one reader task and one indexer task over a bounded queue.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use river_sink::{BulkSink, DocumentStore};
use river_types::RiverSettings;

use crate::checkpoint::CheckpointStore;
use crate::error::RiverError;
use crate::indexer::{Indexer, IndexerConfig};
use crate::queue;
use crate::retry::RetryPolicy;
use crate::slurper::{FeedConfig, Slurper};
use crate::stats::{IndexerStats, StatsSnapshot};
use crate::transform::{TransformChain, TransformHook};

/// Where a [`River`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiverState {
    Idle,
    Running,
    Stopped,
}

struct RiverTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// A CouchDB to search index connector.
///
/// Created idle; `start()` spawns the feed reader and the indexer,
/// `stop()` cancels both and waits for them. A stopped river cannot be
/// started again.
pub struct River {
    settings: RiverSettings,
    sink: Arc<dyn BulkSink>,
    store: Arc<dyn DocumentStore>,
    transform: TransformChain,
    stats: Arc<IndexerStats>,
    shutdown_token: CancellationToken,
    state: RiverState,
    tasks: Option<RiverTasks>,
}

impl River {
    /// Create an idle river. Settings are validated up front.
    pub fn new(
        settings: RiverSettings,
        sink: Arc<dyn BulkSink>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self, RiverError> {
        settings.validate()?;

        Ok(Self {
            settings,
            sink,
            store,
            transform: TransformChain::new(),
            stats: Arc::new(IndexerStats::new()),
            shutdown_token: CancellationToken::new(),
            state: RiverState::Idle,
            tasks: None,
        })
    }

    /// Add a hook; hooks run in the order they were added.
    pub fn with_transform(mut self, transform: Arc<dyn TransformHook>) -> Self {
        self.transform = self.transform.then_shared(transform);
        self
    }

    pub fn settings(&self) -> &RiverSettings {
        &self.settings
    }

    pub fn state(&self) -> RiverState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RiverState::Running
    }

    /// Totals across every batch submitted so far.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Token observed by both tasks; cancelling it stops the river.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the reader and the indexer.
    pub fn start(&mut self) -> Result<(), RiverError> {
        match self.state {
            RiverState::Running => return Err(RiverError::AlreadyRunning),
            RiverState::Stopped => return Err(RiverError::Stopped),
            RiverState::Idle => {}
        }

        let database = self.settings.couchdb.database.clone();
        let (sender, receiver) = queue::bounded(self.settings.index.queue_capacity());
        let checkpoint = CheckpointStore::from_settings(self.store.clone(), &self.settings);

        let slurper = Slurper::new(
            FeedConfig::from_settings(&self.settings),
            checkpoint.clone(),
            sender,
            self.shutdown_token.clone(),
        )?;

        let mut indexer = Indexer::new(
            receiver,
            self.sink.clone(),
            checkpoint,
            IndexerConfig::from_settings(&self.settings),
            self.shutdown_token.clone(),
        )
        .with_retry(RetryPolicy::from_settings(&self.settings.retry))
        .with_stats(self.stats.clone());
        if !self.transform.is_empty() {
            indexer = indexer.with_transform(Arc::new(self.transform.clone()));
        }

        let reader = tokio::spawn(
            slurper
                .run()
                .instrument(info_span!("slurper", database = %database)),
        );
        let writer = tokio::spawn(
            indexer
                .run()
                .instrument(info_span!("indexer", database = %database)),
        );

        self.tasks = Some(RiverTasks { reader, writer });
        self.state = RiverState::Running;
        info!(
            database = %database,
            index = %self.settings.index_name(),
            "River started"
        );

        Ok(())
    }

    /// Signal both tasks and wait for them to finish.
    ///
    /// An in-flight bulk submit or HTTP read completes or fails on its own
    /// before the task exits.
    pub async fn stop(&mut self) -> Result<(), RiverError> {
        if self.state != RiverState::Running {
            return Err(RiverError::NotRunning);
        }

        info!(database = %self.settings.couchdb.database, "Stopping river");
        self.shutdown_token.cancel();
        self.state = RiverState::Stopped;

        let Some(tasks) = self.tasks.take() else {
            return Ok(());
        };
        let reader = tasks.reader.await;
        let writer = tasks.writer.await;
        reader.map_err(|e| RiverError::Task(format!("reader: {e}")))?;
        writer.map_err(|e| RiverError::Task(format!("indexer: {e}")))?;

        info!(database = %self.settings.couchdb.database, "River stopped");
        Ok(())
    }
}
