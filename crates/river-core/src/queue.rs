//! Bounded hand-off between the feed reader and the indexer.
//!
//! A single-producer, single-consumer FIFO over a tokio bounded channel.
//! `put` waits while the queue is full, which stalls the reader and in turn
//! the feed connection; that is the river's only throttle.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use river_types::MAX_QUEUE_CAPACITY;

/// One raw, undecoded line from the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord(String);

impl ChangeRecord {
    pub fn new(line: impl Into<String>) -> Self {
        ChangeRecord(line.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The receiving side was dropped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("event queue closed")]
pub struct QueueClosed;

/// Create a queue holding at most `capacity` records, clamped to
/// `1..=MAX_QUEUE_CAPACITY`.
pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY));
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producer handle.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<ChangeRecord>,
}

impl QueueSender {
    /// Enqueue, waiting for space when full.
    pub async fn put(&self, record: ChangeRecord) -> Result<(), QueueClosed> {
        self.tx.send(record).await.map_err(|_| QueueClosed)
    }

    /// Free slots right now.
    pub fn remaining(&self) -> usize {
        self.tx.capacity()
    }
}

/// Consumer handle.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<ChangeRecord>,
}

impl QueueReceiver {
    /// Wait for the next record. `None` once every sender is gone and the
    /// queue is drained.
    pub async fn take(&mut self) -> Option<ChangeRecord> {
        self.rx.recv().await
    }

    /// Wait at most `timeout` for the next record.
    pub async fn poll(&mut self, timeout: Duration) -> Option<ChangeRecord> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}
