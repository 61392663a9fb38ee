//! Continuous `_changes` feed reader.
//!
//! Each connection attempt reads the committed checkpoint, opens
//! `/{db}/_changes?feed=continuous&include_docs=true&heartbeat=..&since=..`
//! and pushes every non-empty line onto the queue. Lines are framed on raw
//! bytes and decoded lossily; content is interpreted by the indexer only.

use std::collections::BTreeMap;
use std::io;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use river_types::RiverSettings;

use crate::checkpoint::CheckpointStore;
use crate::error::FeedError;
use crate::queue::{ChangeRecord, QueueSender};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Source connection options.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub url: String,
    pub database: String,
    pub user: Option<String>,
    pub password: Option<SecretString>,
    /// Accept any TLS hostname
    pub no_verify_hostname: bool,
    pub heartbeat: Duration,
    /// Longest silence tolerated before the connection counts as dropped
    pub read_timeout: Duration,
    pub filter: Option<String>,
    pub filter_params: BTreeMap<String, String>,
    /// Pause after a transport failure
    pub throttle_delay: Duration,
    /// Pause after any other failure
    pub error_delay: Duration,
}

impl FeedConfig {
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            user: None,
            password: None,
            no_verify_hostname: false,
            heartbeat: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            filter: None,
            filter_params: BTreeMap::new(),
            throttle_delay: Duration::from_secs(5),
            error_delay: Duration::from_secs(10),
        }
    }

    pub fn from_settings(settings: &RiverSettings) -> Self {
        let couchdb = &settings.couchdb;
        Self {
            url: couchdb.url.clone(),
            database: couchdb.database.clone(),
            user: couchdb.user.clone(),
            password: couchdb.password.clone().map(SecretString::from),
            no_verify_hostname: couchdb.no_verify_hostname,
            heartbeat: Duration::from_millis(couchdb.heartbeat_ms),
            read_timeout: Duration::from_millis(couchdb.read_timeout_ms()),
            filter: couchdb.filter.clone(),
            filter_params: couchdb.filter_params.clone(),
            throttle_delay: Duration::from_millis(settings.river.throttle_delay_ms),
            error_delay: Duration::from_millis(settings.river.error_delay_ms),
        }
    }

    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }
}

/// Producer side of the river.
pub struct Slurper {
    client: Client,
    base: Url,
    config: FeedConfig,
    checkpoint: CheckpointStore,
    sender: QueueSender,
    shutdown: CancellationToken,
}

impl Slurper {
    pub fn new(
        config: FeedConfig,
        checkpoint: CheckpointStore,
        sender: QueueSender,
        shutdown: CancellationToken,
    ) -> Result<Self, FeedError> {
        let base = Url::parse(&config.url)
            .map_err(|e| FeedError::InvalidUrl(format!("{}: {e}", config.url)))?;

        if config.no_verify_hostname {
            warn!(url = %config.url, "TLS hostname verification is disabled");
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_hostnames(config.no_verify_hostname)
            .build()?;

        Ok(Self {
            client,
            base,
            config,
            checkpoint,
            sender,
            shutdown,
        })
    }

    /// Feed URL, resuming after `since` when given.
    pub fn feed_url(&self, since: Option<&str>) -> Result<Url, FeedError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FeedError::InvalidUrl(self.config.url.clone()))?
            .pop_if_empty()
            .push(&self.config.database)
            .push("_changes");

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("feed", "continuous")
                .append_pair("include_docs", "true")
                .append_pair("heartbeat", &self.config.heartbeat.as_millis().to_string());
            if let Some(filter) = &self.config.filter {
                query.append_pair("filter", filter);
                for (key, value) in &self.config.filter_params {
                    query.append_pair(key, value);
                }
            }
            if let Some(since) = since {
                query.append_pair("since", since);
            }
        }

        Ok(url)
    }

    /// Follow the feed until stopped or until the indexer is gone.
    pub async fn run(self) {
        info!(url = %self.config.url, "Starting changes feed");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let delay = match AssertUnwindSafe(self.slurp()).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(FeedError::QueueClosed)) => {
                    info!("Event queue closed");
                    break;
                }
                Ok(Err(e)) if e.is_transient() => {
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!(error = %e, "Changes feed failed; throttling before reconnect");
                    Some(self.config.throttle_delay)
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to slurp changes");
                    Some(self.config.error_delay)
                }
                Err(_) => {
                    error!("Unexpected panic in changes feed reader");
                    Some(self.config.error_delay)
                }
            };

            if let Some(delay) = delay {
                if !self.pause(delay).await {
                    break;
                }
            }
        }

        info!("Closing changes feed");
    }

    /// One connection: read the checkpoint, connect, and stream until EOF,
    /// failure or stop.
    pub async fn slurp(&self) -> Result<(), FeedError> {
        let since = self.checkpoint.read().await?;
        let url = self.feed_url(since.as_deref())?;
        debug!(url = %url, "Connecting to changes feed");

        let mut request = self.client.get(url);
        if let Some(user) = &self.config.user {
            request = request.basic_auth(
                user,
                self.config.password.as_ref().map(|p| p.expose_secret()),
            );
        }

        let read_timeout = self.config.read_timeout;
        let response = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Ok(()),
            sent = tokio::time::timeout(read_timeout, request.send()) => {
                sent.map_err(|_| FeedError::Silent(read_timeout))??
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let stream = Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other)));
        self.stream_changes(StreamReader::new(stream)).await
    }

    async fn stream_changes<R>(&self, mut reader: R) -> Result<(), FeedError>
    where
        R: AsyncBufRead + Unpin,
    {
        let read_timeout = self.config.read_timeout;
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                next = tokio::time::timeout(read_timeout, reader.read_until(b'\n', &mut buf)) => next,
            };
            if next.map_err(|_| FeedError::Silent(read_timeout))?? == 0 {
                debug!("Changes feed closed by server");
                return Ok(());
            }

            // Invalid UTF-8 is replaced, not rejected; the indexer drops
            // whatever no longer parses.
            let line = decode_frame(&buf);
            if line.trim().is_empty() {
                trace!("Heartbeat");
                continue;
            }
            trace!(line = %line, "Received change");
            if self.sender.remaining() == 0 {
                debug!("Event queue full; waiting for indexer");
            }

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                put = self.sender.put(ChangeRecord::new(line)) => {
                    put.map_err(|_| FeedError::QueueClosed)?
                }
            }
        }
    }

    /// Sleep unless stopped first. Returns `false` when stopped.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// One feed line without its `\n` or `\r\n` terminator.
fn decode_frame(frame: &[u8]) -> String {
    let frame = frame.strip_suffix(b"\n").unwrap_or(frame);
    let frame = frame.strip_suffix(b"\r").unwrap_or(frame);
    String::from_utf8_lossy(frame).into_owned()
}
