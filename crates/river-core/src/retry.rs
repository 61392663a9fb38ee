//! Retry of whole-batch sink failures.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use river_sink::{BulkRequest, BulkResponse, BulkSink, SinkError};
use river_types::RetrySettings;

/// How often, and how patiently, a rejected batch is resubmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryPolicy {
    /// Submit once and give up.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }

    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_interval: Duration::from_millis(settings.initial_interval_ms),
            max_interval: Duration::from_millis(settings.max_interval_ms),
        }
    }

    /// Submit `request`, retrying `Err` results up to `max_retries` times.
    ///
    /// Per-item failures inside an `Ok` response are not retried. Cancelling
    /// `shutdown` abandons the wait and returns the last error.
    pub async fn submit(
        &self,
        sink: &dyn BulkSink,
        request: &BulkRequest,
        shutdown: &CancellationToken,
    ) -> Result<BulkResponse, SinkError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let mut attempts = 0u32;

        loop {
            attempts += 1;
            debug!(attempt = attempts, actions = request.number_of_actions(), "Submitting bulk request");

            let err = match sink.bulk(request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if attempts > self.max_retries {
                if self.max_retries > 0 {
                    error!(error = %err, attempts, "Max retries exceeded");
                }
                return Err(err);
            }

            let Some(delay) = backoff.next_backoff() else {
                error!(error = %err, "Backoff exhausted");
                return Err(err);
            };

            warn!(
                error = %err,
                retry_in_ms = delay.as_millis() as u64,
                "Bulk request failed, retrying"
            );

            tokio::select! {
                _ = shutdown.cancelled() => return Err(err),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use river_sink::MemorySink;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let sink = MemorySink::new();
        sink.fail_next(1);

        let result = RetryPolicy::default()
            .submit(&sink, &BulkRequest::new(), &CancellationToken::new())
            .await;
        assert!(result.is_err());
        // The failure was consumed; nothing was resubmitted.
        assert!(sink.requests().is_empty());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let sink = MemorySink::new();
        sink.fail_next(2);

        let result = fast(3)
            .submit(&sink, &BulkRequest::new(), &CancellationToken::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(sink.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let sink = MemorySink::new();
        sink.fail_next(5);

        let result = fast(2)
            .submit(&sink, &BulkRequest::new(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(SinkError::Unavailable(_))));

        // Three attempts consumed three of the five injected failures.
        assert!(sink.bulk(&BulkRequest::new()).await.is_err());
        assert!(sink.bulk(&BulkRequest::new()).await.is_err());
        assert!(sink.bulk(&BulkRequest::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let sink = MemorySink::new();
        sink.fail_next(1);

        let policy = RetryPolicy {
            max_retries: 1,
            initial_interval: Duration::from_secs(60),
            max_interval: Duration::from_secs(60),
        };
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            policy.submit(&sink, &BulkRequest::new(), &shutdown),
        )
        .await
        .unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_settings() {
        let policy = RetryPolicy::from_settings(&RetrySettings::default());
        assert_eq!(policy, RetryPolicy::none());
    }
}
