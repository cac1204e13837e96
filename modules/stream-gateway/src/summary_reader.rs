//! Background reader of the summary stream, one per observer
//!
//! All readers in a process share the stable summary group, so each summary
//! is consumed once and reaches every observer through the BroadcastManager.

use event_bus::Subscriber;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::broadcast::BroadcastManager;
use crate::insight::InsightAugmenter;
use crate::metrics::Metrics;
use crate::models::StreamMessage;

pub struct SummaryReader {
    subscriber: Subscriber,
    augmenter: Arc<InsightAugmenter>,
    broadcaster: Arc<BroadcastManager>,
    metrics: Metrics,
    poll_timeout: Duration,
    pacing: Duration,
}

/// Stops a spawned reader
pub struct ReaderHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaderHandle {
    /// Signal the reader and wait until it has closed its subscriber
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::error!(error = %e, "Summary reader task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl SummaryReader {
    pub fn new(
        subscriber: Subscriber,
        augmenter: Arc<InsightAugmenter>,
        broadcaster: Arc<BroadcastManager>,
        metrics: Metrics,
    ) -> Self {
        Self {
            subscriber,
            augmenter,
            broadcaster,
            metrics,
            poll_timeout: Duration::from_secs(1),
            pacing: Duration::from_secs(5),
        }
    }

    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Delay after each forwarded summary
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn spawn(self) -> ReaderHandle {
        let (shutdown, signal) = oneshot::channel();
        let task = tokio::spawn(self.run(signal));
        ReaderHandle {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Poll, decode, augment and broadcast until `shutdown` fires
    ///
    /// A dropped sender counts as a shutdown.
    pub async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        tracing::info!(
            topic = %self.subscriber.topic(),
            group_id = %self.subscriber.group_id(),
            "Starting summary reader (latest only)"
        );

        loop {
            let polled = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                polled = self.subscriber.poll(self.poll_timeout) => polled,
            };

            let msg = match polled {
                Ok(Some(msg)) => msg,
                Ok(None) => continue,
                Err(e) => {
                    self.metrics.summary_consume_errors_total.inc();
                    tracing::warn!(error = %e, "Consumer error");
                    tokio::select! {
                        biased;
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.poll_timeout) => continue,
                    }
                }
            };

            let summary = match self.subscriber.try_decode(&msg).await {
                Ok(summary) => summary,
                Err(failure) => {
                    self.metrics
                        .summary_decode_failures_total
                        .with_label_values(&[failure.kind()])
                        .inc();
                    tracing::warn!(offset = msg.offset, error = %failure, "Failed to deserialize message");
                    continue;
                }
            };

            tracing::info!(
                offset = msg.offset,
                health_status = summary.health_status().unwrap_or("unknown"),
                "Received summary"
            );

            let summary = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                summary = self.augmenter.augment(summary) => summary,
            };

            self.broadcaster
                .broadcast(&StreamMessage::AiAlert { summary })
                .await;
            self.metrics.summaries_forwarded_total.inc();

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.pacing) => {}
            }
        }

        if let Err(e) = self.subscriber.close().await {
            tracing::warn!(error = %e, "Failed to close summary subscriber");
        }
        tracing::info!(group_id = %self.subscriber.group_id(), "Summary reader stopped");
    }
}
