//! Queue consumer.
//!
//! Pulls batches from a [`MessageSource`], runs each message through the
//! [`MessageHandler`] with bounded concurrency, and acknowledges according to
//! the handler's [`Disposition`].
//!
//! ## Shutdown
//!
//! The shutdown signal is only observed while waiting for the next batch. A
//! batch that has been received always runs to completion, so nothing is left
//! half-published; anything not acknowledged is redelivered by the transport.

pub mod memory;

#[cfg(feature = "sqs")]
pub mod sqs;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::handler::{Disposition, MessageHandler};
use crate::publisher::CatalogPublisher;
use crate::store::JobStore;

pub use memory::InMemoryQueue;

#[cfg(feature = "sqs")]
pub use sqs::SqsMessageSource;

/// Pause after a failed receive before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// An opaque message as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Transport message id.
    pub message_id: String,
    /// Raw body.
    pub body: String,
    /// Handle needed to acknowledge this delivery.
    pub receipt: String,
}

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Receiving a batch failed.
    #[error("Queue receive failed: {0}")]
    Receive(String),
    /// Acknowledging a message failed.
    #[error("Queue acknowledge failed for {message_id}: {reason}")]
    Ack {
        /// Message that could not be acknowledged.
        message_id: String,
        /// Transport detail.
        reason: String,
    },
}

/// At-least-once message transport.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Receive up to `max_messages` messages. May return an empty batch.
    async fn receive(&self, max_messages: i32) -> Result<Vec<Envelope>, QueueError>;

    /// Permanently remove a message.
    async fn ack(&self, envelope: &Envelope) -> Result<(), QueueError>;

    /// Give a message back for redelivery.
    ///
    /// Defaults to doing nothing and letting the visibility timeout expire.
    async fn abandon(&self, _envelope: &Envelope) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Counters for a consumer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages received.
    pub received: usize,
    /// Messages acknowledged.
    pub acked: usize,
    /// Messages left for redelivery.
    pub retried: usize,
}

impl ConsumerStats {
    fn merge(&mut self, other: ConsumerStats) {
        self.received += other.received;
        self.acked += other.acked;
        self.retried += other.retried;
    }
}

/// Polls a message source and dispatches messages to the handler.
pub struct Consumer<Q, S, P>
where
    Q: MessageSource,
    S: JobStore,
    P: CatalogPublisher,
{
    source: Arc<Q>,
    handler: Arc<MessageHandler<S, P>>,
    batch_size: i32,
    concurrency: usize,
}

impl<Q, S, P> Consumer<Q, S, P>
where
    Q: MessageSource,
    S: JobStore,
    P: CatalogPublisher,
{
    /// Create a consumer. `concurrency` is clamped to at least 1.
    pub fn new(
        source: Arc<Q>,
        handler: Arc<MessageHandler<S, P>>,
        batch_size: i32,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            handler,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Run until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F) -> ConsumerStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut stats = ConsumerStats::default();

        info!(
            batch_size = self.batch_size,
            concurrency = self.concurrency,
            "Consumer started, waiting for messages"
        );

        loop {
            let batch = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested, consumer stopping");
                    break;
                }
                received = self.source.receive(self.batch_size) => received,
            };

            match batch {
                Ok(envelopes) => stats.merge(self.process_batch(envelopes).await),
                Err(e) => {
                    error!(error = %e, "Failed to receive messages");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }

        info!(
            received = stats.received,
            acked = stats.acked,
            retried = stats.retried,
            "Consumer stopped"
        );
        stats
    }

    /// Receive and process a single batch.
    pub async fn poll_once(&self) -> Result<ConsumerStats, QueueError> {
        let envelopes = self.source.receive(self.batch_size).await?;
        Ok(self.process_batch(envelopes).await)
    }

    async fn process_batch(&self, envelopes: Vec<Envelope>) -> ConsumerStats {
        let mut stats = ConsumerStats {
            received: envelopes.len(),
            ..ConsumerStats::default()
        };
        if envelopes.is_empty() {
            return stats;
        }
        debug!(count = envelopes.len(), "Processing batch");

        let dispositions: Vec<Disposition> = stream::iter(envelopes)
            .map(|envelope| self.dispatch(envelope))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for disposition in dispositions {
            match disposition {
                Disposition::Ack => stats.acked += 1,
                Disposition::Retry => stats.retried += 1,
            }
        }
        stats
    }

    async fn dispatch(&self, envelope: Envelope) -> Disposition {
        let disposition = self.handler.handle(&envelope.message_id, &envelope.body).await;

        let settled = match disposition {
            Disposition::Ack => self.source.ack(&envelope).await,
            Disposition::Retry => self.source.abandon(&envelope).await,
        };
        if let Err(e) = settled {
            // The transport redelivers anything we failed to settle.
            warn!(message_id = %envelope.message_id, error = %e, "Failed to settle message");
        }

        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NoOpMetrics;
    use crate::publisher::PublishError;
    use crate::reader::JobStoreReader;
    use crate::store::InMemoryJobStore;
    use crate::types::{Job, JobId, SegmentTask, TaskId, UploadPayload};
    use serde_json::{json, Value};
    use uuid::Uuid;

    struct AcceptAll;

    #[async_trait]
    impl CatalogPublisher for AcceptAll {
        async fn publish(&self, _payload: &UploadPayload) -> Result<Value, PublishError> {
            Ok(json!({}))
        }
    }

    fn consumer(queue: Arc<InMemoryQueue>) -> Consumer<InMemoryQueue, InMemoryJobStore, AcceptAll> {
        let store = InMemoryJobStore::new();
        let job_id = JobId::new(Uuid::from_u128(1));
        store.add_job(Job::new(job_id, "M1", 1, 1));
        store.add_task(SegmentTask::new(TaskId::new(Uuid::from_u128(2)), job_id, "S1", Some(json!([]))));

        let handler = MessageHandler::new(
            JobStoreReader::new(Arc::new(store), Duration::from_secs(5)),
            Arc::new(AcceptAll),
            Arc::new(NoOpMetrics),
        );
        Consumer::new(queue, Arc::new(handler), 10, 2)
    }

    #[tokio::test]
    async fn test_poll_once_settles_each_message() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.push(r#"{"manifestation_id":"M1"}"#);
        queue.push("garbage");
        queue.push(r#"{"manifestation_id":"M2"}"#);

        let stats = consumer(Arc::clone(&queue)).poll_once().await.unwrap();

        assert_eq!(stats, ConsumerStats { received: 3, acked: 2, retried: 1 });
        assert_eq!(queue.acked().len(), 2);
        // The message for the unknown manifestation is back on the queue.
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_poll() {
        let queue = Arc::new(InMemoryQueue::with_idle_wait(Duration::from_millis(1)));
        let stats = consumer(queue).poll_once().await.unwrap();
        assert_eq!(stats, ConsumerStats::default());
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let queue = Arc::new(InMemoryQueue::with_idle_wait(Duration::from_millis(5)));
        queue.push(r#"{"manifestation_id":"M1"}"#);

        let consumer = consumer(Arc::clone(&queue));
        let stats = consumer
            .run_until(tokio::time::sleep(Duration::from_millis(100)))
            .await;

        assert_eq!(stats.acked, 1);
        assert!(queue.is_empty());
    }
}
