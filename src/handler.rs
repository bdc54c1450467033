//! Message handler.
//!
//! Runs one inbound message through read → aggregate → build → publish and
//! decides whether the transport should acknowledge it.
//!
//! ## Acknowledgment
//!
//! | Outcome | Disposition |
//! |---------|-------------|
//! | Published | Ack |
//! | InvalidMessage | Ack (poison message, logged at error) |
//! | Anything else | Retry (left for redelivery) |

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, info_span, warn, Instrument};

use crate::aggregator::{aggregate, AggregateError};
use crate::builder::build_payload;
use crate::metrics::{
    PipelineMetrics, MALFORMED_RESULTS_TOTAL, MESSAGES_TOTAL, PIPELINE_FAILURES_TOTAL,
    PUBLISHED_SEGMENTS_TOTAL,
};
use crate::publisher::{CatalogPublisher, PublishError};
use crate::reader::{JobStoreReader, ReaderError};
use crate::store::JobStore;
use crate::types::{JobId, UploadPayload};

/// What the transport should do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Delete the message from the queue.
    Ack,
    /// Leave the message for redelivery.
    Retry,
}

/// Pipeline stage a message was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Parsing the message body.
    Received,
    /// Reading the job and aggregating relations.
    Aggregating,
    /// Building the upload payload.
    Building,
    /// Calling the catalog.
    Publishing,
    /// Finished without error.
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Aggregating => write!(f, "aggregating"),
            Self::Building => write!(f, "building"),
            Self::Publishing => write!(f, "publishing"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Every way a message can fail.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Body is not JSON or has no usable `manifestation_id`.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    /// Job lookup failed.
    #[error(transparent)]
    Reader(#[from] ReaderError),
    /// Task results could not be aggregated.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    /// Catalog call failed.
    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl HandlerError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidMessage(_) => "invalid_message",
            Self::Reader(ReaderError::JobNotFound { .. }) => "job_not_found",
            Self::Reader(ReaderError::JobIncomplete { .. }) => "job_incomplete",
            Self::Reader(ReaderError::Store(_)) => "store",
            Self::Reader(ReaderError::Timeout { .. }) => "store_timeout",
            Self::Aggregate(AggregateError::MalformedResult { .. }) => "malformed_result",
            Self::Publish(PublishError::AuthFailure(_)) => "auth_failure",
            Self::Publish(PublishError::PublishFailure { .. }) => "publish_failure",
        }
    }

    /// Only poison messages are acknowledged; everything else is redelivered.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::InvalidMessage(_) => Disposition::Ack,
            _ => Disposition::Retry,
        }
    }
}

/// A failed pipeline run with enough context to diagnose it.
#[derive(Debug)]
pub struct PipelineFailure {
    /// The failure.
    pub error: HandlerError,
    /// Stage it happened in.
    pub stage: Stage,
    /// Manifestation being processed, once known.
    pub manifestation_id: Option<String>,
    /// Job being processed, once known.
    pub job_id: Option<JobId>,
}

impl PipelineFailure {
    fn new(stage: Stage, error: impl Into<HandlerError>) -> Self {
        let error = error.into();
        let job_id = match &error {
            HandlerError::Reader(e) => e.job_id(),
            _ => None,
        };
        Self {
            error,
            stage,
            manifestation_id: None,
            job_id,
        }
    }

    fn for_manifestation(mut self, manifestation_id: &str) -> Self {
        self.manifestation_id = Some(manifestation_id.to_string());
        self
    }

    fn for_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}", self.error.kind(), self.stage)?;
        if let Some(id) = &self.manifestation_id {
            write!(f, " (manifestation {id}")?;
            if let Some(job_id) = &self.job_id {
                write!(f, ", job {job_id}")?;
            }
            write!(f, ")")?;
        }
        write!(f, ": {}", self.error)
    }
}

impl std::error::Error for PipelineFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// A payload ready to publish.
#[derive(Debug, Clone)]
pub struct PreparedUpload {
    /// Root manifestation.
    pub manifestation_id: String,
    /// Job the payload was built from.
    pub job_id: JobId,
    /// Number of cross-references across all segments.
    pub mapping_count: usize,
    /// The payload.
    pub payload: UploadPayload,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// What was published.
    pub upload: PreparedUpload,
    /// Catalog response body.
    pub response: Value,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    manifestation_id: String,
}

/// Extract the manifestation id from a message body. Other fields are ignored.
pub fn parse_message(body: &str) -> Result<String, HandlerError> {
    let parsed: MessageBody = serde_json::from_str(body)
        .map_err(|e| HandlerError::InvalidMessage(e.to_string()))?;

    if parsed.manifestation_id.trim().is_empty() {
        return Err(HandlerError::InvalidMessage("manifestation_id is empty".to_string()));
    }
    Ok(parsed.manifestation_id)
}

/// Orchestrates one message at a time; safe to share across concurrent workers.
pub struct MessageHandler<S: JobStore, P: CatalogPublisher> {
    reader: JobStoreReader<S>,
    publisher: Arc<P>,
    metrics: Arc<dyn PipelineMetrics>,
}

impl<S: JobStore, P: CatalogPublisher> MessageHandler<S, P> {
    /// Create a handler.
    pub fn new(reader: JobStoreReader<S>, publisher: Arc<P>, metrics: Arc<dyn PipelineMetrics>) -> Self {
        Self { reader, publisher, metrics }
    }

    /// Process one message and report what the transport should do with it.
    ///
    /// Never fails: every error is logged, counted and mapped to a [`Disposition`].
    pub async fn handle(&self, message_id: &str, body: &str) -> Disposition {
        let span = info_span!(
            "message",
            message_id = %message_id,
            manifestation_id = tracing::field::Empty,
        );

        async {
            info!("Received message");
            match self.process(body).await {
                Ok(outcome) => {
                    let segments = outcome.upload.payload.text_mappings.len();
                    info!(
                        manifestation_id = %outcome.upload.manifestation_id,
                        job_id = %outcome.upload.job_id,
                        segment_count = segments,
                        mapping_count = outcome.upload.mapping_count,
                        stage = %Stage::Done,
                        "Mapping uploaded to catalog"
                    );
                    self.metrics.increment(MESSAGES_TOTAL, &[("outcome", "published")]);
                    self.metrics.add(PUBLISHED_SEGMENTS_TOTAL, segments as u64, &[]);
                    Disposition::Ack
                }
                Err(failure) => self.on_failure(&failure),
            }
        }
        .instrument(span)
        .await
    }

    /// Parse, prepare and publish; the fallible core of [`handle`](Self::handle).
    pub async fn process(&self, body: &str) -> Result<PublishOutcome, PipelineFailure> {
        let manifestation_id =
            parse_message(body).map_err(|e| PipelineFailure::new(Stage::Received, e))?;
        tracing::Span::current().record("manifestation_id", manifestation_id.as_str());

        let upload = self.prepare(&manifestation_id).await?;
        self.publish(upload).await
    }

    /// Read the job and build its payload without publishing.
    pub async fn prepare(&self, manifestation_id: &str) -> Result<PreparedUpload, PipelineFailure> {
        let completed = self
            .reader
            .read_completed(manifestation_id)
            .await
            .map_err(|e| PipelineFailure::new(Stage::Aggregating, e).for_manifestation(manifestation_id))?;
        let job_id = completed.job.job_id;

        let relations = aggregate(manifestation_id, &completed.tasks).map_err(|e| {
            PipelineFailure::new(Stage::Aggregating, e)
                .for_manifestation(manifestation_id)
                .for_job(job_id)
        })?;

        let payload = build_payload(&relations);
        tracing::debug!(
            job_id = %job_id,
            stage = %Stage::Building,
            text_mappings = payload.text_mappings.len(),
            "Built mapping payload"
        );

        Ok(PreparedUpload {
            manifestation_id: manifestation_id.to_string(),
            job_id,
            mapping_count: relations.mapping_count(),
            payload,
        })
    }

    /// Publish a prepared payload.
    pub async fn publish(&self, upload: PreparedUpload) -> Result<PublishOutcome, PipelineFailure> {
        let response = self.publisher.publish(&upload.payload).await.map_err(|e| {
            PipelineFailure::new(Stage::Publishing, e)
                .for_manifestation(&upload.manifestation_id)
                .for_job(upload.job_id)
        })?;

        Ok(PublishOutcome { upload, response })
    }

    fn on_failure(&self, failure: &PipelineFailure) -> Disposition {
        let kind = failure.error.kind();
        let disposition = failure.error.disposition();
        let manifestation_id = failure.manifestation_id.as_deref().unwrap_or("-");
        let job_id = failure.job_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());

        match &failure.error {
            HandlerError::Reader(ReaderError::JobIncomplete { .. }) => warn!(
                manifestation_id = %manifestation_id,
                job_id = %job_id,
                stage = %failure.stage,
                kind = kind,
                error = %failure.error,
                "Job not finished yet, leaving message for redelivery"
            ),
            HandlerError::InvalidMessage(_) => error!(
                stage = %failure.stage,
                kind = kind,
                error = %failure.error,
                "Dropping invalid message"
            ),
            _ => error!(
                manifestation_id = %manifestation_id,
                job_id = %job_id,
                stage = %failure.stage,
                kind = kind,
                error = %failure.error,
                "Pipeline failed, leaving message for redelivery"
            ),
        }

        if matches!(failure.error, HandlerError::Aggregate(_)) {
            self.metrics.increment(MALFORMED_RESULTS_TOTAL, &[]);
        }
        self.metrics.increment(PIPELINE_FAILURES_TOTAL, &[("kind", kind)]);
        let outcome = match disposition {
            Disposition::Ack => "dropped",
            Disposition::Retry => "retry",
        };
        self.metrics.increment(MESSAGES_TOTAL, &[("outcome", outcome)]);

        disposition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TestMetrics;
    use crate::store::InMemoryJobStore;
    use crate::types::{Job, SegmentTask, TaskId};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    /// Records payloads instead of sending them.
    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<UploadPayload>>,
        fail_with: Mutex<Option<PublishError>>,
    }

    #[async_trait]
    impl CatalogPublisher for RecordingPublisher {
        async fn publish(&self, payload: &UploadPayload) -> Result<Value, PublishError> {
            if let Some(err) = self.fail_with.lock().take() {
                return Err(err);
            }
            self.published.lock().push(payload.clone());
            Ok(json!({"status": "ok"}))
        }
    }

    struct Fixture {
        store: Arc<InMemoryJobStore>,
        publisher: Arc<RecordingPublisher>,
        metrics: Arc<TestMetrics>,
        handler: MessageHandler<InMemoryJobStore, RecordingPublisher>,
    }

    fn fixture(total: i64, completed: i64) -> Fixture {
        let store = Arc::new(InMemoryJobStore::new());
        let job_id = JobId::new(Uuid::from_u128(1));
        store.add_job(Job::new(job_id, "M1", total, completed));
        store.add_task(SegmentTask::new(
            TaskId::new(Uuid::from_u128(10)),
            job_id,
            "S1",
            Some(json!([{"manifestation_id": "M2", "segments": ["S9"]}])),
        ));
        store.add_task(SegmentTask::new(
            TaskId::new(Uuid::from_u128(11)),
            job_id,
            "S2",
            Some(json!([])),
        ));

        let publisher = Arc::new(RecordingPublisher::default());
        let metrics = Arc::new(TestMetrics::default());
        let handler = MessageHandler::new(
            JobStoreReader::new(Arc::clone(&store), Duration::from_secs(5)),
            Arc::clone(&publisher),
            metrics.clone(),
        );

        Fixture { store, publisher, metrics, handler }
    }

    #[test]
    fn test_parse_message() {
        assert_eq!(parse_message(r#"{"manifestation_id":"M1","extra":1}"#).unwrap(), "M1");
        assert!(matches!(parse_message("not json"), Err(HandlerError::InvalidMessage(_))));
        assert!(matches!(parse_message(r#"{"id":"M1"}"#), Err(HandlerError::InvalidMessage(_))));
        assert!(matches!(parse_message(r#"{"manifestation_id":7}"#), Err(HandlerError::InvalidMessage(_))));
        assert!(matches!(parse_message(r#"{"manifestation_id":" "}"#), Err(HandlerError::InvalidMessage(_))));
    }

    #[test]
    fn test_parse_message_keeps_id_verbatim() {
        assert_eq!(parse_message(r#"{"manifestation_id":"  M1 "}"#).unwrap(), "  M1 ");
    }

    #[tokio::test]
    async fn test_success_publishes_and_acks() {
        let fx = fixture(2, 2);

        let disposition = fx.handler.handle("msg-1", r#"{"manifestation_id":"M1"}"#).await;

        assert_eq!(disposition, Disposition::Ack);
        let published = fx.publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(serde_json::to_value(&published[0]).unwrap(), json!({
            "text_mappings": [
                {"text_id": "M1", "segment_id": "S1", "mappings": [{"parent_text_id": "M2", "segments": ["S9"]}]},
                {"text_id": "M1", "segment_id": "S2", "mappings": []}
            ]
        }));
        assert_eq!(fx.metrics.get_labeled(MESSAGES_TOTAL, &[("outcome", "published")]), 1);
        assert_eq!(fx.metrics.get_count(PUBLISHED_SEGMENTS_TOTAL), 2);
    }

    #[tokio::test]
    async fn test_incomplete_job_retries_without_publishing() {
        let fx = fixture(3, 2);

        let disposition = fx.handler.handle("msg-1", r#"{"manifestation_id":"M1"}"#).await;

        assert_eq!(disposition, Disposition::Retry);
        assert!(fx.publisher.published.lock().is_empty());
        assert_eq!(fx.metrics.get_labeled(PIPELINE_FAILURES_TOTAL, &[("kind", "job_incomplete")]), 1);

        fx.store.set_completed(&JobId::new(Uuid::from_u128(1)), 3);
        let disposition = fx.handler.handle("msg-1", r#"{"manifestation_id":"M1"}"#).await;
        assert_eq!(disposition, Disposition::Ack);
    }

    #[tokio::test]
    async fn test_invalid_message_is_acked() {
        let fx = fixture(2, 2);

        assert_eq!(fx.handler.handle("msg-1", "{not json").await, Disposition::Ack);
        assert_eq!(fx.handler.handle("msg-2", r#"{"other":"M1"}"#).await, Disposition::Ack);

        assert!(fx.publisher.published.lock().is_empty());
        assert_eq!(fx.metrics.get_labeled(MESSAGES_TOTAL, &[("outcome", "dropped")]), 2);
    }

    #[tokio::test]
    async fn test_missing_job_is_retried() {
        let fx = fixture(2, 2);

        let failure = fx.handler.process(r#"{"manifestation_id":"M404"}"#).await.unwrap_err();
        assert_eq!(failure.error.kind(), "job_not_found");
        assert_eq!(failure.stage, Stage::Aggregating);
        assert_eq!(failure.manifestation_id.as_deref(), Some("M404"));
        assert_eq!(failure.error.disposition(), Disposition::Retry);
    }

    #[tokio::test]
    async fn test_malformed_result_aborts_before_publish() {
        let fx = fixture(3, 3);
        fx.store.add_task(SegmentTask::new(
            TaskId::new(Uuid::from_u128(12)),
            JobId::new(Uuid::from_u128(1)),
            "S3",
            Some(json!("garbage")),
        ));

        let disposition = fx.handler.handle("msg-1", r#"{"manifestation_id":"M1"}"#).await;

        assert_eq!(disposition, Disposition::Retry);
        assert!(fx.publisher.published.lock().is_empty());
        assert_eq!(fx.metrics.get_count(MALFORMED_RESULTS_TOTAL), 1);

        let failure = fx.handler.process(r#"{"manifestation_id":"M1"}"#).await.unwrap_err();
        assert_eq!(failure.job_id, Some(JobId::new(Uuid::from_u128(1))));
        assert!(failure.to_string().starts_with("malformed_result failed during aggregating (manifestation M1, job"));
    }

    #[tokio::test]
    async fn test_publish_failure_is_retried() {
        let fx = fixture(2, 2);
        *fx.publisher.fail_with.lock() = Some(PublishError::AuthFailure("no accessToken".into()));

        let failure = fx.handler.process(r#"{"manifestation_id":"M1"}"#).await.unwrap_err();
        assert_eq!(failure.stage, Stage::Publishing);
        assert_eq!(failure.error.kind(), "auth_failure");
        assert_eq!(failure.error.disposition(), Disposition::Retry);
    }

    #[tokio::test]
    async fn test_store_timeout_is_retried() {
        let store = Arc::new(InMemoryJobStore::new());
        store.add_job(Job::new(JobId::new(Uuid::from_u128(1)), "M1", 1, 1));
        store.set_latency(Duration::from_secs(5));
        let publisher = Arc::new(RecordingPublisher::default());
        let metrics = Arc::new(TestMetrics::default());
        let handler = MessageHandler::new(
            JobStoreReader::new(store, Duration::from_millis(50)),
            Arc::clone(&publisher),
            metrics.clone(),
        );

        let failure = handler.process(r#"{"manifestation_id":"M1"}"#).await.unwrap_err();
        assert_eq!(failure.error.kind(), "store_timeout");
        assert_eq!(failure.error.disposition(), Disposition::Retry);

        assert_eq!(handler.handle("msg-1", r#"{"manifestation_id":"M1"}"#).await, Disposition::Retry);
        assert!(publisher.published.lock().is_empty());
        assert_eq!(metrics.get_labeled(PIPELINE_FAILURES_TOTAL, &[("kind", "store_timeout")]), 1);
    }
}
