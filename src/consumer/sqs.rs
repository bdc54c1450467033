//! Amazon SQS message source.
//!
//! Long-polls the queue and deletes messages on acknowledgment. Abandoned
//! messages are left alone; SQS makes them visible again once the queue's
//! visibility timeout expires, and its redrive policy handles dead-lettering.

use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client;

use crate::config::QueueSettings;
use super::{Envelope, MessageSource, QueueError};

/// SQS-backed [`MessageSource`].
pub struct SqsMessageSource {
    client: Client,
    queue_url: String,
    wait_time_secs: i32,
}

impl SqsMessageSource {
    /// Build a client for the configured region.
    pub async fn connect(settings: &QueueSettings) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .load()
            .await;

        tracing::info!(
            queue_url = %settings.queue_url,
            region = %settings.region,
            "Initialized SQS client"
        );

        Self::new(Client::new(&config), settings)
    }

    /// Wrap an existing client.
    pub fn new(client: Client, settings: &QueueSettings) -> Self {
        Self {
            client,
            queue_url: settings.queue_url.clone(),
            wait_time_secs: i32::try_from(settings.wait_time.as_secs()).unwrap_or(20).min(20),
        }
    }
}

#[async_trait]
impl MessageSource for SqsMessageSource {
    async fn receive(&self, max_messages: i32) -> Result<Vec<Envelope>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, 10))
            .wait_time_seconds(self.wait_time_secs)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(e).to_string()))?;

        Ok(output
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(into_envelope)
            .collect())
    }

    async fn ack(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&envelope.receipt)
            .send()
            .await
            .map_err(|e| QueueError::Ack {
                message_id: envelope.message_id.clone(),
                reason: DisplayErrorContext(e).to_string(),
            })?;
        Ok(())
    }
}

/// Messages without a receipt handle cannot be deleted and are skipped.
fn into_envelope(message: Message) -> Option<Envelope> {
    let message_id = message.message_id.unwrap_or_default();
    let Some(receipt) = message.receipt_handle else {
        tracing::warn!(message_id = %message_id, "Skipping message without receipt handle");
        return None;
    };
    Some(Envelope {
        message_id,
        body: message.body.unwrap_or_default(),
        receipt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_becomes_envelope() {
        let message = Message::builder()
            .message_id("m-1")
            .receipt_handle("r-1")
            .body(r#"{"manifestation_id":"M1"}"#)
            .build();

        let envelope = into_envelope(message).unwrap();
        assert_eq!(envelope.message_id, "m-1");
        assert_eq!(envelope.receipt, "r-1");
        assert_eq!(envelope.body, r#"{"manifestation_id":"M1"}"#);
    }

    #[test]
    fn test_message_without_receipt_is_skipped() {
        let message = Message::builder().message_id("m-2").body("{}").build();
        assert!(into_envelope(message).is_none());
    }
}
