//! In-memory queue for testing and local runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Envelope, MessageSource, QueueError};

/// Poll interval when the queue is empty.
const DEFAULT_IDLE_WAIT: Duration = Duration::from_millis(50);

/// FIFO queue with redelivery on abandon.
#[derive(Debug)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<Envelope>>,
    acked: Mutex<Vec<String>>,
    deliveries: Mutex<HashMap<String, u32>>,
    idle_wait: Duration,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::with_idle_wait(DEFAULT_IDLE_WAIT)
    }

    /// Create an empty queue that waits `idle_wait` on empty receives.
    pub fn with_idle_wait(idle_wait: Duration) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            acked: Mutex::new(Vec::new()),
            deliveries: Mutex::new(HashMap::new()),
            idle_wait,
        }
    }

    /// Enqueue a body and return its message id.
    pub fn push(&self, body: impl Into<String>) -> String {
        let message_id = Uuid::new_v4().to_string();
        self.pending.lock().push_back(Envelope {
            message_id: message_id.clone(),
            body: body.into(),
            receipt: Uuid::new_v4().to_string(),
        });
        message_id
    }

    /// Ids of acknowledged messages, in acknowledgment order.
    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().clone()
    }

    /// How many times a message has been delivered.
    pub fn delivery_count(&self, message_id: &str) -> u32 {
        self.deliveries.lock().get(message_id).copied().unwrap_or(0)
    }

    /// Messages waiting for delivery.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[async_trait]
impl MessageSource for InMemoryQueue {
    async fn receive(&self, max_messages: i32) -> Result<Vec<Envelope>, QueueError> {
        let batch: Vec<Envelope> = {
            let mut pending = self.pending.lock();
            let take = usize::try_from(max_messages).unwrap_or(0).min(pending.len());
            pending.drain(..take).collect()
        };

        if batch.is_empty() {
            tokio::time::sleep(self.idle_wait).await;
            return Ok(batch);
        }

        let mut deliveries = self.deliveries.lock();
        for envelope in &batch {
            *deliveries.entry(envelope.message_id.clone()).or_insert(0) += 1;
        }
        Ok(batch)
    }

    async fn ack(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.acked.lock().push(envelope.message_id.clone());
        Ok(())
    }

    async fn abandon(&self, envelope: &Envelope) -> Result<(), QueueError> {
        self.pending.lock().push_back(envelope.clone());
        Ok(())
    }
}
