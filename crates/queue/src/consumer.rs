//! Queue consumer trait and types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// A storage notification as delivered by the queue, body still unparsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Unique message identifier from the queue provider.
    pub id: String,
    /// Raw message body (the notification JSON).
    pub body: String,
    /// Provider-specific handle for ack/nack (e.g., SQS receipt handle).
    pub receipt_handle: String,
    /// When the message was sent to the queue.
    pub sent_at: DateTime<Utc>,
    /// Number of times this message has been received.
    pub receive_count: u32,
}

impl QueueMessage {
    /// The queue has handed this message out before, i.e. an earlier
    /// attempt failed or timed out and the run may already have submitted
    /// some jobs.
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// Trait for queue consumer backends.
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    /// Poll up to `max_messages` from the queue.
    ///
    /// May block for up to the provider's long-poll timeout.
    /// Returns an empty vec if no messages are available.
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError>;

    /// Acknowledge a handled message, removing it from the queue.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Return the message to the queue for immediate redelivery.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Approximate depth of the dead-letter queue, if one is configured.
    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(None)
    }
}
