//! AWS SQS consumer for S3 event notifications.

use async_trait::async_trait;
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName, QueueAttributeName};
use aws_sdk_sqs::Client;
use aws_types::SdkConfig;
use chrono::{TimeZone, Utc};
use tracing::{debug, info, warn};

use votefile_core::config::QueueConfig;

use crate::consumer::{QueueConsumer, QueueMessage};
use crate::error::QueueError;

/// SQS caps a single receive at ten messages.
const SQS_MAX_MESSAGES: u32 = 10;

/// SQS-backed queue consumer.
pub struct SqsConsumer {
    client: Client,
    queue_url: String,
    dlq_url: Option<String>,
    visibility_timeout_secs: i32,
    wait_time_secs: i32,
}

impl SqsConsumer {
    /// Create a consumer from the shared SDK config and queue settings.
    ///
    /// Fails with [`QueueError::NotConfigured`] when no queue URL is set.
    pub fn new(sdk: &SdkConfig, queue: &QueueConfig) -> Result<Self, QueueError> {
        let queue_url = queue
            .queue_url
            .clone()
            .ok_or_else(|| QueueError::NotConfigured("QUEUE_URL is not set".into()))?;

        info!(queue_url = %queue_url, "SQS consumer initialized");

        Ok(Self {
            client: Client::new(sdk),
            queue_url,
            dlq_url: queue.dlq_url.clone(),
            visibility_timeout_secs: queue.visibility_timeout_secs as i32,
            wait_time_secs: queue.wait_time_secs.min(20) as i32,
        })
    }

    async fn approximate_depth(&self, url: &str) -> Result<Option<u64>, QueueError> {
        let resp = self
            .client
            .get_queue_attributes()
            .queue_url(url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS attribute lookup failed: {e:?}")))?;

        Ok(resp
            .attributes()
            .and_then(|attrs| attrs.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|v| v.parse::<u64>().ok()))
    }
}

/// Convert an SDK message, dropping it when it carries no receipt handle
/// (it could never be acknowledged).
fn to_queue_message(msg: Message) -> Option<QueueMessage> {
    let receipt_handle = msg.receipt_handle()?.to_string();

    let attribute = |name: MessageSystemAttributeName| {
        msg.attributes().and_then(|attrs| attrs.get(&name)).cloned()
    };

    // SentTimestamp is epoch millis.
    let sent_at = attribute(MessageSystemAttributeName::SentTimestamp)
        .and_then(|ts| ts.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let receive_count = attribute(MessageSystemAttributeName::ApproximateReceiveCount)
        .and_then(|c| c.parse::<u32>().ok())
        .unwrap_or(1);

    Some(QueueMessage {
        id: msg.message_id().unwrap_or("unknown").to_string(),
        body: msg.body().unwrap_or_default().to_string(),
        receipt_handle,
        sent_at,
        receive_count,
    })
}

#[async_trait]
impl QueueConsumer for SqsConsumer {
    async fn poll_batch(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let capped = max_messages.clamp(1, SQS_MAX_MESSAGES) as i32;

        debug!(max_messages = capped, "Polling SQS");

        let resp = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(capped)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(self.visibility_timeout_secs)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Connection(format!("SQS receive failed: {e:?}")))?;

        let received = resp.messages.unwrap_or_default();
        debug!(count = received.len(), "Received SQS messages");

        Ok(received
            .into_iter()
            .filter_map(|msg| {
                let id = msg.message_id().unwrap_or("unknown").to_string();
                let converted = to_queue_message(msg);
                if converted.is_none() {
                    warn!(message_id = %id, "Dropping SQS message without receipt handle");
                }
                converted
            })
            .collect())
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Acking SQS message");

        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Ack(format!("SQS delete failed: {e:?}")))?;

        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "Nacking SQS message (visibility=0)");

        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(0)
            .send()
            .await
            .map_err(|e| QueueError::Provider(format!("SQS visibility change failed: {e:?}")))?;

        Ok(())
    }

    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        match &self.dlq_url {
            Some(url) => self.approximate_depth(url).await,
            None => Ok(None),
        }
    }
}
