//! AWS SQS FIFO queue backend.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::QueueAttributeName;
use tracing::{debug, info};

use super::{QueueAttributes, QueueMessage, QueueReceiver, QueueRef, QueueService, ReceivedMessage};
use crate::config::SqsConfig;
use crate::error::QueueError;

/// SQS caps long polling at 20 seconds.
const MAX_WAIT_SECS: u64 = 20;

/// Queue service backed by SQS FIFO queues.
#[derive(Debug, Clone)]
pub struct SqsQueueService {
    client: aws_sdk_sqs::Client,
}

impl SqsQueueService {
    /// Loads AWS credentials from the environment and builds a client for the
    /// configured region and optional endpoint.
    pub async fn connect(config: &SqsConfig) -> Self {
        let region = config.resolved_region();
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;

        info!(region = %region, endpoint = ?config.endpoint_url, "SQS client ready");

        Self::from_client(aws_sdk_sqs::Client::new(&shared))
    }

    /// Wraps an existing client.
    pub fn from_client(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<QueueRef, QueueError> {
        let output = self
            .client
            .create_queue()
            .queue_name(name)
            .attributes(
                QueueAttributeName::MessageRetentionPeriod,
                attributes.retention_secs.to_string(),
            )
            .attributes(
                QueueAttributeName::VisibilityTimeout,
                attributes.visibility_timeout_secs.to_string(),
            )
            .attributes(QueueAttributeName::FifoQueue, "true")
            .attributes(QueueAttributeName::ContentBasedDeduplication, "true")
            .send()
            .await
            .map_err(|e| QueueError::CreateFailed {
                name: name.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        let url = output
            .queue_url()
            .ok_or_else(|| QueueError::MissingQueueUrl(name.to_string()))?;

        debug!(queue = %name, url = %url, "Queue provisioned");
        Ok(QueueRef::new(url))
    }

    async fn publish(&self, queue: &QueueRef, message: &QueueMessage) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(queue.as_str())
            .message_body(&message.body)
            .message_deduplication_id(&message.dedup_id)
            .message_group_id(&message.group_id)
            .send()
            .await
            .map_err(|e| QueueError::Publish(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for SqsQueueService {
    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue.as_str())
            .max_number_of_messages(max_messages.clamp(1, 10))
            .wait_time_seconds(wait.as_secs().min(MAX_WAIT_SECS) as i32)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|m| {
                Some(ReceivedMessage {
                    message_id: m.message_id().unwrap_or_default().to_string(),
                    body: m.body().map(str::to_string),
                    receipt_handle: m.receipt_handle()?.to_string(),
                })
            })
            .collect();

        Ok(messages)
    }

    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(queue.as_str())
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}
