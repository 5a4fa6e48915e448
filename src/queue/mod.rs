//! Ordered, deduplicated work queues.
//!
//! Every job type gets one FIFO queue named `<type>s.fifo`. Firing a job
//! publishes its id as the message body, with the id also used as the
//! deduplication id and the message group id, so repeated fires of the same
//! id collapse inside the dedup window and stay ordered.
//!
//! - [`SqsQueueService`]: AWS SQS FIFO queues
//! - [`MemoryQueue`]: in-process recording queue with failure injection

pub mod memory;
pub mod sqs;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

pub use self::memory::MemoryQueue;
pub use self::sqs::SqsQueueService;

/// Suffix appended to a pluralized job type name to form its queue name.
pub const FIFO_QUEUE_SUFFIX: &str = "s.fifo";

/// Attributes applied when a queue is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueAttributes {
    /// How long unconsumed messages are kept.
    pub retention_secs: u64,
    /// How long a received message stays hidden from other consumers.
    pub visibility_timeout_secs: u64,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        Self {
            retention_secs: 24 * 3600,
            visibility_timeout_secs: 10 * 60,
        }
    }
}

/// Opaque handle to a provisioned queue (the queue URL for SQS).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueRef(String);

impl QueueRef {
    /// Wraps a queue URL or identifier.
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    /// The queue URL or identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Message body.
    pub body: String,
    /// Deduplication id.
    pub dedup_id: String,
    /// Ordering group id.
    pub group_id: String,
}

impl QueueMessage {
    /// The message published when job `id` fires.
    pub fn for_job(id: &str) -> Self {
        Self {
            body: id.to_string(),
            dedup_id: id.to_string(),
            group_id: id.to_string(),
        }
    }
}

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Queue-assigned message id.
    pub message_id: String,
    /// Message body.
    pub body: Option<String>,
    /// Handle used to delete the message after processing.
    pub receipt_handle: String,
}

/// Queue provisioning and publishing.
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Creates (or returns the existing) FIFO queue `name`.
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<QueueRef, QueueError>;

    /// Publishes one message.
    async fn publish(&self, queue: &QueueRef, message: &QueueMessage) -> Result<(), QueueError>;
}

/// Receiving side of a queue, used by the consumption adapter.
#[async_trait]
pub trait QueueReceiver: Send + Sync {
    /// Receives up to `max_messages`, waiting up to `wait` for the first one.
    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Deletes a processed message.
    async fn delete(&self, queue: &QueueRef, receipt_handle: &str) -> Result<(), QueueError>;
}

/// Queue name for a job type: the name pluralized plus the FIFO suffix.
pub fn queue_name(job_type: &str) -> String {
    format!("{}{}", job_type, FIFO_QUEUE_SUFFIX)
}

/// Queue URL for a job type under `base_url` (e.g.
/// `https://sqs.us-east-1.amazonaws.com/123456789012`).
pub fn queue_url(base_url: &str, job_type: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), queue_name(job_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name("order"), "orders.fifo");
        assert_eq!(queue_name("myjob"), "myjobs.fifo");
    }

    #[test]
    fn test_queue_url() {
        let base = "https://sqs.us-east-1.amazonaws.com/123456789012";
        assert_eq!(
            queue_url(base, "myjob"),
            "https://sqs.us-east-1.amazonaws.com/123456789012/myjobs.fifo"
        );
        assert_eq!(
            queue_url(&format!("{base}/"), "myjob"),
            "https://sqs.us-east-1.amazonaws.com/123456789012/myjobs.fifo"
        );
    }

    #[test]
    fn test_message_for_job_uses_id_everywhere() {
        let message = QueueMessage::for_job("42");
        assert_eq!(message.body, "42");
        assert_eq!(message.dedup_id, "42");
        assert_eq!(message.group_id, "42");
    }

    #[test]
    fn test_default_attributes() {
        let attributes = QueueAttributes::default();
        assert_eq!(attributes.retention_secs, 86_400);
        assert_eq!(attributes.visibility_timeout_secs, 600);
    }
}
