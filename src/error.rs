//! Error types for delay-scheduler operations.
//!
//! Defines the error types for each subsystem:
//! - Scheduler construction, scheduling and removal
//! - TTL store round-trips (Redis)
//! - Queue provisioning and publishing (SQS)
//! - The consumption adapter

use thiserror::Error;

/// Errors surfaced by the scheduler to its callers.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid configuration or missing required argument at construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `schedule_event` was called with a type that is not registered.
    #[error("Invalid job type '{0}'")]
    InvalidJobType(String),

    /// The job id cannot be encoded into an event key.
    #[error("Invalid job id '{0}': must be non-empty and must not contain '/'")]
    InvalidJobId(String),

    /// Queue creation failed during startup.
    #[error("Failed to provision queue for job type '{job_type}': {source}")]
    Provisioning {
        job_type: String,
        #[source]
        source: QueueError,
    },

    /// A store round-trip failed.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    /// Consumption was already started on this scheduler.
    #[error("Expiry consumption already started")]
    AlreadyConsuming,
}

/// Errors that can occur while talking to the TTL store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis command failed.
    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    /// The notification subscription could not be established or was closed.
    #[error("Expiry subscription failed: {0}")]
    Subscription(String),
}

/// Errors that can occur while provisioning or publishing to queues.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Queue creation was rejected.
    #[error("Queue creation failed for '{name}': {reason}")]
    CreateFailed { name: String, reason: String },

    /// Queue creation succeeded but no queue URL came back.
    #[error("Queue '{0}' was created without a queue URL")]
    MissingQueueUrl(String),

    /// Publishing a message failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Receiving messages failed.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Deleting a consumed message failed.
    #[error("Delete failed: {0}")]
    Delete(String),
}

/// Errors reported by the consumption adapter.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Transport failure talking to the queue.
    #[error("Transport error: {0}")]
    Transport(#[from] QueueError),

    /// The message handler returned an error.
    #[error("Message processing failed for message {message_id}: {reason}")]
    Processing { message_id: String, reason: String },

    /// A received message had no body.
    #[error("Message {0} has no body")]
    EmptyBody(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_display() {
        let err = SchedulerError::InvalidJobType("invoices".to_string());
        assert_eq!(err.to_string(), "Invalid job type 'invoices'");

        let err = SchedulerError::Configuration("At least one job type is required".to_string());
        assert!(err.to_string().contains("At least one job type"));

        let err = SchedulerError::InvalidJobId("a/b".to_string());
        assert!(err.to_string().contains("a/b"));
    }

    #[test]
    fn test_provisioning_error_keeps_source() {
        let err = SchedulerError::Provisioning {
            job_type: "orders".to_string(),
            source: QueueError::CreateFailed {
                name: "orderss.fifo".to_string(),
                reason: "AccessDenied".to_string(),
            },
        };

        assert!(err.to_string().contains("orders"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_store_error_converts() {
        let err: SchedulerError = StoreError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(err, SchedulerError::Store(_)));
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_consumer_error_display() {
        let err = ConsumerError::Processing {
            message_id: "m-1".to_string(),
            reason: "bad payload".to_string(),
        };
        assert!(err.to_string().contains("m-1"));
        assert!(err.to_string().contains("bad payload"));

        let err: ConsumerError = QueueError::Receive("timeout".to_string()).into();
        assert!(err.to_string().contains("timeout"));
    }
}
