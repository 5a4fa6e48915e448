//! Consumption adapter for the per-type FIFO queues.
//!
//! Long-polls `<base>/<job_name>s.fifo`, hands each message body to the
//! message handler and deletes the message once the handler succeeds. A failed
//! handler leaves the message in the queue for redelivery after the visibility
//! timeout.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = Consumer::builder()
//!     .job_name("orders")
//!     .queue_base_url("https://sqs.us-east-1.amazonaws.com/123456789012")
//!     .receiver(Arc::new(SqsQueueService::connect(&config.sqs).await))
//!     .message(|body| async move {
//!         println!("order {body} is due");
//!         Ok(())
//!     })
//!     .processing_error(|e| eprintln!("{e}"))
//!     .transport_error(|e| eprintln!("{e}"))
//!     .build()?;
//!
//! consumer.run(shutdown_rx).await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{ConsumerError, SchedulerError};
use crate::queue::{queue_url, QueueReceiver, QueueRef, ReceivedMessage};

/// Long-poll wait per receive call.
pub const RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// Messages requested per receive call.
pub const RECEIVE_BATCH: i32 = 10;

/// Pause after a transport failure before polling again.
pub const TRANSPORT_BACKOFF: Duration = Duration::from_secs(1);

/// Error type message handlers may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type MessageHandler = Arc<dyn Fn(String) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(ConsumerError) + Send + Sync>;

/// Validated consumer settings.
#[derive(Clone)]
pub struct ConsumerConfig {
    pub job_name: String,
    pub queue_base_url: String,
    message: MessageHandler,
    processing_error: ErrorHandler,
    transport_error: ErrorHandler,
}

impl ConsumerConfig {
    /// URL of the queue this consumer reads.
    pub fn queue_url(&self) -> String {
        queue_url(&self.queue_base_url, &self.job_name)
    }
}

impl std::fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("job_name", &self.job_name)
            .field("queue_base_url", &self.queue_base_url)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Consumer`].
#[derive(Default)]
pub struct ConsumerBuilder {
    job_name: Option<String>,
    queue_base_url: Option<String>,
    receiver: Option<Arc<dyn QueueReceiver>>,
    message: Option<MessageHandler>,
    processing_error: Option<ErrorHandler>,
    transport_error: Option<ErrorHandler>,
}

impl ConsumerBuilder {
    /// Job type whose queue is consumed.
    pub fn job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    /// Queue URL prefix, e.g. `https://sqs.<region>.amazonaws.com/<account>`.
    pub fn queue_base_url(mut self, url: impl Into<String>) -> Self {
        self.queue_base_url = Some(url.into());
        self
    }

    pub fn receiver(mut self, receiver: Arc<dyn QueueReceiver>) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// Called with each message body. An `Err` leaves the message for redelivery.
    pub fn message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.message = Some(Arc::new(move |body| Box::pin(handler(body))));
        self
    }

    /// Called when the message handler fails or a message has no body.
    pub fn processing_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(ConsumerError) + Send + Sync + 'static,
    {
        self.processing_error = Some(Arc::new(handler));
        self
    }

    /// Called when receiving or deleting fails.
    pub fn transport_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(ConsumerError) + Send + Sync + 'static,
    {
        self.transport_error = Some(Arc::new(handler));
        self
    }

    /// # Errors
    ///
    /// Returns `SchedulerError::Configuration` naming the first missing piece.
    pub fn build(self) -> Result<Consumer, SchedulerError> {
        let missing = |what: &str| SchedulerError::Configuration(format!("{} is required", what));

        let job_name = self
            .job_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| missing("job name"))?;
        let queue_base_url = self.queue_base_url.ok_or_else(|| missing("queue base url"))?;
        let receiver = self.receiver.ok_or_else(|| missing("queue receiver"))?;
        let message = self.message.ok_or_else(|| missing("message handler"))?;
        let processing_error = self
            .processing_error
            .ok_or_else(|| missing("processing error handler"))?;
        let transport_error = self
            .transport_error
            .ok_or_else(|| missing("transport error handler"))?;

        let config = ConsumerConfig {
            job_name,
            queue_base_url,
            message,
            processing_error,
            transport_error,
        };
        let queue = QueueRef::new(config.queue_url());

        Ok(Consumer {
            config,
            queue,
            receiver,
        })
    }
}

/// Long-polling queue consumer.
pub struct Consumer {
    config: ConsumerConfig,
    queue: QueueRef,
    receiver: Arc<dyn QueueReceiver>,
}

impl Consumer {
    pub fn builder() -> ConsumerBuilder {
        ConsumerBuilder::default()
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// The queue being consumed.
    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }

    /// Polls until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(job_name = %self.config.job_name, queue = %self.queue, "Consumer started");

        loop {
            let batch = tokio::select! {
                _ = shutdown.recv() => break,
                batch = self.receiver.receive(&self.queue, RECEIVE_BATCH, RECEIVE_WAIT) => batch,
            };

            match batch {
                Ok(messages) => {
                    for message in messages {
                        self.handle(message).await;
                    }
                }
                Err(e) => {
                    (self.config.transport_error)(ConsumerError::Transport(e));
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(TRANSPORT_BACKOFF) => {}
                    }
                }
            }
        }

        info!(job_name = %self.config.job_name, "Consumer stopped");
    }

    async fn handle(&self, message: ReceivedMessage) {
        let Some(body) = message.body.clone() else {
            (self.config.processing_error)(ConsumerError::EmptyBody(message.message_id.clone()));
            self.delete(&message).await;
            return;
        };

        match (self.config.message)(body).await {
            Ok(()) => self.delete(&message).await,
            Err(e) => {
                debug!(message_id = %message.message_id, error = %e, "Handler failed, leaving message");
                (self.config.processing_error)(ConsumerError::Processing {
                    message_id: message.message_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn delete(&self, message: &ReceivedMessage) {
        if let Err(e) = self.receiver.delete(&self.queue, &message.receipt_handle).await {
            (self.config.transport_error)(ConsumerError::Transport(e));
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
