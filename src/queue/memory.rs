//! In-process queue that records every call.
//!
//! Publishes can be made to fail on demand, either for the next N calls or
//! until switched back, which is how tests drive the retry path. Successfully
//! published messages are delivered to a per-queue inbox that honors
//! deduplication ids, so the same queue can back a test consumer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{QueueAttributes, QueueMessage, QueueReceiver, QueueRef, QueueService, ReceivedMessage};
use crate::error::QueueError;

/// Base URL used for queue refs handed out by [`MemoryQueue`].
pub const MEMORY_QUEUE_BASE: &str = "memory://queues";

const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One recorded publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAttempt {
    /// Target queue.
    pub queue: QueueRef,
    /// Published message.
    pub message: QueueMessage,
    /// Whether the call succeeded.
    pub succeeded: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    created: Vec<(String, QueueAttributes)>,
    attempts: Vec<PublishAttempt>,
    fail_next: u32,
    fail_all: bool,
    fail_create: HashSet<String>,
    seen_dedup_ids: HashMap<QueueRef, HashSet<String>>,
    inbox: HashMap<QueueRef, VecDeque<QueueMessage>>,
    in_flight: HashMap<String, QueueMessage>,
    fail_receives: bool,
    next_message: u64,
}

/// Recording queue service.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    /// Creates an empty queue service.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fails the next `count` publish calls.
    pub fn fail_next_publishes(&self, count: u32) {
        self.state().fail_next = count;
    }

    /// Fails every publish call until switched off.
    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_all = fail;
    }

    /// Fails every receive call until switched off.
    pub fn fail_receives(&self, fail: bool) {
        self.state().fail_receives = fail;
    }

    /// Fails creation of queue `name`.
    pub fn fail_create(&self, name: impl Into<String>) {
        self.state().fail_create.insert(name.into());
    }

    /// Names of created queues, in creation order.
    pub fn created_queues(&self) -> Vec<String> {
        self.state().created.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Attributes each queue was created with, in creation order.
    pub fn created_with(&self) -> Vec<(String, QueueAttributes)> {
        self.state().created.clone()
    }

    /// Every publish call, successful or not.
    pub fn attempts(&self) -> Vec<PublishAttempt> {
        self.state().attempts.clone()
    }

    /// Successfully published messages.
    pub fn published(&self) -> Vec<(QueueRef, QueueMessage)> {
        self.state()
            .attempts
            .iter()
            .filter(|a| a.succeeded)
            .map(|a| (a.queue.clone(), a.message.clone()))
            .collect()
    }

    /// Number of publish calls.
    pub fn attempt_count(&self) -> usize {
        self.state().attempts.len()
    }

    /// Number of messages waiting in `queue`'s inbox.
    pub fn pending(&self, queue: &QueueRef) -> usize {
        self.state().inbox.get(queue).map_or(0, VecDeque::len)
    }

    /// Received messages not yet deleted.
    pub fn unacknowledged(&self) -> usize {
        self.state().in_flight.len()
    }

    fn take(&self, queue: &QueueRef, max_messages: i32) -> Vec<ReceivedMessage> {
        let mut state = self.state();
        let mut received = Vec::new();

        for _ in 0..max_messages.max(1) {
            let Some(message) = state.inbox.get_mut(queue).and_then(VecDeque::pop_front) else {
                break;
            };
            state.next_message += 1;
            let receipt = format!("receipt-{}", state.next_message);
            received.push(ReceivedMessage {
                message_id: format!("msg-{}", state.next_message),
                body: Some(message.body.clone()),
                receipt_handle: receipt.clone(),
            });
            state.in_flight.insert(receipt, message);
        }

        received
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    async fn create_queue(
        &self,
        name: &str,
        attributes: &QueueAttributes,
    ) -> Result<QueueRef, QueueError> {
        let mut state = self.state();
        if state.fail_create.contains(name) {
            return Err(QueueError::CreateFailed {
                name: name.to_string(),
                reason: "injected create failure".to_string(),
            });
        }
        state.created.push((name.to_string(), *attributes));
        Ok(QueueRef::new(format!("{}/{}", MEMORY_QUEUE_BASE, name)))
    }

    async fn publish(&self, queue: &QueueRef, message: &QueueMessage) -> Result<(), QueueError> {
        let mut state = self.state();

        let fail = if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            state.fail_all
        };

        state.attempts.push(PublishAttempt {
            queue: queue.clone(),
            message: message.clone(),
            succeeded: !fail,
        });

        if fail {
            return Err(QueueError::Publish("injected publish failure".to_string()));
        }

        let first_delivery = state
            .seen_dedup_ids
            .entry(queue.clone())
            .or_default()
            .insert(message.dedup_id.clone());
        if first_delivery {
            state
                .inbox
                .entry(queue.clone())
                .or_default()
                .push_back(message.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for MemoryQueue {
    async fn receive(
        &self,
        queue: &QueueRef,
        max_messages: i32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            if self.state().fail_receives {
                return Err(QueueError::Receive("injected receive failure".to_string()));
            }
            let received = self.take(queue, max_messages);
            let now = Instant::now();
            if !received.is_empty() || now >= deadline {
                return Ok(received);
            }
            tokio::time::sleep((deadline - now).min(RECEIVE_POLL_INTERVAL)).await;
        }
    }

    async fn delete(&self, _queue: &QueueRef, receipt_handle: &str) -> Result<(), QueueError> {
        self.state().in_flight.remove(receipt_handle);
        Ok(())
    }
}
