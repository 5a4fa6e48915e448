//! The scheduling state machine.
//!
//! Per `(type, id)`:
//!
//! ```text
//! schedule_event ──► Pending ──(TTL expires)──► Fired ──► Enqueued
//!                       ▲                          │
//!                       └──── Retrying ◄───────────┤ (publish failed, tries+1 < max)
//!                                                  └──► Abandoned (tries+1 == max)
//! ```
//!
//! All state lives in the store: the event key (TTL-bearing) and its tries key.
//! Nothing is locked; concurrent schedule/remove/fire for the same pair
//! resolve as last write wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::job::{FireEvent, FireOutcome};
use super::keys::EventKey;
use super::listener::{spawn_listener, ConsumptionHandle};
use super::registry::{JobType, JobTypeRegistry};
use super::retry::{parse_tries, RetryDecision, RetryPolicy};
use crate::config::SchedulerConfig;
use crate::error::{QueueError, SchedulerError, StoreError};
use crate::metrics::MetricsCollector;
use crate::queue::{QueueMessage, QueueService, SqsQueueService};
use crate::store::{RedisStore, TtlStore};

/// Capacity of the fire event broadcast channel.
const FIRE_EVENT_CAPACITY: usize = 256;

/// Delayed job scheduler.
///
/// Cheap to clone; clones share the same store, queue clients and registry.
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn TtlStore>,
    queues: Arc<dyn QueueService>,
    registry: Arc<JobTypeRegistry>,
    policy: RetryPolicy,
    events: broadcast::Sender<FireEvent>,
    metrics: MetricsCollector,
    consuming: Arc<AtomicBool>,
}

impl Scheduler {
    /// Validates the configuration and provisions one queue per job type.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Configuration` for an invalid configuration
    /// - `SchedulerError::Provisioning` if any queue cannot be created
    pub async fn new(
        config: &SchedulerConfig,
        store: Arc<dyn TtlStore>,
        queues: Arc<dyn QueueService>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        let registry =
            JobTypeRegistry::provision(config.types.as_slice(), &config.queue, queues.as_ref())
                .await?;
        let (events, _) = broadcast::channel(FIRE_EVENT_CAPACITY);

        Ok(Self {
            store,
            queues,
            registry: Arc::new(registry),
            policy: RetryPolicy::from_config(config),
            events,
            metrics: MetricsCollector::new(),
            consuming: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connects to Redis and SQS as configured, then provisions queues.
    pub async fn connect(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        let store = RedisStore::connect(&config.redis).await?;
        let queues = SqsQueueService::connect(&config.sqs).await;

        Self::new(config, Arc::new(store), Arc::new(queues)).await
    }

    /// The provisioned job types.
    pub fn registry(&self) -> &JobTypeRegistry {
        &self.registry
    }

    /// The retry policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Receives a [`FireEvent`] for every notification handled from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<FireEvent> {
        self.events.subscribe()
    }

    /// Schedules `(job_type, id)` to fire after `ttl` with a fresh tries count.
    pub async fn schedule_event(
        &self,
        job_type: &str,
        id: &str,
        ttl: Duration,
    ) -> Result<(), SchedulerError> {
        self.schedule_event_with_tries(job_type, id, ttl, 0).await
    }

    /// Schedules `(job_type, id)` to fire after `ttl` with the given tries count.
    ///
    /// Re-scheduling a pending pair replaces its TTL and tries count.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidJobType` if `job_type` is not registered
    /// - `SchedulerError::InvalidJobId` if `id` cannot be encoded into a key
    /// - `SchedulerError::Store` if a store write fails
    ///
    /// The first two are checked before any store write.
    #[tracing::instrument(skip(self), fields(ttl_secs = ttl.as_secs()))]
    pub async fn schedule_event_with_tries(
        &self,
        job_type: &str,
        id: &str,
        ttl: Duration,
        tries: u32,
    ) -> Result<(), SchedulerError> {
        let resolved = self
            .registry
            .resolve(job_type)
            .ok_or_else(|| SchedulerError::InvalidJobType(job_type.to_string()))?;
        let key = EventKey::new(resolved.name(), id)
            .ok_or_else(|| SchedulerError::InvalidJobId(id.to_string()))?;

        self.write_event(&key, ttl, tries).await?;
        self.metrics.record_scheduled(resolved.name());
        debug!(key = %key, tries, "Event scheduled");
        Ok(())
    }

    /// Cancels `(job_type, id)`, deleting its event and tries keys.
    ///
    /// Removing something that does not exist is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn remove_event(&self, job_type: &str, id: &str) -> Result<(), SchedulerError> {
        let Some(resolved) = self.registry.resolve(job_type) else {
            debug!("Remove for unregistered type, nothing to delete");
            return Ok(());
        };
        let Some(key) = EventKey::new(resolved.name(), id) else {
            return Ok(());
        };

        self.store.delete(&key.event_key()).await?;
        self.store.delete(&key.tries_key()).await?;
        self.metrics.record_removed(resolved.name());
        debug!(key = %key, "Event removed");
        Ok(())
    }

    /// Enables expiry notifications, subscribes, and starts the listener.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadyConsuming` while a listener is running
    /// - `SchedulerError::Store` if notifications cannot be enabled or subscribed
    pub async fn start_consumption(&self) -> Result<ConsumptionHandle, SchedulerError> {
        if self
            .consuming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyConsuming);
        }

        let subscribed = async {
            self.store.enable_expiry_notifications().await?;
            self.store.subscribe_expired().await
        }
        .await;

        match subscribed {
            Ok(expired) => {
                info!(job_types = ?self.registry.names(), "Expiry consumption started");
                Ok(spawn_listener(self.clone(), expired))
            }
            Err(e) => {
                self.consuming.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Handles one expired key and broadcasts the outcome.
    pub async fn on_expiry_notification(&self, key: &str) -> FireOutcome {
        let resolved = EventKey::decode(key).and_then(|k| {
            self.registry
                .resolve(k.job_type())
                .map(|job_type| (job_type.clone(), k))
        });

        let outcome = match resolved {
            Some((job_type, event_key)) => self.fire(&job_type, event_key.id()).await,
            None => {
                debug!(key = %key, "Ignoring expiry of a key outside the scheduler namespace");
                self.metrics.record_ignored();
                FireOutcome::Ignored
            }
        };

        // No subscribers is fine.
        let _ = self.events.send(FireEvent::new(key, outcome));
        outcome
    }

    /// Publishes `id` to `job_type`'s queue, then applies the retry policy on
    /// failure.
    ///
    /// A successful publish is always `Enqueued`; failing to clear the tries
    /// counter afterwards only leaves a stale key behind.
    #[tracing::instrument(skip(self, job_type), fields(job_type = %job_type.name()))]
    pub async fn fire(&self, job_type: &JobType, id: &str) -> FireOutcome {
        let Some(key) = EventKey::new(job_type.name(), id) else {
            return FireOutcome::Ignored;
        };
        self.metrics.record_fire(job_type.name());

        let published = self
            .queues
            .publish(job_type.queue(), &QueueMessage::for_job(key.id()))
            .await;
        self.metrics.record_publish(job_type.name(), published.is_ok());

        match published {
            Ok(()) => {
                if let Err(e) = self.store.delete(&key.tries_key()).await {
                    warn!(
                        key = %key,
                        tries_key = %key.tries_key(),
                        error = %e,
                        "Job enqueued but tries counter was not cleared"
                    );
                }
                info!(key = %key, "Job enqueued");
                FireOutcome::Enqueued
            }
            Err(e) => self.after_failed_attempt(job_type, &key, &e).await,
        }
    }

    /// Allows `start_consumption` to run again once the listener has exited.
    pub(crate) fn release_consumption(&self) {
        self.consuming.store(false, Ordering::SeqCst);
    }

    async fn write_event(&self, key: &EventKey, ttl: Duration, tries: u32) -> Result<(), StoreError> {
        self.store.set_with_ttl(&key.event_key(), key.id(), ttl).await?;
        self.store.set(&key.tries_key(), &tries.to_string()).await?;
        Ok(())
    }

    async fn after_failed_attempt(
        &self,
        job_type: &JobType,
        key: &EventKey,
        cause: &QueueError,
    ) -> FireOutcome {
        let current = match self.store.get(&key.tries_key()).await {
            Ok(value) => parse_tries(value.as_deref()),
            Err(e) => {
                warn!(key = %key, error = %e, "Could not read tries counter, counting from zero");
                0
            }
        };

        match self.policy.next(current) {
            RetryDecision::Retry { tries, after } => match self.write_event(key, after, tries).await {
                Ok(()) => {
                    self.metrics.record_retry(job_type.name());
                    warn!(
                        key = %key,
                        tries,
                        retry_in_secs = after.as_secs(),
                        error = %cause,
                        "Publish failed, rescheduled"
                    );
                    FireOutcome::Retrying { tries, after }
                }
                Err(e) => {
                    error!(key = %key, tries, error = %e, "Reschedule failed, retry chain lost");
                    if let Err(e) = self.store.delete(&key.event_key()).await {
                        debug!(key = %key, error = %e, "Event key cleanup failed");
                    }
                    self.abandon(job_type, key, tries).await
                }
            },
            RetryDecision::Abandon { attempts } => {
                warn!(key = %key, attempts, error = %cause, "Publish failed, retry bound reached");
                self.abandon(job_type, key, attempts).await
            }
        }
    }

    async fn abandon(&self, job_type: &JobType, key: &EventKey, attempts: u32) -> FireOutcome {
        if let Err(e) = self.store.delete(&key.tries_key()).await {
            error!(key = %key, error = %e, "Failed to delete tries counter of abandoned job");
        }
        self.metrics.record_abandoned(job_type.name());
        warn!(key = %key, attempts, "Job abandoned");
        FireOutcome::Abandoned { attempts }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("job_types", &self.registry.names())
            .field("policy", &self.policy)
            .field("consuming", &self.consuming.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::scheduler::ListenerExit;
    use crate::store::MemoryStore;

    async fn create_scheduler(
        types: &[&str],
        max_tries: u32,
    ) -> (Scheduler, MemoryStore, MemoryQueue) {
        let store = MemoryStore::new();
        let queue = MemoryQueue::new();
        let config = SchedulerConfig::new(types.iter().copied())
            .with_enqueue_max_tries(max_tries)
            .with_retry_interval(Duration::from_secs(2));

        let scheduler = Scheduler::new(&config, Arc::new(store.clone()), Arc::new(queue.clone()))
            .await
            .expect("scheduler should build");
        (scheduler, store, queue)
    }

    #[tokio::test]
    async fn test_new_rejects_empty_types() {
        let config = SchedulerConfig::default();
        let result = Scheduler::new(
            &config,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryQueue::new()),
        )
        .await;

        assert!(matches!(result, Err(SchedulerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_new_fails_on_provisioning_error() {
        let queue = MemoryQueue::new();
        queue.fail_create("orderss.fifo");

        let result = Scheduler::new(
            &SchedulerConfig::new(["orders"]),
            Arc::new(MemoryStore::new()),
            Arc::new(queue),
        )
        .await;

        assert!(matches!(result, Err(SchedulerError::Provisioning { .. })));
    }

    #[tokio::test]
    async fn test_schedule_writes_both_keys() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;

        scheduler
            .schedule_event("orders", "42", Duration::from_secs(30))
            .await
            .expect("schedule");

        assert_eq!(store.value("SC/orders/42").as_deref(), Some("42"));
        assert_eq!(store.ttl("SC/orders/42"), Some(Duration::from_secs(30)));
        assert_eq!(store.value("SC/orders/42/tries").as_deref(), Some("0"));
        assert_eq!(store.ttl("SC/orders/42/tries"), None);
    }

    #[tokio::test]
    async fn test_schedule_unknown_type_writes_nothing() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;

        let err = scheduler
            .schedule_event("invoices", "1", Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, SchedulerError::InvalidJobType(ref t) if t == "invoices"));
        assert_eq!(store.write_count(), 0);
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_schedule_rejects_unencodable_id() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;

        for id in ["", "a/b"] {
            let err = scheduler
                .schedule_event("orders", id, Duration::from_secs(5))
                .await
                .unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidJobId(_)));
        }
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_propagates_store_errors() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;
        store.fail_writes(true);

        let err = scheduler
            .schedule_event("orders", "1", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Store(_)));
    }

    #[tokio::test]
    async fn test_remove_propagates_store_errors() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;
        scheduler
            .schedule_event("orders", "42", Duration::from_secs(30))
            .await
            .expect("schedule");
        store.fail_writes(true);

        let err = scheduler.remove_event("orders", "42").await.unwrap_err();

        assert!(matches!(err, SchedulerError::Store(_)));
        assert!(store.contains("SC/orders/42"));
    }

    #[tokio::test]
    async fn test_reschedule_overwrites() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;

        scheduler
            .schedule_event_with_tries("orders", "42", Duration::from_secs(30), 2)
            .await
            .expect("schedule");
        scheduler
            .schedule_event("orders", "42", Duration::from_secs(90))
            .await
            .expect("reschedule");

        assert_eq!(store.keys(), vec!["SC/orders/42", "SC/orders/42/tries"]);
        assert_eq!(store.ttl("SC/orders/42"), Some(Duration::from_secs(90)));
        assert_eq!(store.value("SC/orders/42/tries").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;

        scheduler
            .schedule_event("orders", "42", Duration::from_secs(30))
            .await
            .expect("schedule");

        scheduler.remove_event("orders", "42").await.expect("remove");
        assert!(store.keys().is_empty());

        scheduler
            .remove_event("orders", "42")
            .await
            .expect("second remove is a no-op");
        scheduler
            .remove_event("unknown", "42")
            .await
            .expect("unknown type is a no-op");
    }

    #[tokio::test]
    async fn test_fire_success_publishes_and_clears_tries() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 5).await;
        scheduler
            .schedule_event("orders", "42", Duration::from_secs(1))
            .await
            .expect("schedule");
        store.expire("SC/orders/42");

        let outcome = scheduler.on_expiry_notification("SC/orders/42").await;

        assert_eq!(outcome, FireOutcome::Enqueued);
        let published = queue.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, QueueMessage::for_job("42"));
        assert_eq!(published[0].0.as_str(), "memory://queues/orderss.fifo");
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_fire_failure_reschedules() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 3).await;
        scheduler
            .schedule_event("orders", "42", Duration::from_secs(1))
            .await
            .expect("schedule");
        store.expire("SC/orders/42");
        queue.fail_publishes(true);

        let outcome = scheduler.on_expiry_notification("SC/orders/42").await;

        assert_eq!(
            outcome,
            FireOutcome::Retrying {
                tries: 1,
                after: Duration::from_secs(2)
            }
        );
        assert_eq!(store.ttl("SC/orders/42"), Some(Duration::from_secs(2)));
        assert_eq!(store.value("SC/orders/42/tries").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_fire_abandons_at_bound() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 3).await;
        scheduler
            .schedule_event_with_tries("orders", "42", Duration::from_secs(1), 2)
            .await
            .expect("schedule");
        store.expire("SC/orders/42");
        queue.fail_publishes(true);

        let outcome = scheduler.on_expiry_notification("SC/orders/42").await;

        assert_eq!(outcome, FireOutcome::Abandoned { attempts: 3 });
        assert!(store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tries_counts_as_zero() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 3).await;
        queue.fail_publishes(true);

        // No tries key at all, e.g. deleted by hand.
        let outcome = scheduler.on_expiry_notification("SC/orders/7").await;

        assert!(matches!(outcome, FireOutcome::Retrying { tries: 1, .. }));
        assert_eq!(store.value("SC/orders/7/tries").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_unreadable_tries_counts_as_zero() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 3).await;
        scheduler
            .schedule_event_with_tries("orders", "7", Duration::from_secs(1), 2)
            .await
            .expect("schedule");
        store.expire("SC/orders/7");
        queue.fail_publishes(true);
        store.fail_reads(true);

        let outcome = scheduler.on_expiry_notification("SC/orders/7").await;
        assert!(matches!(outcome, FireOutcome::Retrying { tries: 1, .. }));
    }

    #[tokio::test]
    async fn test_tries_cleanup_failure_still_enqueued() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 3).await;
        scheduler
            .schedule_event("orders", "1", Duration::from_secs(1))
            .await
            .expect("schedule");
        store.expire("SC/orders/1");
        store.fail_writes(true);

        let outcome = scheduler.on_expiry_notification("SC/orders/1").await;

        assert_eq!(outcome, FireOutcome::Enqueued);
        assert_eq!(queue.attempt_count(), 1);
        assert_eq!(queue.published().len(), 1);
        // Stale counter stays behind, but nothing is rescheduled.
        assert!(store.contains("SC/orders/1/tries"));
        assert!(!store.contains("SC/orders/1"));
    }

    #[tokio::test]
    async fn test_failed_reschedule_abandons() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 5).await;
        scheduler
            .schedule_event("orders", "3", Duration::from_secs(1))
            .await
            .expect("schedule");
        store.expire("SC/orders/3");
        queue.fail_publishes(true);
        store.fail_writes(true);

        let outcome = scheduler.on_expiry_notification("SC/orders/3").await;
        assert_eq!(outcome, FireOutcome::Abandoned { attempts: 1 });
    }

    #[tokio::test]
    async fn test_foreign_keys_are_ignored() {
        let (scheduler, _, queue) = create_scheduler(&["orders"], 5).await;

        for key in ["session:abc", "SC/invoices/1", "SC/orders/1/tries", "SC/orders"] {
            assert_eq!(scheduler.on_expiry_notification(key).await, FireOutcome::Ignored);
        }
        assert_eq!(queue.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_outcomes_are_broadcast() {
        let (scheduler, _, _) = create_scheduler(&["orders"], 5).await;
        let mut outcomes = scheduler.subscribe_outcomes();

        scheduler.on_expiry_notification("SC/orders/5").await;
        scheduler.on_expiry_notification("unrelated").await;

        let first = outcomes.recv().await.expect("event");
        assert!(first.is_for("orders", "5"));
        assert_eq!(first.outcome, FireOutcome::Enqueued);

        let second = outcomes.recv().await.expect("event");
        assert_eq!(second.key, "unrelated");
        assert_eq!(second.outcome, FireOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_start_consumption_enables_notifications_once() {
        let (scheduler, store, _) = create_scheduler(&["orders"], 5).await;

        let handle = scheduler.start_consumption().await.expect("start");
        assert!(store.notifications_enabled());

        let err = scheduler.start_consumption().await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyConsuming));

        assert_eq!(handle.shutdown().await, ListenerExit::Shutdown);

        let handle = scheduler
            .start_consumption()
            .await
            .expect("restart after shutdown");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_closed_subscription_stops_listener_and_allows_restart() {
        let (scheduler, store, queue) = create_scheduler(&["orders"], 5).await;

        let mut handle = scheduler.start_consumption().await.expect("start");
        store.close_subscriptions();

        let exit = tokio::time::timeout(Duration::from_secs(5), handle.stopped())
            .await
            .expect("listener exits");
        assert_eq!(exit, ListenerExit::SubscriptionClosed);
        assert!(handle.is_finished());
        assert_eq!(handle.stopped().await, ListenerExit::SubscriptionClosed);

        let mut outcomes = scheduler.subscribe_outcomes();
        let restarted = scheduler
            .start_consumption()
            .await
            .expect("restart after subscription loss");

        scheduler
            .schedule_event("orders", "8", Duration::from_secs(1))
            .await
            .expect("schedule");
        store.advance(Duration::from_secs(1));

        let event = tokio::time::timeout(Duration::from_secs(5), outcomes.recv())
            .await
            .expect("fire within timeout")
            .expect("event");
        assert_eq!(event.outcome, FireOutcome::Enqueued);
        assert_eq!(queue.published().len(), 1);

        restarted.shutdown().await;
    }
}
