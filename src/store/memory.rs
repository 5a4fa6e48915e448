//! In-process TTL store with a manual clock.
//!
//! Time only moves when [`MemoryStore::advance`] is called, which makes expiry
//! deterministic in tests. Expired keys are announced to every subscriber once
//! notifications have been enabled, mirroring Redis keyspace notifications.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ttl_seconds, ExpiredKeys, TtlStore, EXPIRED_CHANNEL_CAPACITY};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    notifications_enabled: bool,
    subscribers: Vec<mpsc::Sender<String>>,
    writes: u64,
    fail_writes: bool,
    fail_reads: bool,
}

impl MemoryState {
    fn expire(&mut self, key: &str) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        if self.notifications_enabled {
            self.subscribers.retain(|tx| {
                !matches!(
                    tx.try_send(key.to_string()),
                    Err(mpsc::error::TrySendError::Closed(_))
                )
            });
        }
        true
    }
}

/// TTL store held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-update; the map is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Moves the clock forward, expiring every key whose TTL runs out.
    ///
    /// Keys are expired in order of remaining TTL, then by name. Returns the
    /// expired key names.
    pub fn advance(&self, by: Duration) -> Vec<String> {
        let mut state = self.state();

        let mut due: Vec<(Duration, String)> = Vec::new();
        for (key, entry) in state.entries.iter_mut() {
            if let Some(ttl) = entry.ttl {
                if ttl <= by {
                    due.push((ttl, key.clone()));
                } else {
                    entry.ttl = Some(ttl - by);
                }
            }
        }
        due.sort();

        due.into_iter()
            .map(|(_, key)| {
                state.expire(&key);
                key
            })
            .collect()
    }

    /// Expires `key` immediately if it exists. Returns whether it existed.
    pub fn expire(&self, key: &str) -> bool {
        self.state().expire(key)
    }

    /// Current value of `key`.
    pub fn value(&self, key: &str) -> Option<String> {
        self.state().entries.get(key).map(|e| e.value.clone())
    }

    /// Remaining TTL of `key`, `None` if missing or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.state().entries.get(key).and_then(|e| e.ttl)
    }

    /// Whether `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        self.state().entries.contains_key(key)
    }

    /// All key names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of `SET` operations performed so far.
    pub fn write_count(&self) -> u64 {
        self.state().writes
    }

    /// Whether expiry notifications have been enabled.
    pub fn notifications_enabled(&self) -> bool {
        self.state().notifications_enabled
    }

    /// Closes every expiry subscription, as a dropped pub/sub connection would.
    pub fn close_subscriptions(&self) {
        self.state().subscribers.clear();
    }

    /// Makes every subsequent write (`SET`, `DEL`) fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    /// Makes every subsequent `GET` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    fn write(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StoreError::ConnectionFailed("injected write failure".to_string()));
        }
        state.writes += 1;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                ttl,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl TtlStore for MemoryStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.write(key, value, Some(Duration::from_secs(ttl_seconds(ttl))))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.write(key, value, None)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let state = self.state();
        if state.fail_reads {
            return Err(StoreError::ConnectionFailed("injected read failure".to_string()));
        }
        Ok(state.entries.get(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(StoreError::ConnectionFailed("injected write failure".to_string()));
        }
        state.entries.remove(key);
        Ok(())
    }

    async fn enable_expiry_notifications(&self) -> Result<(), StoreError> {
        self.state().notifications_enabled = true;
        Ok(())
    }

    async fn subscribe_expired(&self) -> Result<ExpiredKeys, StoreError> {
        let (tx, rx) = mpsc::channel(EXPIRED_CHANNEL_CAPACITY);
        self.state().subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();

        store.set("a", "1").await.expect("set");
        assert_eq!(store.get("a").await.expect("get"), Some("1".to_string()));
        assert_eq!(store.ttl("a"), None);

        store.delete("a").await.expect("delete");
        store.delete("a").await.expect("deleting a missing key is fine");
        assert_eq!(store.get("a").await.expect("get"), None);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_ttl_rounds_up_to_one_second() {
        let store = MemoryStore::new();

        store
            .set_with_ttl("k", "v", Duration::from_millis(10))
            .await
            .expect("set");
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_advance_expires_and_notifies() {
        let store = MemoryStore::new();
        store.enable_expiry_notifications().await.expect("enable");
        let mut expired = store.subscribe_expired().await.expect("subscribe");

        store
            .set_with_ttl("late", "v", Duration::from_secs(5))
            .await
            .expect("set");
        store
            .set_with_ttl("early", "v", Duration::from_secs(2))
            .await
            .expect("set");
        store.set("forever", "v").await.expect("set");

        assert!(store.advance(Duration::from_secs(1)).is_empty());
        assert_eq!(store.advance(Duration::from_secs(1)), vec!["early".to_string()]);
        assert_eq!(store.ttl("late"), Some(Duration::from_secs(3)));

        assert_eq!(store.advance(Duration::from_secs(10)), vec!["late".to_string()]);
        assert!(store.contains("forever"));

        assert_eq!(expired.recv().await.as_deref(), Some("early"));
        assert_eq!(expired.recv().await.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_no_notifications_until_enabled() {
        let store = MemoryStore::new();
        let mut expired = store.subscribe_expired().await.expect("subscribe");

        store
            .set_with_ttl("k", "v", Duration::from_secs(1))
            .await
            .expect("set");
        assert!(store.expire("k"));
        assert!(!store.contains("k"));
        assert!(expired.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();

        store.fail_writes(true);
        assert!(store.set("a", "1").await.is_err());
        assert!(store.delete("a").await.is_err());
        store.fail_writes(false);

        store.set("a", "1").await.expect("set");
        store.fail_reads(true);
        assert!(store.get("a").await.is_err());
    }
}
