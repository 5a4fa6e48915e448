//! TTL store abstraction.
//!
//! The scheduler keeps all event state in a key-value store that supports
//! per-key expiry and announces expired keys on a notification channel:
//!
//! - [`RedisStore`]: Redis, using keyspace notifications
//!   (`notify-keyspace-events Ex`) and the `__keyevent@<db>__:expired` channel
//! - [`MemoryStore`]: in-process store with a manual clock, used by tests and
//!   local dry runs

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::StoreError;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

/// Capacity of the channel carrying expired key names to the listener.
pub const EXPIRED_CHANNEL_CAPACITY: usize = 1024;

/// Receiving side of an expiry subscription. Yields one key name per expiry.
pub type ExpiredKeys = mpsc::Receiver<String>;

/// Key-value store with per-key expiry and expiry notifications.
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// `SET key value EX ttl`. Fractional TTLs are rounded up to whole seconds.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// `SET key value` with no expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// `GET key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// `DEL key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Turns on expired-key notifications. Must run before subscribing.
    async fn enable_expiry_notifications(&self) -> Result<(), StoreError>;

    /// Subscribes to expired-key notifications for the selected database.
    async fn subscribe_expired(&self) -> Result<ExpiredKeys, StoreError>;
}

/// Name of the expired-key channel for database `db`.
pub fn expired_channel(db: i64) -> String {
    format!("__keyevent@{}__:expired", db)
}

/// Whole seconds for an `EX` argument, rounded up and never below one.
pub fn ttl_seconds(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_channel_name() {
        assert_eq!(expired_channel(0), "__keyevent@0__:expired");
        assert_eq!(expired_channel(5), "__keyevent@5__:expired");
    }

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(300)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(1)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(2500)), 3);
        assert_eq!(ttl_seconds(Duration::from_millis(2900)), 3);
        assert_eq!(ttl_seconds(Duration::from_nanos(3_000_000_001)), 4);
        assert_eq!(ttl_seconds(Duration::from_secs(3600)), 3600);
    }
}
