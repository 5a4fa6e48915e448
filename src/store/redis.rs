//! Redis-backed TTL store.
//!
//! Three connections are held for the lifetime of the store, each created
//! once and reused:
//!
//! - `commands`: `SET`/`GET`/`DEL` traffic from scheduling and firing
//! - `admin`: the one-time `CONFIG SET notify-keyspace-events`
//! - a dedicated pub/sub connection opened by [`TtlStore::subscribe_expired`]
//!
//! The command connections are `ConnectionManager`s and reconnect on their own.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{expired_channel, ttl_seconds, ExpiredKeys, TtlStore, EXPIRED_CHANNEL_CAPACITY};
use crate::config::RedisConfig;
use crate::error::StoreError;

/// Keyspace notification classes: keyevent (`E`) for expired keys (`x`).
const EXPIRED_EVENTS_ONLY: &str = "Ex";

/// TTL store backed by Redis.
pub struct RedisStore {
    client: redis::Client,
    commands: ConnectionManager,
    admin: ConnectionManager,
    db: i64,
}

impl RedisStore {
    /// Connects the command and admin connections.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the URL is invalid or Redis
    /// cannot be reached.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let info = config
            .connection_info()
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let client =
            redis::Client::open(info).map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;
        let admin = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        info!(url = %config.url, db = config.db, "Connected to Redis");

        Ok(Self {
            client,
            commands,
            admin,
            db: config.db,
        })
    }
}

#[async_trait]
impl TtlStore for RedisStore {
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.commands.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.commands.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.commands.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.commands.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn enable_expiry_notifications(&self) -> Result<(), StoreError> {
        let mut conn = self.admin.clone();
        redis::cmd("CONFIG")
            .arg("SET")
            .arg("notify-keyspace-events")
            .arg(EXPIRED_EVENTS_ONLY)
            .query_async::<_, ()>(&mut conn)
            .await?;
        debug!("Enabled expired-key notifications");
        Ok(())
    }

    async fn subscribe_expired(&self) -> Result<ExpiredKeys, StoreError> {
        let channel = expired_channel(self.db);

        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;
        let mut pubsub = conn.into_pubsub();
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| StoreError::Subscription(e.to_string()))?;

        info!(channel = %channel, "Subscribed to expired-key notifications");

        let (tx, rx) = mpsc::channel(EXPIRED_CHANNEL_CAPACITY);

        // The pub/sub connection lives in this task; dropping the receiver ends it.
        tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                match msg.get_payload::<String>() {
                    Ok(key) => {
                        if tx.send(key).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Discarding expiry notification with unreadable payload");
                    }
                }
            }
            debug!(channel = %channel, "Expired-key subscription closed");
        });

        Ok(rx)
    }
}
