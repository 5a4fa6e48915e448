//! Scheduler configuration.
//!
//! Configuration can be built in code with the `with_*` builder methods or
//! loaded from a YAML file:
//!
//! ```yaml
//! redis:
//!   url: redis://127.0.0.1:6379
//!   db: 0
//! sqs:
//!   region: eu-west-1
//! enqueue_max_tries: 5
//! retry_interval_secs: 10
//! types:
//!   - orders
//!   - invoices
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;
use crate::queue::QueueAttributes;
use crate::scheduler::keys::KEY_SEPARATOR;

/// Default number of publish attempts before a firing is abandoned.
pub const DEFAULT_ENQUEUE_MAX_TRIES: u32 = 5;

/// Default TTL, in seconds, for rescheduled firings.
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 10;

/// Region used when neither the config nor `SQS_REGION` names one.
pub const DEFAULT_SQS_REGION: &str = "us-east-1";

/// Redis connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, without a database path.
    pub url: String,
    /// Selected database index. Also scopes the expiry notification channel.
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Builds the connection info for the configured URL and database.
    pub fn connection_info(&self) -> Result<redis::ConnectionInfo, redis::RedisError> {
        use redis::IntoConnectionInfo;

        let mut info = self.url.as_str().into_connection_info()?;
        info.redis.db = self.db;
        Ok(info)
    }
}

/// SQS client settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    /// AWS region. Falls back to `SQS_REGION`, then `us-east-1`.
    pub region: Option<String>,
    /// Endpoint override for local SQS emulators.
    pub endpoint_url: Option<String>,
}

impl SqsConfig {
    /// Returns the region to use for the SQS client.
    pub fn resolved_region(&self) -> String {
        self.region
            .clone()
            .or_else(|| std::env::var("SQS_REGION").ok())
            .unwrap_or_else(|| DEFAULT_SQS_REGION.to_string())
    }
}

/// Full scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Redis connection settings.
    pub redis: RedisConfig,
    /// SQS client settings.
    pub sqs: SqsConfig,
    /// Attributes applied to every provisioned queue.
    pub queue: QueueAttributes,
    /// Number of publish attempts before a firing is abandoned.
    pub enqueue_max_tries: u32,
    /// TTL used when a failed firing is rescheduled.
    pub retry_interval_secs: u64,
    /// Job type names. Each one gets its own queue.
    pub types: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            redis: RedisConfig::default(),
            sqs: SqsConfig::default(),
            queue: QueueAttributes::default(),
            enqueue_max_tries: DEFAULT_ENQUEUE_MAX_TRIES,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL_SECS,
            types: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration for the given job types with default settings.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            types: types.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, SchedulerError> {
        serde_yaml::from_str(content)
            .map_err(|e| SchedulerError::Configuration(format!("invalid YAML config: {}", e)))
    }

    /// Reads and parses a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Sets the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis.url = url.into();
        self
    }

    /// Sets the Redis database index.
    pub fn with_redis_db(mut self, db: i64) -> Self {
        self.redis.db = db;
        self
    }

    /// Sets the SQS region.
    pub fn with_sqs_region(mut self, region: impl Into<String>) -> Self {
        self.sqs.region = Some(region.into());
        self
    }

    /// Sets an SQS endpoint override.
    pub fn with_sqs_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sqs.endpoint_url = Some(endpoint.into());
        self
    }

    /// Sets the retry bound.
    pub fn with_enqueue_max_tries(mut self, tries: u32) -> Self {
        self.enqueue_max_tries = tries;
        self
    }

    /// Sets the reschedule TTL.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_secs = interval.as_secs();
        self
    }

    /// Sets the queue attributes.
    pub fn with_queue_attributes(mut self, attributes: QueueAttributes) -> Self {
        self.queue = attributes;
        self
    }

    /// Reschedule TTL as a `Duration`.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Checks the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.types.is_empty() {
            return Err(SchedulerError::Configuration(
                "At least one job type is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &self.types {
            if name.is_empty() || name.contains(KEY_SEPARATOR) {
                return Err(SchedulerError::Configuration(format!(
                    "job type '{}' must be non-empty and must not contain '{}'",
                    name, KEY_SEPARATOR
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(SchedulerError::Configuration(format!(
                    "job type '{}' is listed more than once",
                    name
                )));
            }
        }

        if self.enqueue_max_tries == 0 {
            return Err(SchedulerError::Configuration(
                "enqueue_max_tries must be at least 1".to_string(),
            ));
        }

        if self.retry_interval_secs == 0 {
            return Err(SchedulerError::Configuration(
                "retry_interval_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
