//! delay-scheduler: delayed, retry-aware job firing over Redis and SQS.
//!
//! Jobs are scheduled as Redis keys with a TTL. When a key expires, the
//! scheduler publishes the job id to the FIFO queue of its job type, retrying
//! failed publishes a bounded number of times before abandoning the job.

pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod store;

// Re-export the types most callers need
pub use config::SchedulerConfig;
pub use consumer::{Consumer, ConsumerBuilder, ConsumerConfig};
pub use error::{ConsumerError, QueueError, SchedulerError, StoreError};
pub use scheduler::{
    ConsumptionHandle, FireEvent, FireOutcome, ListenerExit, RetryPolicy, Scheduler,
};
