//! Delayed job scheduling on top of a TTL store and per-type FIFO queues.
//!
//! - **Scheduler**: schedules, cancels and fires events
//! - **JobTypeRegistry**: job type names and their provisioned queues
//! - **RetryPolicy**: bounded retries for failed publishes
//!
//! # Architecture
//!
//! ```text
//!   schedule_event(type, id, ttl)
//!              │
//!       ┌──────▼───────┐   SC/<type>/<id>        (TTL)
//!       │    Redis     │   SC/<type>/<id>/tries  (no TTL)
//!       └──────┬───────┘
//!              │ __keyevent@<db>__:expired
//!       ┌──────▼───────┐
//!       │   Listener   │──► fire(type, id)
//!       └──────────────┘          │
//!                    ┌────────────┼─────────────┐
//!                    ▼            ▼             ▼
//!               Enqueued     Retrying       Abandoned
//!            (<type>s.fifo)  (TTL=retry)   (keys deleted)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use delay_scheduler::{Scheduler, SchedulerConfig};
//! use std::time::Duration;
//!
//! let config = SchedulerConfig::new(["orders"]);
//! let scheduler = Scheduler::connect(&config).await?;
//!
//! let consumption = scheduler.start_consumption().await?;
//! scheduler.schedule_event("orders", "42", Duration::from_secs(60)).await?;
//!
//! consumption.shutdown().await;
//! ```

pub mod event_scheduler;
pub mod job;
pub mod keys;
pub mod listener;
pub mod registry;
pub mod retry;

pub use event_scheduler::Scheduler;
pub use job::{FireEvent, FireOutcome};
pub use keys::EventKey;
pub use listener::{ConsumptionHandle, ListenerExit};
pub use registry::{JobType, JobTypeRegistry};
pub use retry::{RetryDecision, RetryPolicy};
