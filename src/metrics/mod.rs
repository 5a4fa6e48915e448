//! Metrics module for Prometheus-based monitoring.
//!
//! Counts scheduling, firing, publish attempts, retries and abandonment per
//! job type.
//!
//! # Example
//!
//! ```ignore
//! use delay_scheduler::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_publish("orders", true);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use self::prometheus::{export_metrics, init_metrics};

pub use self::prometheus::{
    ABANDONED_TOTAL, EVENTS_REMOVED_TOTAL, EVENTS_SCHEDULED_TOTAL, FIRES_TOTAL,
    IGNORED_NOTIFICATIONS_TOTAL, PUBLISH_ATTEMPTS_TOTAL, REGISTRY, RETRIES_TOTAL,
};
