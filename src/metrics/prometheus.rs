//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by delay-scheduler and
//! provides functions for initializing, registering, and exporting metrics.

use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all delay-scheduler metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Events scheduled, labeled by job type.
pub static EVENTS_SCHEDULED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Events removed before firing, labeled by job type.
pub static EVENTS_REMOVED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Fires started, labeled by job type.
pub static FIRES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Publish attempts, labeled by job type and status.
pub static PUBLISH_ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Failed fires rescheduled for another attempt, labeled by job type.
pub static RETRIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Fires abandoned after exhausting the retry bound, labeled by job type.
pub static ABANDONED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Expiry notifications ignored because they did not belong to a registered type.
pub static IGNORED_NOTIFICATIONS_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls register a fresh registry but leave the
/// statics pointing at the first one.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let events_scheduled = CounterVec::new(
        Opts::new("delay_scheduler_events_scheduled_total", "Total events scheduled"),
        &["job_type"],
    )?;

    let events_removed = CounterVec::new(
        Opts::new("delay_scheduler_events_removed_total", "Total events removed"),
        &["job_type"],
    )?;

    let fires = CounterVec::new(
        Opts::new("delay_scheduler_fires_total", "Total expiry-triggered fires"),
        &["job_type"],
    )?;

    let publish_attempts = CounterVec::new(
        Opts::new(
            "delay_scheduler_publish_attempts_total",
            "Total queue publish attempts",
        ),
        &["job_type", "status"],
    )?;

    let retries = CounterVec::new(
        Opts::new("delay_scheduler_retries_total", "Total fires rescheduled after a failure"),
        &["job_type"],
    )?;

    let abandoned = CounterVec::new(
        Opts::new(
            "delay_scheduler_abandoned_total",
            "Total fires abandoned after exhausting retries",
        ),
        &["job_type"],
    )?;

    let ignored = Counter::new(
        "delay_scheduler_ignored_notifications_total",
        "Expiry notifications for keys outside the scheduler namespace",
    )?;

    registry.register(Box::new(events_scheduled.clone()))?;
    registry.register(Box::new(events_removed.clone()))?;
    registry.register(Box::new(fires.clone()))?;
    registry.register(Box::new(publish_attempts.clone()))?;
    registry.register(Box::new(retries.clone()))?;
    registry.register(Box::new(abandoned.clone()))?;
    registry.register(Box::new(ignored.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = EVENTS_SCHEDULED_TOTAL.set(events_scheduled);
    let _ = EVENTS_REMOVED_TOTAL.set(events_removed);
    let _ = FIRES_TOTAL.set(fires);
    let _ = PUBLISH_ATTEMPTS_TOTAL.set(publish_attempts);
    let _ = RETRIES_TOTAL.set(retries);
    let _ = ABANDONED_TOTAL.set(abandoned);
    let _ = IGNORED_NOTIFICATIONS_TOTAL.set(ignored);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line if the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        let result = init_metrics();
        // First call should succeed or metrics already initialized
        assert!(result.is_ok() || REGISTRY.get().is_some());
    }

    #[test]
    fn test_metrics_after_init() {
        let _ = init_metrics();

        let metrics = export_metrics();
        assert!(!metrics.is_empty());
        assert!(!metrics.starts_with("# Error"));
    }
}
