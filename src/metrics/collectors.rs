//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until `init_metrics()` has run, so library users
//! that never export metrics pay nothing beyond a `OnceLock` read.

use super::prometheus::{
    ABANDONED_TOTAL, EVENTS_REMOVED_TOTAL, EVENTS_SCHEDULED_TOTAL, FIRES_TOTAL,
    IGNORED_NOTIFICATIONS_TOTAL, PUBLISH_ATTEMPTS_TOTAL, RETRIES_TOTAL,
};

/// Metrics collector for scheduler operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a scheduled (or rescheduled) event.
    pub fn record_scheduled(&self, job_type: &str) {
        if let Some(counter) = EVENTS_SCHEDULED_TOTAL.get() {
            counter.with_label_values(&[job_type]).inc();
        }
    }

    /// Record an explicit removal.
    pub fn record_removed(&self, job_type: &str) {
        if let Some(counter) = EVENTS_REMOVED_TOTAL.get() {
            counter.with_label_values(&[job_type]).inc();
        }
    }

    /// Record the start of a fire sequence.
    pub fn record_fire(&self, job_type: &str) {
        if let Some(counter) = FIRES_TOTAL.get() {
            counter.with_label_values(&[job_type]).inc();
        }
    }

    /// Record a publish attempt.
    pub fn record_publish(&self, job_type: &str, success: bool) {
        let status = if success { "success" } else { "failure" };

        if let Some(counter) = PUBLISH_ATTEMPTS_TOTAL.get() {
            counter.with_label_values(&[job_type, status]).inc();
        }

        tracing::trace!(job_type = job_type, status = status, "Recorded publish metric");
    }

    /// Record a reschedule after a failed attempt.
    pub fn record_retry(&self, job_type: &str) {
        if let Some(counter) = RETRIES_TOTAL.get() {
            counter.with_label_values(&[job_type]).inc();
        }
    }

    /// Record an abandoned fire.
    pub fn record_abandoned(&self, job_type: &str) {
        if let Some(counter) = ABANDONED_TOTAL.get() {
            counter.with_label_values(&[job_type]).inc();
        }
    }

    /// Record a notification that did not map to a registered type.
    pub fn record_ignored(&self) {
        if let Some(counter) = IGNORED_NOTIFICATIONS_TOTAL.get() {
            counter.inc();
        }
    }
}
