//! Bounded retry policy for failed firings.
//!
//! A firing whose publish fails is rescheduled with `retry_interval` as its
//! TTL and an incremented tries count. Once the incremented count reaches
//! `max_tries` the firing is abandoned, so exactly `max_tries` publish
//! attempts happen for one attempt chain.

use std::time::Duration;

use crate::config::SchedulerConfig;

/// What to do after a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule with the given tries count after `after`.
    Retry { tries: u32, after: Duration },
    /// Stop; `attempts` publish attempts have been made.
    Abandon { attempts: u32 },
}

/// Retry bound and reschedule interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_tries: u32,
    retry_interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy. `max_tries` of zero is treated as one.
    pub fn new(max_tries: u32, retry_interval: Duration) -> Self {
        Self {
            max_tries: max_tries.max(1),
            retry_interval,
        }
    }

    /// Builds the policy from a scheduler configuration.
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self::new(config.enqueue_max_tries, config.retry_interval())
    }

    /// Maximum number of publish attempts.
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// TTL used for rescheduled firings.
    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Decides the next step given the tries count stored before the failed
    /// attempt.
    pub fn next(&self, current_tries: u32) -> RetryDecision {
        let attempts = current_tries.saturating_add(1);
        if attempts < self.max_tries {
            RetryDecision::Retry {
                tries: attempts,
                after: self.retry_interval,
            }
        } else {
            RetryDecision::Abandon { attempts }
        }
    }
}

/// Parses a stored tries value. Missing or unparsable values count as zero.
pub fn parse_tries(value: Option<&str>) -> u32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}
