//! Fire outcomes and the events broadcast for them.
//!
//! Each expiry notification handled by the scheduler ends in one
//! [`FireOutcome`]; the scheduler broadcasts it as a [`FireEvent`] so callers
//! can observe enqueues, retries and abandonment without polling the store.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::keys::EventKey;

/// Terminal result of handling one expiry notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// The job id was published to its queue and the tries counter cleared.
    Enqueued,
    /// Publishing failed; the event was rescheduled with `tries` after `after`.
    Retrying { tries: u32, after: Duration },
    /// Publishing failed `attempts` times; all store state was removed.
    Abandoned { attempts: u32 },
    /// The expired key is not a scheduler key or its type is not registered.
    Ignored,
}

impl FireOutcome {
    /// Short label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Retrying { .. } => "retrying",
            Self::Abandoned { .. } => "abandoned",
            Self::Ignored => "ignored",
        }
    }

    /// Whether no further fire will follow for this attempt chain.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Retrying { .. })
    }
}

impl fmt::Display for FireOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrying { tries, after } => {
                write!(f, "retrying (tries={}, after={}s)", tries, after.as_secs())
            }
            Self::Abandoned { attempts } => write!(f, "abandoned after {} attempts", attempts),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Broadcast record of one handled notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireEvent {
    /// The expired key exactly as announced by the store.
    pub key: String,
    /// Job type, when the key decoded.
    pub job_type: Option<String>,
    /// Job id, when the key decoded.
    pub id: Option<String>,
    /// What happened.
    pub outcome: FireOutcome,
    /// When handling finished.
    pub at: DateTime<Utc>,
}

impl FireEvent {
    /// Builds an event for `key`, decoding type and id when possible.
    pub fn new(key: impl Into<String>, outcome: FireOutcome) -> Self {
        let key = key.into();
        let decoded = EventKey::decode(&key);
        Self {
            job_type: decoded.as_ref().map(|k| k.job_type().to_string()),
            id: decoded.as_ref().map(|k| k.id().to_string()),
            key,
            outcome,
            at: Utc::now(),
        }
    }

    /// Whether this event concerns `(job_type, id)`.
    pub fn is_for(&self, job_type: &str, id: &str) -> bool {
        self.job_type.as_deref() == Some(job_type) && self.id.as_deref() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(FireOutcome::Enqueued.as_str(), "enqueued");
        assert_eq!(FireOutcome::Ignored.to_string(), "ignored");
        assert_eq!(
            FireOutcome::Abandoned { attempts: 3 }.to_string(),
            "abandoned after 3 attempts"
        );
        assert_eq!(
            FireOutcome::Retrying {
                tries: 1,
                after: Duration::from_secs(2)
            }
            .to_string(),
            "retrying (tries=1, after=2s)"
        );
    }

    #[test]
    fn test_only_retrying_is_not_final() {
        assert!(FireOutcome::Enqueued.is_final());
        assert!(FireOutcome::Ignored.is_final());
        assert!(FireOutcome::Abandoned { attempts: 5 }.is_final());
        assert!(!FireOutcome::Retrying {
            tries: 1,
            after: Duration::from_secs(10)
        }
        .is_final());
    }

    #[test]
    fn test_event_decodes_key() {
        let event = FireEvent::new("SC/orders/42", FireOutcome::Enqueued);
        assert_eq!(event.job_type.as_deref(), Some("orders"));
        assert_eq!(event.id.as_deref(), Some("42"));
        assert!(event.is_for("orders", "42"));
        assert!(!event.is_for("orders", "43"));
    }

    #[test]
    fn test_event_for_foreign_key() {
        let event = FireEvent::new("session:abc", FireOutcome::Ignored);
        assert_eq!(event.key, "session:abc");
        assert!(event.job_type.is_none());
        assert!(event.id.is_none());
    }
}
