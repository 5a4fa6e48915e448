//! Store key encoding for scheduled events.
//!
//! # Format
//!
//! - Event key: `SC/<type>/<id>`. Holds the job id and carries the TTL.
//! - Tries key: `SC/<type>/<id>/tries`. Holds the retry count, no TTL.
//!
//! Neither `<type>` nor `<id>` may contain `/`. Decoding accepts exactly three
//! non-empty segments with the `SC` prefix and returns `None` for anything
//! else, so unrelated keys expiring in the same database are skipped.

use std::fmt;

/// Namespace prefix for every key the scheduler owns.
pub const KEY_PREFIX: &str = "SC";

/// Segment separator.
pub const KEY_SEPARATOR: char = '/';

/// Suffix appended to an event key to form its tries key.
pub const TRIES_SUFFIX: &str = "/tries";

/// Decoded form of an event key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    job_type: String,
    id: String,
}

impl EventKey {
    /// Creates a key for `(job_type, id)`, or `None` if either part cannot
    /// be encoded.
    pub fn new(job_type: impl Into<String>, id: impl Into<String>) -> Option<Self> {
        let job_type = job_type.into();
        let id = id.into();
        if is_valid_segment(&job_type) && is_valid_segment(&id) {
            Some(Self { job_type, id })
        } else {
            None
        }
    }

    /// Parses an expired key name. Returns `None` for keys outside the format.
    pub fn decode(key: &str) -> Option<Self> {
        let mut parts = key.split(KEY_SEPARATOR);
        let prefix = parts.next()?;
        let job_type = parts.next()?;
        let id = parts.next()?;
        if parts.next().is_some() || prefix != KEY_PREFIX {
            return None;
        }
        Self::new(job_type, id)
    }

    /// The job type name.
    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    /// The job id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The TTL-bearing event key.
    pub fn event_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            KEY_PREFIX,
            self.job_type,
            self.id,
            sep = KEY_SEPARATOR
        )
    }

    /// The companion retry counter key.
    pub fn tries_key(&self) -> String {
        format!("{}{}", self.event_key(), TRIES_SUFFIX)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_key())
    }
}

/// Returns whether `segment` can appear as a type or id in a key.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(KEY_SEPARATOR)
}
