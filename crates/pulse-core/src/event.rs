//! Queued measurement events

use std::collections::BTreeMap;

/// What kind of measurement an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An elapsed-time measurement, reported under `t_other`.
    Timer,
    /// A count or custom value, reported under its own wire label.
    Metric,
}

/// One buffered measurement, created at the moment a send call is made.
///
/// Page group, A/B bucket and dimensions are captured by value here, so
/// later mutations of app state never retroactively affect an event that
/// is already queued. An event leaves the queue the instant it is
/// dequeued for draining, whether or not a beacon results.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// Timer or metric.
    pub kind: EventKind,
    /// Caller-facing semantic name, resolved against the definition
    /// tables at drain time.
    pub name: String,
    /// Rounded timer milliseconds, or the metric value.
    pub value: f64,
    /// Page group in effect when the event was enqueued.
    pub page_group: Option<String>,
    /// A/B bucket in effect when the event was enqueued.
    pub ab_bucket: Option<String>,
    /// Dimension snapshot taken at enqueue time.
    pub dimensions: BTreeMap<String, String>,
    /// Wall-clock milliseconds when the event was enqueued.
    pub enqueued_at: u64,
}

/// Whether a string is acceptable as an A/B bucket name.
///
/// Buckets are limited to 25 characters drawn from ASCII alphanumerics,
/// underscore, space and dash.
pub fn is_valid_ab_bucket(bucket: &str) -> bool {
    !bucket.is_empty()
        && bucket.len() <= 25
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ab_bucket_accepts_the_documented_alphabet() {
        assert!(is_valid_ab_bucket("A"));
        assert!(is_valid_ab_bucket("bucket_1 -B"));
        assert!(is_valid_ab_bucket("exactly-25-characters-yes"));
    }

    #[test]
    fn ab_bucket_rejects_empty_long_and_foreign_characters() {
        assert!(!is_valid_ab_bucket(""));
        assert!(!is_valid_ab_bucket("twenty-six-characters-long"));
        assert!(!is_valid_ab_bucket("no/slashes"));
        assert!(!is_valid_ab_bucket("no.dots"));
        assert!(!is_valid_ab_bucket("ünïcode"));
    }
}
