//! Beacon parameter maps and wire-format serialization
//!
//! A beacon is one outbound measurement report, sent as an HTTP GET whose
//! query string is built from a [`BeaconParams`] map. Keys and values are
//! both percent-encoded; a parameter whose value is absent still appears
//! on the wire as an empty `key=` pair, matching what the collection
//! service expects for passthrough fields it did not populate.

use crate::config::DefinitionTables;
use crate::event::{EventKind, QueuedEvent};
use std::collections::{btree_map, BTreeMap};
use tracing::warn;

/// Ordered key/value parameter map for one beacon.
///
/// Subscribers to the `before_beacon` event receive this map mutably and
/// may add or modify fields in place before serialization.
#[derive(Debug, Clone, Default)]
pub struct BeaconParams {
    entries: BTreeMap<String, Option<String>>,
    /// Per-beacon User-Agent override; carried out of band rather than as
    /// a wire parameter.
    pub ua: Option<String>,
}

impl BeaconParams {
    /// Create an empty parameter map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter to a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), Some(value.into()));
    }

    /// Set a parameter whose value may be absent.
    ///
    /// An absent value still serializes the key, as an empty `key=` pair.
    pub fn set_opt(&mut self, key: impl Into<String>, value: Option<String>) {
        self.entries.insert(key.into(), value);
    }

    /// Remove a parameter entirely; the key will not be serialized.
    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        self.entries.remove(key)
    }

    /// The value of a parameter, when present and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.as_deref())
    }

    /// Whether a key exists at all, with or without a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over parameters in serialization order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Option<String>> {
        self.entries.iter()
    }

    /// Serialize as a percent-encoded query string, without a leading `?`.
    pub fn to_query(&self) -> String {
        let mut pairs = Vec::with_capacity(self.entries.len());
        for (key, value) in &self.entries {
            let value = value.as_deref().unwrap_or("");
            pairs.push(format!(
                "{}={}",
                percent_encode(key),
                percent_encode(value)
            ));
        }
        pairs.join("&")
    }
}

/// Percent-encode one query component.
///
/// RFC 3986 unreserved characters pass through; everything else is
/// emitted as `%XX` over its UTF-8 bytes.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Render a numeric parameter value the way the wire expects.
///
/// Whole numbers drop the fractional part (`1`, not `1.0`).
pub fn fmt_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 9e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Resolve a queued event into beacon parameters.
///
/// Returns `None` when the event names a metric or timer absent from the
/// definition tables; such events are dropped with a warning and never
/// produce a beacon. Dimensions absent from the dimension table are
/// likewise dropped rather than sent raw.
pub fn resolve_event(event: &QueuedEvent, defs: &DefinitionTables) -> Option<BeaconParams> {
    let mut params = BeaconParams::new();

    if let Some(group) = &event.page_group {
        params.set("h.pg", group.clone());
    }
    if let Some(bucket) = &event.ab_bucket {
        params.set("h.ab", bucket.clone());
    }

    // When this beacon's measurement was taken.
    params.set("rt.tstart", event.enqueued_at.to_string());
    params.set("rt.end", event.enqueued_at.to_string());

    for (name, value) in &event.dimensions {
        match defs.dimensions.get(name) {
            Some(label) => params.set(label.clone(), value.clone()),
            None => warn!(dimension = %name, "custom dimension is not defined"),
        }
    }

    match event.kind {
        EventKind::Metric => match defs.metrics.get(&event.name) {
            Some(label) => params.set(label.clone(), fmt_number(event.value)),
            None => {
                warn!(metric = %event.name, "custom metric is not defined");
                return None;
            }
        },
        EventKind::Timer => match defs.timers.get(&event.name) {
            Some(label) => params.set("t_other", format!("{label}|{}", fmt_number(event.value))),
            None => {
                warn!(timer = %event.name, "custom timer is not defined");
                return None;
            }
        },
    }

    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigDocument, DefinitionTables};
    use std::collections::BTreeMap;

    fn defs() -> DefinitionTables {
        let mut config = ConfigDocument::new();
        config
            .merge(
                r#"{"PageParams": {
                    "customMetrics": [{"name": "m", "label": "cmet_m"}],
                    "customTimers": [{"name": "timer", "label": "timer"}],
                    "customDimensions": [{"name": "d", "label": "cdim.d"}]
                }}"#,
            )
            .unwrap();
        DefinitionTables::rebuild(&config)
    }

    fn timer_event(name: &str, value: f64) -> QueuedEvent {
        QueuedEvent {
            kind: EventKind::Timer,
            name: name.to_owned(),
            value,
            page_group: None,
            ab_bucket: None,
            dimensions: BTreeMap::new(),
            enqueued_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn query_percent_encodes_keys_and_values() {
        let mut params = BeaconParams::new();
        params.set("h.pg", "a b&c");
        params.set_opt("d", None);

        // BTreeMap order: "d" before "h.pg".
        assert_eq!(params.to_query(), "d=&h.pg=a%20b%26c");
    }

    #[test]
    fn absent_value_serializes_as_empty() {
        let mut params = BeaconParams::new();
        params.set_opt("h.cr", None);
        assert!(params.contains_key("h.cr"));
        assert_eq!(params.get("h.cr"), None);
        assert_eq!(params.to_query(), "h.cr=");
    }

    #[test]
    fn numbers_render_without_trailing_fraction() {
        assert_eq!(fmt_number(1.0), "1");
        assert_eq!(fmt_number(100.0), "100");
        assert_eq!(fmt_number(2.5), "2.5");
    }

    #[test]
    fn timer_event_resolves_to_combined_t_other() {
        let params = resolve_event(&timer_event("timer", 100.0), &defs()).unwrap();
        assert_eq!(params.get("t_other"), Some("timer|100"));
        assert_eq!(params.get("rt.tstart"), Some("1700000000000"));
        assert_eq!(params.get("rt.end"), Some("1700000000000"));
        assert!(!params.contains_key("h.pg"));
    }

    #[test]
    fn metric_event_resolves_to_its_label() {
        let mut event = timer_event("m", 1.0);
        event.kind = EventKind::Metric;
        let params = resolve_event(&event, &defs()).unwrap();
        assert_eq!(params.get("cmet_m"), Some("1"));
    }

    #[test]
    fn unknown_name_drops_the_event() {
        assert!(resolve_event(&timer_event("nope", 5.0), &defs()).is_none());
    }

    #[test]
    fn group_bucket_and_known_dimensions_ride_along() {
        let mut event = timer_event("timer", 7.0);
        event.page_group = Some("checkout".to_owned());
        event.ab_bucket = Some("B".to_owned());
        event.dimensions.insert("d".to_owned(), "v".to_owned());
        event.dimensions.insert("ghost".to_owned(), "x".to_owned());

        let params = resolve_event(&event, &defs()).unwrap();
        assert_eq!(params.get("h.pg"), Some("checkout"));
        assert_eq!(params.get("h.ab"), Some("B"));
        assert_eq!(params.get("cdim.d"), Some("v"));
        assert!(!params.contains_key("ghost"));
    }
}
