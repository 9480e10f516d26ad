//! Configuration document and definition tables
//!
//! The collection service delivers a JSON configuration document that names
//! the beacon endpoint, seeds the session, carries opaque header fields
//! that must ride along on every beacon, and defines the custom metric,
//! timer and dimension vocabulary under `PageParams`.
//!
//! Refreshes merge into the existing document rather than replacing it, so
//! a partial refresh response never erases previously known keys. The one
//! exception is `rate_limited`, which is cleared at the start of each merge
//! so a past rate limit cannot outlive the response that imposed it. The
//! definition tables on the other hand are rebuilt wholesale on every
//! successful parse: a stale definition must not survive a server-side
//! rename.

use crate::error::{PulseError, PulseResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// The merged server configuration for one app.
///
/// Top-level keys are kept as raw JSON so unknown server keys survive
/// merges and can be passed through to beacons untouched.
#[derive(Debug, Clone, Default)]
pub struct ConfigDocument {
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Create an empty document. Nothing can be sent until a merge
    /// succeeds and provides a beacon URL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a raw configuration response into this document.
    ///
    /// Shallow merge over top-level keys; `rate_limited` is cleared first
    /// so only the incoming response can re-assert it. On a parse error
    /// the document is left untouched.
    pub fn merge(&mut self, body: &str) -> PulseResult<()> {
        let incoming: Value = serde_json::from_str(body)?;
        let incoming = match incoming {
            Value::Object(map) => map,
            _ => return Err(PulseError::ConfigShape),
        };

        self.root.remove("rate_limited");
        for (key, value) in incoming {
            self.root.insert(key, value);
        }

        Ok(())
    }

    /// The beacon endpoint, absolute or protocol-relative.
    pub fn beacon_url(&self) -> Option<&str> {
        self.str_value("beacon_url")
    }

    /// Whether the service asked us to stop sending beacons.
    pub fn rate_limited(&self) -> bool {
        matches!(self.root.get("rate_limited"), Some(Value::Bool(true)))
    }

    /// The server-seeded session id, if the response carried one.
    pub fn session_id(&self) -> Option<&str> {
        self.str_value("session_id")
    }

    /// A top-level string key, when present and a string.
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.root.get(key).and_then(Value::as_str)
    }

    /// A top-level key rendered as a beacon parameter value.
    ///
    /// Strings are taken verbatim; other scalars are rendered through
    /// their JSON form. Absent keys return `None`, which still serializes
    /// as an empty `key=` pair on the wire.
    pub fn param_value(&self, key: &str) -> Option<String> {
        match self.root.get(key) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    /// The raw `PageParams` subtree, if any.
    pub fn page_params(&self) -> Option<&Value> {
        self.root.get("PageParams")
    }
}

/// One `{name, label}` definition from `PageParams`.
///
/// Dimensions additionally carry type/index metadata; those keys are
/// opaque to the SDK and ignored here.
#[derive(Debug, Deserialize)]
struct ParamDef {
    name: String,
    label: String,
}

#[derive(Debug, Default, Deserialize)]
struct PageParams {
    #[serde(default, rename = "customMetrics")]
    custom_metrics: Vec<ParamDef>,
    #[serde(default, rename = "customTimers")]
    custom_timers: Vec<ParamDef>,
    #[serde(default, rename = "customDimensions")]
    custom_dimensions: Vec<ParamDef>,
}

/// Name-to-wire-label mappings for custom metrics, timers and dimensions.
///
/// Empty at app creation, replaced synchronously inside every successful
/// configuration parse, and read-only to the queue drainer.
#[derive(Debug, Clone, Default)]
pub struct DefinitionTables {
    /// Custom metric name to wire label.
    pub metrics: HashMap<String, String>,
    /// Custom timer name to wire label.
    pub timers: HashMap<String, String>,
    /// Custom dimension name to wire label.
    pub dimensions: HashMap<String, String>,
}

impl DefinitionTables {
    /// Rebuild the tables from the current configuration document.
    ///
    /// A document without `PageParams`, or with a malformed subtree,
    /// yields empty tables rather than keeping stale ones.
    pub fn rebuild(config: &ConfigDocument) -> Self {
        let params: PageParams = config
            .page_params()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();

        let collect = |defs: Vec<ParamDef>| {
            defs.into_iter()
                .map(|def| (def.name, def.label))
                .collect::<HashMap<_, _>>()
        };

        Self {
            metrics: collect(params.custom_metrics),
            timers: collect(params.custom_timers),
            dimensions: collect(params.custom_dimensions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "beacon_url": "//collector.example.com/beacon",
        "session_id": "server-session",
        "site_domain": "example.com",
        "h.key": "API-KEY",
        "h.t": 1700000000000,
        "PageParams": {
            "customMetrics": [{"name": "m", "label": "cmet_m"}],
            "customTimers": [{"name": "timer", "label": "timer"}],
            "customDimensions": [
                {"name": "d", "label": "cdim.d", "type": "text", "index": 0}
            ]
        }
    }"#;

    #[test]
    fn merge_keeps_existing_keys() {
        let mut config = ConfigDocument::new();
        config.merge(CONFIG).unwrap();
        config.merge(r#"{"session_id": "next-session"}"#).unwrap();

        assert_eq!(config.session_id(), Some("next-session"));
        assert_eq!(config.beacon_url(), Some("//collector.example.com/beacon"));
        assert_eq!(config.str_value("site_domain"), Some("example.com"));
    }

    #[test]
    fn merge_clears_rate_limit_unless_reasserted() {
        let mut config = ConfigDocument::new();
        config.merge(r#"{"rate_limited": true}"#).unwrap();
        assert!(config.rate_limited());

        config.merge(r#"{"beacon_url": "//b"}"#).unwrap();
        assert!(!config.rate_limited());
    }

    #[test]
    fn merge_rejects_bad_json_without_touching_document() {
        let mut config = ConfigDocument::new();
        config.merge(CONFIG).unwrap();

        assert!(config.merge("{not json").is_err());
        assert_eq!(config.beacon_url(), Some("//collector.example.com/beacon"));

        assert!(matches!(
            config.merge("[1, 2]"),
            Err(PulseError::ConfigShape)
        ));
    }

    #[test]
    fn param_value_renders_non_strings() {
        let mut config = ConfigDocument::new();
        config.merge(CONFIG).unwrap();

        assert_eq!(config.param_value("h.key").as_deref(), Some("API-KEY"));
        assert_eq!(config.param_value("h.t").as_deref(), Some("1700000000000"));
        assert_eq!(config.param_value("h.cr"), None);
    }

    #[test]
    fn definition_tables_rebuild_from_page_params() {
        let mut config = ConfigDocument::new();
        config.merge(CONFIG).unwrap();

        let defs = DefinitionTables::rebuild(&config);
        assert_eq!(defs.metrics.get("m").map(String::as_str), Some("cmet_m"));
        assert_eq!(defs.timers.get("timer").map(String::as_str), Some("timer"));
        assert_eq!(defs.dimensions.get("d").map(String::as_str), Some("cdim.d"));
    }

    #[test]
    fn definition_tables_replace_rather_than_merge() {
        let mut config = ConfigDocument::new();
        config.merge(CONFIG).unwrap();
        let defs = DefinitionTables::rebuild(&config);
        assert!(defs.metrics.contains_key("m"));

        // A rename on the server side drops the old entry entirely.
        config
            .merge(r#"{"PageParams": {"customMetrics": [{"name": "m2", "label": "cmet_m2"}]}}"#)
            .unwrap();
        let defs = DefinitionTables::rebuild(&config);
        assert!(!defs.metrics.contains_key("m"));
        assert_eq!(defs.metrics.get("m2").map(String::as_str), Some("cmet_m2"));
        assert!(defs.timers.is_empty());
    }

    #[test]
    fn missing_page_params_yields_empty_tables() {
        let mut config = ConfigDocument::new();
        config.merge(r#"{"beacon_url": "//b"}"#).unwrap();

        let defs = DefinitionTables::rebuild(&config);
        assert!(defs.metrics.is_empty() && defs.timers.is_empty() && defs.dimensions.is_empty());
    }
}
