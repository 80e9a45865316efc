//! Metric types accepted by outputs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A trait for anything an output can serialize and write
pub trait MetricPoint: Clone + Send + Sync + Debug + 'static {
    /// Measurement name
    fn name(&self) -> &str;

    /// Tags identifying the series, sorted by key
    fn tags(&self) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Get the metric values as key-value pairs
    fn values(&self) -> BTreeMap<String, i64>;

    /// Get the timestamp when this metric was collected
    fn timestamp(&self) -> DateTime<Utc>;

    /// Convert the metric to a JSON-compatible format
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name(),
            "tags": self.tags(),
            "fields": self.values(),
            "timestamp": self.timestamp().timestamp(),
        })
    }
}

/// A plain metric record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, i64>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Metric {
    /// Create a metric with no tags or fields, stamped now
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add an integer field
    pub fn field(mut self, key: impl Into<String>, value: i64) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Set the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl MetricPoint for Metric {
    fn name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> BTreeMap<String, String> {
        self.tags.clone()
    }

    fn values(&self) -> BTreeMap<String, i64> {
        self.fields.clone()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_json_shape() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let metric = Metric::new("cpu").tag("host", "a").field("value", 1).at(ts);

        assert_eq!(
            metric.to_json(),
            serde_json::json!({
                "name": "cpu",
                "tags": {"host": "a"},
                "fields": {"value": 1},
                "timestamp": 1_700_000_000,
            })
        );
    }

    #[test]
    fn test_deserialize_without_tags() {
        let raw = r#"{"name":"mem","fields":{"used":42},"timestamp":"2024-01-01T00:00:00Z"}"#;
        let metric: Metric = serde_json::from_str(raw).unwrap();
        assert_eq!(metric.name, "mem");
        assert!(metric.tags.is_empty());
        assert_eq!(metric.fields.get("used"), Some(&42));
    }
}
