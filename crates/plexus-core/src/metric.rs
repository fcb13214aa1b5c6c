//! Metric data points exchanged with plugins.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cdata::ConfigDataNode;
use crate::namespace::{Namespace, split_prefix};

/// Standard tag naming the host a plugin instance runs on.
pub const STD_TAG_PLUGIN_RUNNING_ON: &str = "plugin_running_on";

/// Tags keyed by namespace prefix (`/intel/mock` -> {k: v}).
pub type NamespaceTags = BTreeMap<String, BTreeMap<String, String>>;

/// A metric as advertised by a collector or returned from a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Metric namespace.
    pub namespace: Namespace,
    /// Metric version; values below 1 mean "latest".
    #[serde(default)]
    pub version: i32,
    /// Config passed to the plugin for this metric.
    #[serde(default)]
    pub config: ConfigDataNode,
    /// Collected value.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Metric tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Unit of the value.
    #[serde(default)]
    pub unit: String,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Collection time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Metric {
    /// Create a metric with no data.
    #[must_use]
    pub fn new(namespace: Namespace, version: i32) -> Self {
        Self {
            namespace,
            version,
            config: ConfigDataNode::default(),
            data: serde_json::Value::Null,
            tags: BTreeMap::new(),
            unit: String::new(),
            description: String::new(),
            timestamp: None,
        }
    }

    /// Set the data value.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<serde_json::Value>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the config.
    #[must_use]
    pub fn with_config(mut self, config: ConfigDataNode) -> Self {
        self.config = config;
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Merge tags whose namespace prefix matches this metric.
    ///
    /// Existing tags are overwritten.
    pub fn apply_namespace_tags(&mut self, tags: &NamespaceTags) {
        for (prefix, values) in tags {
            if self.namespace.starts_with(&split_prefix(prefix)) {
                self.tags
                    .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
    }
}

/// A metric requested by a task: namespace plus version (< 1 = latest).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestedMetric {
    /// Requested namespace, possibly with wildcards.
    pub namespace: Namespace,
    /// Requested version; values below 1 mean "latest".
    #[serde(default)]
    pub version: i32,
}

impl RequestedMetric {
    /// Create a requested metric.
    #[must_use]
    pub fn new(namespace: Namespace, version: i32) -> Self {
        Self { namespace, version }
    }

    /// Request the latest version of a namespace.
    #[must_use]
    pub fn latest(namespace: Namespace) -> Self {
        Self::new(namespace, -1)
    }
}
