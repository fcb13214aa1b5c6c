//! Metric catalog: every metric advertised by a loaded collector.

mod trie;

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use plexus_core::{ConfigDataNode, Metric, Namespace, PluginKey, PolicyNode};
use serde::{Deserialize, Serialize};

pub use trie::MetricTrie;

use crate::error::CatalogError;

/// A metric type as registered in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogedMetric {
    /// Advertised namespace; dynamic elements are bound when a lookup
    /// supplied concrete values.
    pub namespace: Namespace,
    /// Metric version.
    pub version: i32,
    /// Owning plugin.
    pub plugin: PluginKey,
    /// Policy for config values under this namespace.
    pub policy: PolicyNode,
    /// Config resolved for a subscription; empty in the catalog itself.
    pub config: ConfigDataNode,
    /// Advertised tags.
    pub tags: BTreeMap<String, String>,
    /// Unit of the value.
    pub unit: String,
    /// Human readable description.
    pub description: String,
    /// When the metric was advertised.
    pub advertised_at: DateTime<Utc>,
}

impl CatalogedMetric {
    /// Create an entry with an empty policy.
    #[must_use]
    pub fn new(namespace: Namespace, version: i32, plugin: PluginKey) -> Self {
        Self {
            namespace,
            version,
            plugin,
            policy: PolicyNode::default(),
            config: ConfigDataNode::default(),
            tags: BTreeMap::new(),
            unit: String::new(),
            description: String::new(),
            advertised_at: Utc::now(),
        }
    }

    /// Build an entry from a metric a collector advertised.
    #[must_use]
    pub fn from_advertised(metric: Metric, plugin: PluginKey, policy: PolicyNode) -> Self {
        Self {
            namespace: metric.namespace,
            version: metric.version,
            plugin,
            policy,
            config: ConfigDataNode::default(),
            tags: metric.tags,
            unit: metric.unit,
            description: metric.description,
            advertised_at: Utc::now(),
        }
    }

    /// The metric to send to the owning plugin.
    #[must_use]
    pub fn to_metric(&self) -> Metric {
        let mut metric = Metric::new(self.namespace.clone(), self.version)
            .with_config(self.config.clone())
            .with_unit(self.unit.clone())
            .with_description(self.description.clone());
        metric.tags.clone_from(&self.tags);
        metric
    }

    /// Copy bound to the concrete values of a query.
    ///
    /// Dynamic elements take the query's value at the same position unless
    /// that value is `*`.
    #[must_use]
    pub fn bound_to(&self, query: &Namespace) -> Self {
        let mut bound = self.clone();
        for index in self.namespace.dynamic_indices() {
            if let Some(element) = query.elements().get(index)
                && !element.is_wildcard()
            {
                bound.namespace.bind(index, element.value());
            }
        }
        bound
    }
}

/// Thread-safe catalog around a [`MetricTrie`].
///
/// One lock guards every mutation and every multi-step read.
#[derive(Debug, Default)]
pub struct MetricCatalog {
    trie: RwLock<MetricTrie>,
}

impl MetricCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MetricTrie> {
        self.trie.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MetricTrie> {
        self.trie.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add one metric.
    pub fn add(&self, metric: CatalogedMetric) {
        self.write().add(metric);
    }

    /// Add a batch of metrics under a single lock.
    pub fn add_all(&self, metrics: impl IntoIterator<Item = CatalogedMetric>) {
        let mut trie = self.write();
        for metric in metrics {
            trie.add(metric);
        }
    }

    /// See [`MetricTrie::get`].
    ///
    /// # Errors
    ///
    /// See [`MetricTrie::get`].
    pub fn get(&self, namespace: &Namespace, version: i32) -> Result<CatalogedMetric, CatalogError> {
        self.read().get(namespace, version)
    }

    /// See [`MetricTrie::get_metrics`].
    ///
    /// # Errors
    ///
    /// See [`MetricTrie::get_metrics`].
    pub fn get_metrics(
        &self,
        namespace: &Namespace,
        version: i32,
    ) -> Result<Vec<CatalogedMetric>, CatalogError> {
        self.read().get_metrics(namespace, version)
    }

    /// See [`MetricTrie::get_versions`].
    ///
    /// # Errors
    ///
    /// See [`MetricTrie::get_versions`].
    pub fn get_versions(&self, namespace: &Namespace) -> Result<Vec<CatalogedMetric>, CatalogError> {
        self.read().get_versions(namespace)
    }

    /// See [`MetricTrie::fetch`].
    ///
    /// # Errors
    ///
    /// See [`MetricTrie::fetch`].
    pub fn fetch(&self, namespace: &Namespace) -> Result<Vec<CatalogedMetric>, CatalogError> {
        self.read().fetch(namespace)
    }

    /// Every cataloged metric.
    #[must_use]
    pub fn table(&self) -> Vec<CatalogedMetric> {
        self.read().fetch(&Namespace::default()).unwrap_or_default()
    }

    /// See [`MetricTrie::plugins`].
    ///
    /// # Errors
    ///
    /// See [`MetricTrie::plugins`].
    pub fn plugins(&self, namespace: &Namespace) -> Result<Vec<PluginKey>, CatalogError> {
        self.read().plugins(namespace)
    }

    /// See [`MetricTrie::exists`].
    #[must_use]
    pub fn exists(&self, namespace: &Namespace, version: i32) -> bool {
        self.read().exists(namespace, version)
    }

    /// See [`MetricTrie::remove`].
    pub fn remove(&self, namespace: &Namespace) -> bool {
        self.write().remove(namespace)
    }

    /// See [`MetricTrie::delete_by_plugin`].
    pub fn delete_by_plugin(&self, plugin: &PluginKey) -> usize {
        self.write().delete_by_plugin(plugin)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use plexus_core::PluginType;

    use super::*;

    #[test]
    fn test_to_metric_carries_config() {
        let ns = Namespace::parse("/intel/mock/foo").unwrap();
        let mut cataloged =
            CatalogedMetric::new(ns.clone(), 1, PluginKey::new(PluginType::Collector, "mock", 1));
        cataloged.config.insert("user", "root");
        cataloged.unit = "B".into();
        let metric = cataloged.to_metric();
        assert_eq!(metric.namespace, ns);
        assert_eq!(metric.unit, "B");
        assert!(metric.config.contains_key("user"));
    }

    #[test]
    fn test_catalog_add_all_and_delete() {
        let catalog = MetricCatalog::new();
        let key = PluginKey::new(PluginType::Collector, "mock", 1);
        catalog.add_all(["/a/b", "/a/c"].iter().map(|s| {
            CatalogedMetric::new(Namespace::parse(s).unwrap(), 1, key.clone())
        }));
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.table().len(), 2);
        assert_eq!(catalog.delete_by_plugin(&key), 2);
        assert!(catalog.is_empty());
        assert!(catalog.table().is_empty());
    }
}
