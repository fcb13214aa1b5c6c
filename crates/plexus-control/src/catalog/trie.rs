//! Versioned namespace trie.
//!
//! Every node is keyed by a literal namespace element. Dynamic elements of
//! advertised metrics live under the reserved `*` child, so a literal lookup
//! such as `/intel/mock/host0/baz` falls back to `/intel/mock/*/baz` when
//! `host0` was never added explicitly.

use std::collections::{BTreeMap, BTreeSet};

use plexus_core::namespace::WILDCARD;
use plexus_core::{Namespace, PluginKey};

use super::CatalogedMetric;
use crate::error::CatalogError;

#[derive(Debug, Default)]
struct Node {
    children: BTreeMap<String, Node>,
    versions: BTreeMap<i32, CatalogedMetric>,
}

impl Node {
    fn is_leaf(&self) -> bool {
        !self.versions.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.versions.is_empty()
    }

    /// This node (if a leaf) and every leaf below it.
    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Node>) {
        if self.is_leaf() {
            out.push(self);
        }
        for child in self.children.values() {
            child.collect_leaves(out);
        }
    }

    /// Leaves matching a query.
    ///
    /// A literal segment takes the matching child, falling back to the `*`
    /// child. A `*` in the middle matches every child; a trailing `*`
    /// matches every leaf at any depth below.
    fn expand<'a>(&'a self, query: &[String], out: &mut Vec<&'a Node>) {
        let Some((segment, rest)) = query.split_first() else {
            if self.is_leaf() {
                out.push(self);
            }
            return;
        };
        if segment == WILDCARD {
            for child in self.children.values() {
                if rest.is_empty() {
                    child.collect_leaves(out);
                } else {
                    child.expand(rest, out);
                }
            }
        } else if let Some(child) = self.children.get(segment) {
            child.expand(rest, out);
        } else if let Some(child) = self.children.get(WILDCARD) {
            child.expand(rest, out);
        }
    }

    fn latest(&self) -> Option<&CatalogedMetric> {
        self.versions.values().next_back()
    }

    fn pick(&self, version: i32) -> Option<&CatalogedMetric> {
        if version < 1 {
            self.latest()
        } else {
            self.versions.get(&version)
        }
    }

    /// Drop entries owned by `plugin`; returns how many went.
    fn delete_by_plugin(&mut self, plugin: &PluginKey) -> usize {
        let before = self.versions.len();
        self.versions.retain(|_, m| &m.plugin != plugin);
        let mut removed = before.saturating_sub(self.versions.len());
        for child in self.children.values_mut() {
            removed = removed.saturating_add(child.delete_by_plugin(plugin));
        }
        self.children.retain(|_, child| !child.is_empty());
        removed
    }

    fn remove_path(&mut self, path: &[&str]) -> bool {
        let Some((segment, rest)) = path.split_first() else {
            return false;
        };
        if rest.is_empty() {
            return self.children.remove(*segment).is_some();
        }
        let Some(child) = self.children.get_mut(*segment) else {
            return false;
        };
        let removed = child.remove_path(rest);
        if child.is_empty() {
            self.children.remove(*segment);
        }
        removed
    }
}

/// Versioned registry of advertised metrics.
#[derive(Debug, Default)]
pub struct MetricTrie {
    root: Node,
}

impl MetricTrie {
    /// Create an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a metric, replacing any entry at the same namespace and version.
    pub fn add(&mut self, metric: CatalogedMetric) {
        let mut node = &mut self.root;
        for element in metric.namespace.elements() {
            node = node
                .children
                .entry(element.catalog_key().to_string())
                .or_default();
        }
        node.versions.insert(metric.version, metric);
    }

    /// Look up exactly one metric.
    ///
    /// # Errors
    ///
    /// [`CatalogError::EmptyNamespace`] for an empty query,
    /// [`CatalogError::Ambiguous`] when a wildcard query matches several
    /// leaves and [`CatalogError::MetricNotFound`] when nothing matches.
    pub fn get(&self, namespace: &Namespace, version: i32) -> Result<CatalogedMetric, CatalogError> {
        let leaves = self.matching_leaves(namespace)?;
        if leaves.len() > 1 {
            return Err(CatalogError::Ambiguous {
                namespace: namespace.to_string(),
                version,
            });
        }
        leaves
            .first()
            .and_then(|leaf| leaf.pick(version))
            .map(|m| m.bound_to(namespace))
            .ok_or_else(|| not_found(namespace, version))
    }

    /// Every leaf matching the query, each at the requested version (or its
    /// latest). Leaves without that version are skipped.
    ///
    /// # Errors
    ///
    /// [`CatalogError::EmptyNamespace`] for an empty query and
    /// [`CatalogError::MetricNotFound`] when no leaf survives.
    pub fn get_metrics(
        &self,
        namespace: &Namespace,
        version: i32,
    ) -> Result<Vec<CatalogedMetric>, CatalogError> {
        let metrics: Vec<_> = self
            .matching_leaves(namespace)?
            .into_iter()
            .filter_map(|leaf| leaf.pick(version))
            .map(|m| m.bound_to(namespace))
            .collect();
        if metrics.is_empty() {
            return Err(not_found(namespace, version));
        }
        Ok(metrics)
    }

    /// Every version of every leaf the query resolves to.
    ///
    /// # Errors
    ///
    /// As [`get_metrics`](Self::get_metrics).
    pub fn get_versions(&self, namespace: &Namespace) -> Result<Vec<CatalogedMetric>, CatalogError> {
        let metrics: Vec<_> = self
            .matching_leaves(namespace)?
            .into_iter()
            .flat_map(|leaf| leaf.versions.values())
            .map(|m| m.bound_to(namespace))
            .collect();
        if metrics.is_empty() {
            return Err(not_found(namespace, -1));
        }
        Ok(metrics)
    }

    /// Every metric at or below `namespace`, all versions. An empty
    /// namespace browses the whole catalog.
    ///
    /// # Errors
    ///
    /// [`CatalogError::NothingBelow`] when a non-empty namespace has nothing
    /// at or below it.
    pub fn fetch(&self, namespace: &Namespace) -> Result<Vec<CatalogedMetric>, CatalogError> {
        let mut leaves = Vec::new();
        if let Some(node) = self.walk(namespace) {
            node.collect_leaves(&mut leaves);
        }
        let metrics: Vec<_> = leaves
            .into_iter()
            .flat_map(|leaf| leaf.versions.values().cloned())
            .collect();
        if metrics.is_empty() && !namespace.is_empty() {
            return Err(CatalogError::NothingBelow {
                namespace: namespace.to_string(),
            });
        }
        Ok(metrics)
    }

    /// Distinct plugins owning a metric at or below `namespace`.
    ///
    /// # Errors
    ///
    /// As [`fetch`](Self::fetch).
    pub fn plugins(&self, namespace: &Namespace) -> Result<Vec<PluginKey>, CatalogError> {
        let keys: BTreeSet<PluginKey> = self
            .fetch(namespace)?
            .into_iter()
            .map(|m| m.plugin)
            .collect();
        Ok(keys.into_iter().collect())
    }

    /// Whether `get` would succeed.
    #[must_use]
    pub fn exists(&self, namespace: &Namespace, version: i32) -> bool {
        self.get(namespace, version).is_ok()
    }

    /// Excise the subtree at `namespace`. Returns whether anything went.
    pub fn remove(&mut self, namespace: &Namespace) -> bool {
        let path: Vec<&str> = namespace
            .elements()
            .iter()
            .map(plexus_core::NamespaceElement::catalog_key)
            .collect();
        self.root.remove_path(&path)
    }

    /// Remove every entry owned by `plugin`, pruning emptied branches.
    /// Returns how many entries went.
    pub fn delete_by_plugin(&mut self, plugin: &PluginKey) -> usize {
        self.root.delete_by_plugin(plugin)
    }

    /// Number of (namespace, version) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let mut leaves = Vec::new();
        self.root.collect_leaves(&mut leaves);
        leaves.iter().map(|leaf| leaf.versions.len()).sum()
    }

    /// Whether the trie holds no metric.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn matching_leaves(&self, namespace: &Namespace) -> Result<Vec<&Node>, CatalogError> {
        if namespace.is_empty() {
            return Err(CatalogError::EmptyNamespace);
        }
        let mut leaves = Vec::new();
        self.root.expand(&namespace.strings(), &mut leaves);
        Ok(leaves)
    }

    /// Exact walk by catalog key, used for browsing.
    fn walk(&self, namespace: &Namespace) -> Option<&Node> {
        namespace
            .elements()
            .iter()
            .try_fold(&self.root, |node, element| {
                node.children.get(element.catalog_key())
            })
    }
}

fn not_found(namespace: &Namespace, version: i32) -> CatalogError {
    CatalogError::MetricNotFound {
        namespace: namespace.to_string(),
        version,
    }
}

#[cfg(test)]
mod tests {
    use plexus_core::{NamespaceElement, PluginType};

    use super::*;

    fn key(version: i32) -> PluginKey {
        PluginKey::new(PluginType::Collector, "mock", version)
    }

    fn metric(ns: &Namespace, version: i32, plugin_version: i32) -> CatalogedMetric {
        CatalogedMetric::new(ns.clone(), version, key(plugin_version))
    }

    fn ns(s: &str) -> Namespace {
        Namespace::parse(s).unwrap()
    }

    fn dynamic_baz() -> Namespace {
        Namespace::from_strs(["intel", "mock"])
            .add_dynamic("host", "host id")
            .add_static("baz")
    }

    #[test]
    fn test_get_latest_and_exact_versions() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&ns("/intel/mock/foo"), 2, 2));

        let latest = trie.get(&ns("/intel/mock/foo"), -1).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.plugin, key(2));

        let v1 = trie.get(&ns("/intel/mock/foo"), 1).unwrap();
        assert_eq!(v1.plugin, key(1));

        let err = trie.get(&ns("/intel/mock/foo"), 6).unwrap_err();
        assert_eq!(err.to_string(), "Metric not found: /intel/mock/foo (version: 6)");
    }

    #[test]
    fn test_readd_overwrites() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&ns("/intel/mock/foo"), 1, 3));
        assert_eq!(trie.len(), 1);
        assert_eq!(trie.get(&ns("/intel/mock/foo"), 1).unwrap().plugin, key(3));
    }

    #[test]
    fn test_dynamic_leaf_matches_literal_query() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&dynamic_baz(), 1, 1));

        let found = trie.get(&ns("/intel/mock/host0/baz"), -1).unwrap();
        assert_eq!(
            found.namespace.elements()[2],
            NamespaceElement::Dynamic {
                name: "host".into(),
                description: "host id".into(),
                value: Some("host0".into()),
            }
        );

        let err = trie.get(&ns("/intel/mock/*"), -1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Incoming namespace `/intel/mock/*` is too ambiguous (version: -1)"
        );
    }

    #[test]
    fn test_explicit_literal_beats_dynamic() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&dynamic_baz(), 1, 1));
        trie.add(metric(&ns("/intel/mock/host0/baz"), 1, 2));

        assert_eq!(trie.get(&ns("/intel/mock/host0/baz"), -1).unwrap().plugin, key(2));
        assert_eq!(trie.get(&ns("/intel/mock/host1/baz"), -1).unwrap().plugin, key(1));
    }

    #[test]
    fn test_get_metrics_expands_wildcards() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&ns("/intel/mock/foo"), 2, 2));
        trie.add(metric(&ns("/intel/mock/bar"), 1, 1));
        trie.add(metric(&dynamic_baz(), 1, 1));

        let latest = trie.get_metrics(&ns("/intel/mock/*"), -1).unwrap();
        assert_eq!(latest.len(), 3);
        let foo = latest
            .iter()
            .find(|m| m.namespace == ns("/intel/mock/foo"))
            .unwrap();
        assert_eq!(foo.version, 2);

        let v2 = trie.get_metrics(&ns("/intel/mock/*"), 2).unwrap();
        assert_eq!(v2.len(), 1);
        assert_eq!(v2[0].namespace, ns("/intel/mock/foo"));

        let middle = trie.get_metrics(&ns("/intel/*/foo"), -1).unwrap();
        assert_eq!(middle.len(), 1);

        let err = trie.get_metrics(&ns("/intel/mock/*"), 9).unwrap_err();
        assert!(matches!(err, CatalogError::MetricNotFound { version: 9, .. }));
    }

    #[test]
    fn test_middle_wildcard_matches_dynamic_child() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&dynamic_baz(), 1, 1));
        let found = trie.get(&ns("/intel/mock/*/baz"), -1).unwrap();
        assert!(found.namespace.is_dynamic());
    }

    #[test]
    fn test_empty_query() {
        let trie = MetricTrie::new();
        let err = trie.get(&Namespace::default(), -1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Incorrect format of requested metric, empty list of namespace elements"
        );
    }

    #[test]
    fn test_fetch_and_versions() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&ns("/intel/mock/foo"), 2, 2));
        trie.add(metric(&ns("/intel/other/bar"), 1, 1));

        assert_eq!(trie.fetch(&ns("/intel/mock")).unwrap().len(), 2);
        assert_eq!(trie.fetch(&Namespace::default()).unwrap().len(), 3);
        let err = trie.fetch(&ns("/not/present")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No metric found below the given namespace: /not/present"
        );

        assert_eq!(trie.get_versions(&ns("/intel/mock/foo")).unwrap().len(), 2);
        assert_eq!(trie.plugins(&ns("/intel")).unwrap(), vec![key(1), key(2)]);
    }

    #[test]
    fn test_delete_by_plugin_prunes() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&ns("/intel/mock/foo"), 2, 2));
        trie.add(metric(&ns("/intel/mock/bar"), 2, 2));

        assert_eq!(trie.delete_by_plugin(&key(2)), 2);
        assert!(trie.get(&ns("/intel/mock/bar"), -1).is_err());
        assert_eq!(trie.get(&ns("/intel/mock/foo"), -1).unwrap().version, 1);

        assert_eq!(trie.delete_by_plugin(&key(1)), 1);
        assert!(trie.is_empty());
    }

    #[test]
    fn test_remove_subtree() {
        let mut trie = MetricTrie::new();
        trie.add(metric(&ns("/intel/mock/foo"), 1, 1));
        trie.add(metric(&ns("/intel/other/bar"), 1, 1));
        assert!(trie.remove(&ns("/intel/mock")));
        assert!(!trie.exists(&ns("/intel/mock/foo"), -1));
        assert!(trie.exists(&ns("/intel/other/bar"), 1));
        assert!(!trie.remove(&ns("/intel/mock")));
    }
}
