//! Namespace-keyed prefix tree of mergeable nodes.
//!
//! Nodes added at `/intel` apply to everything below `/intel`; a lookup
//! for `/intel/mock/foo` merges the nodes at `/`, `/intel`, `/intel/mock`
//! and `/intel/mock/foo`, deeper nodes overriding shallower ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A value that can be layered along a namespace path.
pub trait TreeNode: Clone + Default {
    /// Overlay `other` on top of `self`.
    fn merge(&mut self, other: &Self);
}

#[derive(Debug, Clone, PartialEq)]
struct Branch<N> {
    node: Option<N>,
    children: BTreeMap<String, Branch<N>>,
}

impl<N> Default for Branch<N> {
    fn default() -> Self {
        Self {
            node: None,
            children: BTreeMap::new(),
        }
    }
}

/// Prefix tree keyed by namespace element values.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceTree<N> {
    root: Branch<N>,
}

impl<N> Default for NamespaceTree<N> {
    fn default() -> Self {
        Self {
            root: Branch::default(),
        }
    }
}

impl<N: TreeNode> NamespaceTree<N> {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `node` into the node stored at `path`.
    pub fn add<S: AsRef<str>>(&mut self, path: &[S], node: N) {
        let mut branch = &mut self.root;
        for segment in path {
            branch = branch
                .children
                .entry(segment.as_ref().to_string())
                .or_default();
        }
        match &mut branch.node {
            Some(existing) => existing.merge(&node),
            slot @ None => *slot = Some(node),
        }
    }

    /// Merged node for `path`, or `None` when nothing lies on the path.
    #[must_use]
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Option<N> {
        let mut merged: Option<N> = self.root.node.clone();
        let mut branch = &self.root;
        for segment in path {
            let Some(child) = branch.children.get(segment.as_ref()) else {
                break;
            };
            if let Some(node) = &child.node {
                match &mut merged {
                    Some(acc) => acc.merge(node),
                    None => merged = Some(node.clone()),
                }
            }
            branch = child;
        }
        merged
    }

    /// Whether the tree holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        fn empty<N>(b: &Branch<N>) -> bool {
            b.node.is_none() && b.children.values().all(empty)
        }
        empty(&self.root)
    }

    /// Every stored (path, node) pair in path order.
    #[must_use]
    pub fn entries(&self) -> Vec<(Vec<String>, N)> {
        fn walk<N: Clone>(b: &Branch<N>, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, N)>) {
            if let Some(node) = &b.node {
                out.push((path.clone(), node.clone()));
            }
            for (key, child) in &b.children {
                path.push(key.clone());
                walk(child, path, out);
                path.pop();
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut Vec::new(), &mut out);
        out
    }
}

#[derive(Serialize, Deserialize)]
struct Entry<N> {
    key: Vec<String>,
    node: N,
}

impl<N: TreeNode + Serialize> Serialize for NamespaceTree<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries: Vec<Entry<N>> = self
            .entries()
            .into_iter()
            .map(|(key, node)| Entry { key, node })
            .collect();
        entries.serialize(serializer)
    }
}

impl<'de, N: TreeNode + Deserialize<'de>> Deserialize<'de> for NamespaceTree<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<Entry<N>>::deserialize(deserializer)?;
        let mut tree = Self::new();
        for entry in entries {
            tree.add(&entry.key, entry.node);
        }
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdata::{ConfigDataNode, ConfigDataTree, ConfigValue};

    #[test]
    fn test_get_merges_along_path() {
        let mut tree = ConfigDataTree::new();
        tree.add(&["intel"], ConfigDataNode::new().with("a", 1_i64).with("b", 1_i64));
        tree.add(&["intel", "mock"], ConfigDataNode::new().with("b", 2_i64));
        tree.add(&["intel", "mock", "foo"], ConfigDataNode::new().with("c", 3_i64));

        let node = tree.get(&["intel", "mock", "foo"]).unwrap();
        assert_eq!(node.get("a"), Some(&ConfigValue::Int(1)));
        assert_eq!(node.get("b"), Some(&ConfigValue::Int(2)));
        assert_eq!(node.get("c"), Some(&ConfigValue::Int(3)));

        let shallow = tree.get(&["intel", "other"]).unwrap();
        assert_eq!(shallow.get("b"), Some(&ConfigValue::Int(1)));
        assert!(tree.get(&["nope"]).is_none());
    }

    #[test]
    fn test_add_merges_existing() {
        let mut tree = ConfigDataTree::new();
        tree.add(&["a"], ConfigDataNode::new().with("x", 1_i64));
        tree.add(&["a"], ConfigDataNode::new().with("y", 2_i64));
        assert_eq!(tree.get(&["a"]).unwrap().len(), 2);
    }

    #[test]
    fn test_root_node_applies_everywhere() {
        let mut tree = ConfigDataTree::new();
        let empty: [&str; 0] = [];
        tree.add(&empty, ConfigDataNode::new().with("g", true));
        assert_eq!(
            tree.get(&["any", "thing"]).unwrap().get("g"),
            Some(&ConfigValue::Bool(true))
        );
    }

    #[test]
    fn test_serde_entries() {
        let mut tree = ConfigDataTree::new();
        tree.add(&["intel", "mock"], ConfigDataNode::new().with("user", "root"));
        let json = serde_json::to_string(&tree).unwrap();
        let back: ConfigDataTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert!(!back.is_empty());
        assert!(ConfigDataTree::new().is_empty());
    }
}
