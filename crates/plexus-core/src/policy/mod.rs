//! Config policies advertised by plugins.
//!
//! A plugin returns a [`ConfigPolicy`] describing, per namespace prefix, the
//! config keys it understands. When a task subscribes to a metric the merged
//! task config is processed against the [`PolicyNode`] for that namespace:
//! defaults are filled in and every rule is checked.

mod rule;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use rule::Rule;

use crate::cdata::ConfigDataNode;
use crate::ctree::{NamespaceTree, TreeNode};
use crate::error::PolicyError;

/// Rules that apply to a single namespace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyNode {
    #[serde(default)]
    rules: BTreeMap<String, Rule>,
}

impl PolicyNode {
    /// Create an empty node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.add(rule);
        self
    }

    /// Add or replace the rule for its key.
    pub fn add(&mut self, rule: Rule) {
        self.rules.insert(rule.key().to_string(), rule);
    }

    /// Whether the node carries any rules.
    #[must_use]
    pub fn has_rules(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Rules keyed by config key.
    #[must_use]
    pub fn rules(&self) -> &BTreeMap<String, Rule> {
        &self.rules
    }

    /// Default values of every rule that has one.
    #[must_use]
    pub fn defaults(&self) -> ConfigDataNode {
        self.rules
            .iter()
            .filter_map(|(k, r)| r.default_value().map(|v| (k.clone(), v)))
            .collect()
    }

    /// Validate `config` and fill in defaults.
    ///
    /// Keys without a rule pass through untouched.
    ///
    /// # Errors
    ///
    /// Returns every rule violation found.
    pub fn process(&self, config: &ConfigDataNode) -> Result<ConfigDataNode, Vec<PolicyError>> {
        let mut out = config.clone();
        let mut errors = Vec::new();
        for (key, rule) in &self.rules {
            match config.get(key).cloned().or_else(|| rule.default_value()) {
                Some(value) => match rule.validate(value) {
                    Ok(value) => {
                        out.insert(key.clone(), value);
                    },
                    Err(e) => errors.push(e),
                },
                None if rule.required() => {
                    errors.push(PolicyError::RequiredKeyMissing { key: key.clone() });
                },
                None => {},
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(errors)
        }
    }
}

impl TreeNode for PolicyNode {
    fn merge(&mut self, other: &Self) {
        self.rules
            .extend(other.rules.iter().map(|(k, r)| (k.clone(), r.clone())));
    }
}

/// Per-namespace policy tree advertised by a plugin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigPolicy(NamespaceTree<PolicyNode>);

impl ConfigPolicy {
    /// Create an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`add`](Self::add).
    #[must_use]
    pub fn with_node<S: AsRef<str>>(mut self, path: &[S], node: PolicyNode) -> Self {
        self.add(path, node);
        self
    }

    /// Merge `node` into the policy at `path`.
    pub fn add<S: AsRef<str>>(&mut self, path: &[S], node: PolicyNode) {
        self.0.add(path, node);
    }

    /// Effective policy for `path`; empty when no rules apply.
    #[must_use]
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> PolicyNode {
        self.0.get(path).unwrap_or_default()
    }

    /// Policy at the root, which applies to the plugin as a whole.
    #[must_use]
    pub fn root(&self) -> PolicyNode {
        let empty: [&str; 0] = [];
        self.get(&empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdata::ConfigValue;

    fn node() -> PolicyNode {
        PolicyNode::new()
            .with_rule(Rule::string("user", true))
            .with_rule(Rule::integer("port", false).with_default(8080_i64).unwrap())
            .with_rule(Rule::bool("debug", false))
    }

    #[test]
    fn test_process_fills_defaults() {
        let out = node()
            .process(&ConfigDataNode::new().with("user", "root").with("extra", 1_i64))
            .unwrap();
        assert_eq!(out.get("port"), Some(&ConfigValue::Int(8080)));
        assert_eq!(out.get("extra"), Some(&ConfigValue::Int(1)));
        assert!(out.get("debug").is_none());
    }

    #[test]
    fn test_process_collects_all_errors() {
        let errors = node()
            .process(&ConfigDataNode::new().with("debug", "yes"))
            .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(
            errors
                .iter()
                .any(|e| e.to_string() == "required key missing (user)")
        );
        assert!(errors.iter().any(|e| e.key() == "debug"));
    }

    #[test]
    fn test_defaults() {
        let defaults = node().defaults();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults.get("port"), Some(&ConfigValue::Int(8080)));
    }

    #[test]
    fn test_policy_tree_lookup() {
        let empty: [&str; 0] = [];
        let policy = ConfigPolicy::new()
            .with_node(&empty, PolicyNode::new().with_rule(Rule::string("token", false)))
            .with_node(
                &["intel", "mock"],
                PolicyNode::new().with_rule(Rule::string("user", true)),
            );

        let mock = policy.get(&["intel", "mock", "foo"]);
        assert!(mock.rules().contains_key("user"));
        assert!(mock.rules().contains_key("token"));

        let other = policy.get(&["intel", "other"]);
        assert!(!other.rules().contains_key("user"));
        assert!(policy.root().has_rules());
        assert!(!ConfigPolicy::new().get(&["x"]).has_rules());
    }
}
