use std::collections::BTreeMap;

use plexus_core::{ConfigDataNode, PluginType};
use serde::{Deserialize, Serialize};

/// Plugin config for every plugin, by type, by name and by version.
///
/// [`get`](Self::get) merges the layers in that order, later layers
/// overriding earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Applies to every plugin.
    pub all: ConfigDataNode,
    /// Collector layers.
    pub collector: PluginTypeConfig,
    /// Processor layers.
    pub processor: PluginTypeConfig,
    /// Publisher layers.
    pub publisher: PluginTypeConfig,
}

/// Config for every plugin of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginTypeConfig {
    /// Applies to every plugin of this type.
    pub all: ConfigDataNode,
    /// Per plugin name.
    pub plugins: BTreeMap<String, PluginNameConfig>,
}

/// Config for one plugin name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginNameConfig {
    /// Applies to every version.
    pub all: ConfigDataNode,
    /// Per version, keyed by the version number as a string.
    pub versions: BTreeMap<String, ConfigDataNode>,
}

impl PluginConfig {
    /// Layers for one plugin type.
    #[must_use]
    pub fn for_type(&self, plugin_type: PluginType) -> &PluginTypeConfig {
        match plugin_type {
            PluginType::Collector => &self.collector,
            PluginType::Processor => &self.processor,
            PluginType::Publisher => &self.publisher,
        }
    }

    /// Mutable layers for one plugin type.
    pub fn for_type_mut(&mut self, plugin_type: PluginType) -> &mut PluginTypeConfig {
        match plugin_type {
            PluginType::Collector => &mut self.collector,
            PluginType::Processor => &mut self.processor,
            PluginType::Publisher => &mut self.publisher,
        }
    }

    /// Merged config for a plugin.
    #[must_use]
    pub fn get(&self, plugin_type: PluginType, name: &str, version: i32) -> ConfigDataNode {
        let mut merged = self.all.clone();
        let by_type = self.for_type(plugin_type);
        merged.merge(&by_type.all);
        if let Some(by_name) = by_type.plugins.get(name) {
            merged.merge(&by_name.all);
            if let Some(by_version) = by_name.versions.get(&version.to_string()) {
                merged.merge(by_version);
            }
        }
        merged
    }

    /// Merge `node` into the layer for one plugin version.
    pub fn add_version(
        &mut self,
        plugin_type: PluginType,
        name: &str,
        version: i32,
        node: &ConfigDataNode,
    ) {
        self.for_type_mut(plugin_type)
            .plugins
            .entry(name.to_owned())
            .or_default()
            .versions
            .entry(version.to_string())
            .or_default()
            .merge(node);
    }
}

#[cfg(test)]
mod tests {
    use plexus_core::ConfigValue;

    use super::*;

    #[test]
    fn test_layer_precedence() {
        let mut config = PluginConfig::default();
        config.all.insert("user", "all");
        config.all.insert("only_all", true);
        config.collector.all.insert("user", "collector");
        let mock = config.collector.plugins.entry("mock".into()).or_default();
        mock.all.insert("user", "mock");
        config.add_version(
            PluginType::Collector,
            "mock",
            2,
            &ConfigDataNode::new().with("user", "mock-v2"),
        );

        let v2 = config.get(PluginType::Collector, "mock", 2);
        assert_eq!(v2.get("user"), Some(&ConfigValue::Str("mock-v2".into())));
        assert_eq!(v2.get("only_all"), Some(&ConfigValue::Bool(true)));

        let v1 = config.get(PluginType::Collector, "mock", 1);
        assert_eq!(v1.get("user"), Some(&ConfigValue::Str("mock".into())));

        let other = config.get(PluginType::Collector, "other", 1);
        assert_eq!(other.get("user"), Some(&ConfigValue::Str("collector".into())));

        let publisher = config.get(PluginType::Publisher, "mock", 2);
        assert_eq!(publisher.get("user"), Some(&ConfigValue::Str("all".into())));
    }

    #[test]
    fn test_toml_layout() {
        let config: PluginConfig = toml::from_str(
            r#"
            [all]
            user = "root"

            [collector.plugins.mock.versions.1]
            password = "secret"
            port = 8080
        "#,
        )
        .unwrap();
        let node = config.get(PluginType::Collector, "mock", 1);
        assert_eq!(node.get("user"), Some(&ConfigValue::Str("root".into())));
        assert_eq!(node.get("port"), Some(&ConfigValue::Int(8080)));
    }
}
