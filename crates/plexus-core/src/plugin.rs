//! Plugin identity and handshake metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cdata::ConfigDataNode;
use crate::error::{CoreError, CoreResult};

/// The three kinds of plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    /// Gathers metrics.
    Collector,
    /// Transforms collected metrics.
    Processor,
    /// Ships metrics to a sink.
    Publisher,
}

impl PluginType {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collector => "collector",
            Self::Processor => "processor",
            Self::Publisher => "publisher",
        }
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PluginType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "collector" => Ok(Self::Collector),
            "processor" => Ok(Self::Processor),
            "publisher" => Ok(Self::Publisher),
            other => Err(CoreError::UnknownPluginType(other.to_string())),
        }
    }
}

/// Identifies a loaded plugin and its pool: `type:name:version`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PluginKey {
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: i32,
}

impl PluginKey {
    /// Create a plugin key.
    #[must_use]
    pub fn new(plugin_type: PluginType, name: impl Into<String>, version: i32) -> Self {
        Self {
            plugin_type,
            name: name.into(),
            version,
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.plugin_type, self.name, self.version)
    }
}

impl FromStr for PluginKey {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let mut parts = s.split(':');
        let (Some(ty), Some(name), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::InvalidPluginKey(s.to_string()));
        };
        if name.is_empty() {
            return Err(CoreError::InvalidPluginKey(s.to_string()));
        }
        let version = version
            .parse()
            .map_err(|_| CoreError::InvalidPluginKey(s.to_string()))?;
        Ok(Self::new(ty.parse()?, name, version))
    }
}

/// How a pool picks an instance for each call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Fewest hits wins, ties broken randomly.
    #[default]
    LowestHit,
    /// Oldest last hit wins.
    LeastRecentlyUsed,
    /// Each task sticks to one instance.
    Sticky,
    /// Each distinct config sticks to one instance.
    ConfigBased,
}

/// RPC flavour a plugin speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcType {
    /// Newline-delimited JSON-RPC 2.0 over TCP.
    #[default]
    JsonRpc,
}

fn default_concurrency() -> usize {
    5
}

/// Metadata a plugin reports in its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    /// Plugin name.
    pub name: String,
    /// Plugin version.
    pub version: i32,
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// RPC flavour.
    #[serde(default)]
    pub rpc_type: RpcType,
    /// Concurrent calls a single instance accepts.
    #[serde(default = "default_concurrency")]
    pub concurrency_count: usize,
    /// Only one instance may run at a time.
    #[serde(default)]
    pub exclusive: bool,
    /// Plugin does not use TLS.
    #[serde(default)]
    pub unsecure: bool,
    /// Plugin-requested metric cache TTL in milliseconds.
    #[serde(default)]
    pub cache_ttl_ms: u64,
    /// Instance selection strategy.
    #[serde(default)]
    pub routing_strategy: RoutingStrategy,
}

impl PluginMeta {
    /// Create metadata with defaults for everything but identity.
    #[must_use]
    pub fn new(plugin_type: PluginType, name: impl Into<String>, version: i32) -> Self {
        Self {
            name: name.into(),
            version,
            plugin_type,
            rpc_type: RpcType::default(),
            concurrency_count: default_concurrency(),
            exclusive: false,
            unsecure: false,
            cache_ttl_ms: 0,
            routing_strategy: RoutingStrategy::default(),
        }
    }

    /// Mark the plugin exclusive.
    #[must_use]
    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Set the routing strategy.
    #[must_use]
    pub fn with_routing_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing_strategy = strategy;
        self
    }

    /// Set the cache TTL.
    #[must_use]
    pub fn with_cache_ttl_ms(mut self, ttl: u64) -> Self {
        self.cache_ttl_ms = ttl;
        self
    }

    /// Set the concurrency count.
    #[must_use]
    pub fn with_concurrency_count(mut self, count: usize) -> Self {
        self.concurrency_count = count;
        self
    }

    /// The key this plugin registers under.
    #[must_use]
    pub fn key(&self) -> PluginKey {
        PluginKey::new(self.plugin_type, self.name.clone(), self.version)
    }
}

/// A processor or publisher explicitly requested by a task, or a collector
/// resolved from its metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedPlugin {
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Plugin name.
    pub name: String,
    /// Plugin version; values below 1 mean "latest".
    #[serde(default)]
    pub version: i32,
    /// Plugin config.
    #[serde(default)]
    pub config: ConfigDataNode,
}

impl SubscribedPlugin {
    /// Create a subscribed plugin with empty config.
    #[must_use]
    pub fn new(plugin_type: PluginType, name: impl Into<String>, version: i32) -> Self {
        Self {
            plugin_type,
            name: name.into(),
            version,
            config: ConfigDataNode::default(),
        }
    }

    /// Set the config.
    #[must_use]
    pub fn with_config(mut self, config: ConfigDataNode) -> Self {
        self.config = config;
        self
    }

    /// Key of this plugin (version as requested).
    #[must_use]
    pub fn key(&self) -> PluginKey {
        PluginKey::new(self.plugin_type, self.name.clone(), self.version)
    }
}

impl From<&PluginKey> for SubscribedPlugin {
    fn from(key: &PluginKey) -> Self {
        Self::new(key.plugin_type, key.name.clone(), key.version)
    }
}
