//! Error types for the control plane.
//!
//! Each concern has its own enum; [`ControlError`] wraps them all and
//! [`ControlErrors`] carries a batch of failures so callers can attribute
//! each one through [`ControlError::fields`].

use std::collections::BTreeMap;
use std::fmt;

use plexus_core::{PluginKey, PluginType, PolicyError};
use plexus_crypto::CryptoError;
use thiserror::Error;

/// Metric catalog lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// No metric matched.
    #[error("Metric not found: {namespace} (version: {version})")]
    MetricNotFound {
        /// Rendered namespace.
        namespace: String,
        /// Requested version.
        version: i32,
    },

    /// A single-metric query matched more than one leaf.
    #[error("Incoming namespace `{namespace}` is too ambiguous (version: {version})")]
    Ambiguous {
        /// Rendered namespace.
        namespace: String,
        /// Requested version.
        version: i32,
    },

    /// The query had no elements.
    #[error("Incorrect format of requested metric, empty list of namespace elements")]
    EmptyNamespace,

    /// Nothing lives at or below a browsed namespace.
    #[error("No metric found below the given namespace: {namespace}")]
    NothingBelow {
        /// Rendered namespace.
        namespace: String,
    },

    /// No loaded plugin matches.
    #[error("Plugin not found: type({plugin_type}) name({name}) version({version})")]
    PluginNotFound {
        /// Plugin type.
        plugin_type: PluginType,
        /// Plugin name.
        name: String,
        /// Requested version.
        version: i32,
    },
}

/// Plugin loading, unloading and spin-up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The plugin file could not be read.
    #[error("cannot read plugin {path}: {message}")]
    Io {
        /// Plugin path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// Signature verification failed.
    #[error("signature verification failed for {plugin}: {source}")]
    Signature {
        /// Plugin path or key.
        plugin: String,
        /// Crypto failure.
        source: CryptoError,
    },

    /// The file changed since it was loaded.
    #[error("checksum mismatch for {plugin}: plugin file changed since load")]
    ChecksumMismatch {
        /// Plugin key.
        plugin: String,
    },

    /// The process could not be started.
    #[error("failed to start plugin {plugin}: {message}")]
    Spawn {
        /// Plugin path.
        plugin: String,
        /// Underlying error.
        message: String,
    },

    /// No handshake within the load timeout.
    #[error("timed out after {timeout_ms}ms waiting for handshake from {plugin}")]
    HandshakeTimeout {
        /// Plugin path.
        plugin: String,
        /// Timeout applied.
        timeout_ms: u64,
    },

    /// The process exited before its handshake.
    #[error("plugin died without sending response")]
    PluginDied {
        /// Plugin path.
        plugin: String,
    },

    /// The handshake line could not be decoded.
    #[error("invalid handshake from {plugin}: {message}")]
    InvalidHandshake {
        /// Plugin path.
        plugin: String,
        /// Decode failure.
        message: String,
    },

    /// The plugin reported a failed start.
    #[error("plugin {plugin} failed to start: {message}")]
    HandshakeFailed {
        /// Plugin path.
        plugin: String,
        /// Message reported by the plugin.
        message: String,
    },

    /// A plugin with the same key is already loaded.
    #[error("plugin is already loaded: {key}")]
    AlreadyLoaded {
        /// Plugin key.
        key: PluginKey,
    },

    /// No loaded plugin has this key.
    #[error("plugin not found: {key}")]
    NotLoaded {
        /// Plugin key.
        key: PluginKey,
    },

    /// The plugin is not in the `loaded` state.
    #[error("plugin {key} is not in the loaded state ({status})")]
    NotInLoadedState {
        /// Plugin key.
        key: PluginKey,
        /// Current status.
        status: String,
    },

    /// A collector advertised a metric without a usable version.
    #[error("metric {namespace} advertised by {key} has invalid version {version}")]
    InvalidMetricVersion {
        /// Plugin key.
        key: PluginKey,
        /// Rendered namespace.
        namespace: String,
        /// Resolved version.
        version: i32,
    },

    /// A running task depends on the plugin.
    #[error("Plugin is used by running task. Stop the task to be able to unload the plugin")]
    PluginInUse {
        /// Plugin key.
        key: PluginKey,
        /// Dependent tasks.
        tasks: Vec<String>,
    },

    /// A handshake RPC failed.
    #[error("{key}: {source}")]
    Rpc {
        /// Plugin key.
        key: PluginKey,
        /// RPC failure.
        source: RpcError,
    },
}

/// Subscription group management.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// `add` for an existing task.
    #[error("subscription group already exists")]
    GroupExists {
        /// Task id.
        task_id: String,
    },

    /// Unknown task.
    #[error("subscription group does not exist")]
    GroupNotFound {
        /// Task id.
        task_id: String,
    },

    /// Swap between plugins of different type or name.
    #[error("plugin type and name must match to swap: {incoming} cannot replace {outgoing}")]
    SwapMismatch {
        /// Newly loaded plugin.
        incoming: PluginKey,
        /// Plugin it was meant to replace.
        outgoing: PluginKey,
    },

    /// A pool could not be brought up for a subscription.
    #[error("failed to subscribe {task_id} to {key}: {message}")]
    PoolUnavailable {
        /// Task id.
        task_id: String,
        /// Pool key.
        key: PluginKey,
        /// What went wrong.
        message: String,
    },
}

/// Per-group collection, processing and publishing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    /// The deadline passed before the plugin answered.
    #[error("deadline exceeded waiting for {key}")]
    DeadlineExceeded {
        /// Pool key.
        key: PluginKey,
    },

    /// The pool has no running instance.
    #[error("no available instance for {key}")]
    NoAvailableInstance {
        /// Pool key.
        key: PluginKey,
    },

    /// The pool's plugin is not the expected type.
    #[error("{key} is not a {expected}")]
    WrongPluginType {
        /// Pool key.
        key: PluginKey,
        /// Expected type.
        expected: PluginType,
    },

    /// The plugin call failed.
    #[error("{key}: {source}")]
    Rpc {
        /// Pool key.
        key: PluginKey,
        /// RPC failure.
        source: RpcError,
    },
}

/// Plugin RPC transport and remote failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// Connecting to the plugin failed.
    #[error("cannot connect to {address}: {message}")]
    Connect {
        /// Listen address.
        address: String,
        /// Underlying error.
        message: String,
    },

    /// Reading or writing failed.
    #[error("transport error: {0}")]
    Io(String),

    /// The call did not finish in time.
    #[error("{method} timed out")]
    Timeout {
        /// RPC method.
        method: String,
    },

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The plugin returned an error.
    #[error("plugin error {code}: {message}")]
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Error message.
        message: String,
    },

    /// The plugin closed the connection.
    #[error("connection closed by plugin")]
    Closed,
}

/// Result type for RPC calls.
pub type RpcResult<T> = Result<T, RpcError>;

/// Any control plane failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Catalog failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Load failure.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Subscription failure.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Collection failure.
    #[error(transparent)]
    Collection(#[from] CollectionError),

    /// RPC failure outside a collection.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A config value violated the plugin's policy.
    #[error("{source} (namespace: {namespace}, plugin: {plugin})")]
    Policy {
        /// Rendered namespace, empty for plugin-level policy.
        namespace: String,
        /// Plugin key.
        plugin: PluginKey,
        /// Rule violation.
        source: PolicyError,
    },

    /// Trust level or keyring setup failed.
    #[error("plugin trust setup failed: {0}")]
    Trust(#[from] CryptoError),

    /// The controller has not been started.
    #[error("controller not started")]
    NotStarted,
}

impl ControlError {
    /// Attribute this error for batch reporting.
    ///
    /// Keys: `plugin_type`, `plugin_name`, `plugin_version`, `namespace`,
    /// `task_id`. Only the keys that apply are present.
    #[must_use]
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        fn add_key(key: &PluginKey, fields: &mut BTreeMap<&'static str, String>) {
            fields.insert("plugin_type", key.plugin_type.to_string());
            fields.insert("plugin_name", key.name.clone());
            fields.insert("plugin_version", key.version.to_string());
        }

        let mut fields = BTreeMap::new();
        match self {
            Self::Catalog(e) => match e {
                CatalogError::MetricNotFound { namespace, version }
                | CatalogError::Ambiguous { namespace, version } => {
                    fields.insert("namespace", namespace.clone());
                    fields.insert("version", version.to_string());
                },
                CatalogError::NothingBelow { namespace } => {
                    fields.insert("namespace", namespace.clone());
                },
                CatalogError::PluginNotFound {
                    plugin_type,
                    name,
                    version,
                } => {
                    fields.insert("plugin_type", plugin_type.to_string());
                    fields.insert("plugin_name", name.clone());
                    fields.insert("plugin_version", version.to_string());
                },
                CatalogError::EmptyNamespace => {},
            },
            Self::Load(e) => match e {
                LoadError::Io { path, .. } => {
                    fields.insert("path", path.clone());
                },
                LoadError::Signature { plugin, .. }
                | LoadError::ChecksumMismatch { plugin }
                | LoadError::Spawn { plugin, .. }
                | LoadError::HandshakeTimeout { plugin, .. }
                | LoadError::PluginDied { plugin }
                | LoadError::InvalidHandshake { plugin, .. }
                | LoadError::HandshakeFailed { plugin, .. } => {
                    fields.insert("plugin", plugin.clone());
                },
                LoadError::AlreadyLoaded { key }
                | LoadError::NotLoaded { key }
                | LoadError::NotInLoadedState { key, .. }
                | LoadError::PluginInUse { key, .. }
                | LoadError::Rpc { key, .. } => add_key(key, &mut fields),
                LoadError::InvalidMetricVersion { key, namespace, .. } => {
                    add_key(key, &mut fields);
                    fields.insert("namespace", namespace.clone());
                },
            },
            Self::Subscription(e) => match e {
                SubscriptionError::GroupExists { task_id }
                | SubscriptionError::GroupNotFound { task_id } => {
                    fields.insert("task_id", task_id.clone());
                },
                SubscriptionError::SwapMismatch { incoming, .. } => add_key(incoming, &mut fields),
                SubscriptionError::PoolUnavailable { task_id, key, .. } => {
                    add_key(key, &mut fields);
                    fields.insert("task_id", task_id.clone());
                },
            },
            Self::Collection(e) => match e {
                CollectionError::DeadlineExceeded { key }
                | CollectionError::NoAvailableInstance { key }
                | CollectionError::WrongPluginType { key, .. }
                | CollectionError::Rpc { key, .. } => add_key(key, &mut fields),
            },
            Self::Policy {
                namespace, plugin, ..
            } => {
                add_key(plugin, &mut fields);
                if !namespace.is_empty() {
                    fields.insert("namespace", namespace.clone());
                }
            },
            Self::Rpc(_) | Self::Trust(_) | Self::NotStarted => {},
        }
        fields
    }
}

/// Result type for single-failure control operations.
pub type ControlResult<T> = Result<T, ControlError>;

/// A batch of control plane failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlErrors(Vec<ControlError>);

impl ControlErrors {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a failure.
    pub fn push(&mut self, error: impl Into<ControlError>) {
        self.0.push(error.into());
    }

    /// Whether the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over failures.
    pub fn iter(&self) -> std::slice::Iter<'_, ControlError> {
        self.0.iter()
    }

    /// The failures as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[ControlError] {
        &self.0
    }

    /// Consume into the failures.
    #[must_use]
    pub fn into_inner(self) -> Vec<ControlError> {
        self.0
    }

    /// `Ok(value)` when empty, `Err(self)` otherwise.
    ///
    /// # Errors
    ///
    /// Returns `self` when it holds any failure.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ControlErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ControlErrors {}

impl From<ControlError> for ControlErrors {
    fn from(error: ControlError) -> Self {
        Self(vec![error])
    }
}

impl<E: Into<ControlError>> FromIterator<E> for ControlErrors {
    fn from_iter<T: IntoIterator<Item = E>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<E: Into<ControlError>> Extend<E> for ControlErrors {
    fn extend<T: IntoIterator<Item = E>>(&mut self, iter: T) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for ControlErrors {
    type Item = ControlError;
    type IntoIter = std::vec::IntoIter<ControlError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ControlErrors {
    type Item = &'a ControlError;
    type IntoIter = std::slice::Iter<'a, ControlError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_messages() {
        let err = CatalogError::MetricNotFound {
            namespace: "/intel/mock/foo".into(),
            version: 6,
        };
        assert_eq!(err.to_string(), "Metric not found: /intel/mock/foo (version: 6)");

        let err = CatalogError::Ambiguous {
            namespace: "/intel/mock/*".into(),
            version: -1,
        };
        assert_eq!(
            err.to_string(),
            "Incoming namespace `/intel/mock/*` is too ambiguous (version: -1)"
        );

        let err = CatalogError::PluginNotFound {
            plugin_type: PluginType::Processor,
            name: "x".into(),
            version: 1,
        };
        assert_eq!(err.to_string(), "Plugin not found: type(processor) name(x) version(1)");
    }

    #[test]
    fn test_fields_attribute_plugin() {
        let err = ControlError::Collection(CollectionError::DeadlineExceeded {
            key: PluginKey::new(PluginType::Collector, "mock", 2),
        });
        let fields = err.fields();
        assert_eq!(fields["plugin_type"], "collector");
        assert_eq!(fields["plugin_name"], "mock");
        assert_eq!(fields["plugin_version"], "2");
    }

    #[test]
    fn test_policy_fields_include_namespace() {
        let err = ControlError::Policy {
            namespace: "/intel/mock/foo".into(),
            plugin: PluginKey::new(PluginType::Collector, "mock", 1),
            source: PolicyError::RequiredKeyMissing {
                key: "password".into(),
            },
        };
        assert_eq!(err.fields()["namespace"], "/intel/mock/foo");
    }

    #[test]
    fn test_errors_batch() {
        let mut errors = ControlErrors::new();
        assert!(errors.clone().into_result(()).is_ok());
        errors.push(CatalogError::EmptyNamespace);
        errors.push(ControlError::NotStarted);
        assert_eq!(errors.len(), 2);
        assert!(errors.to_string().contains("; controller not started"));
        assert!(errors.into_result(()).is_err());
    }
}
