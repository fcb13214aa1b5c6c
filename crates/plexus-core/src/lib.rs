//! Plexus Core - Foundation types shared by every Plexus crate.
//!
//! This crate provides:
//! - Metric namespaces with static, dynamic and wildcard elements
//! - Metric data points and requested metrics
//! - Plugin identity: type, key, handshake metadata
//! - Plugin configuration values and namespace-keyed config trees
//! - Config policy rules advertised by plugins
//!
//! # Example
//!
//! ```
//! use plexus_core::{Namespace, PluginKey, PluginType};
//!
//! let ns = Namespace::from_strs(["intel", "mock", "foo"]);
//! assert_eq!(ns.to_string(), "/intel/mock/foo");
//!
//! let key: PluginKey = "collector:mock:1".parse().unwrap();
//! assert_eq!(key.plugin_type, PluginType::Collector);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod cdata;
pub mod ctree;
pub mod error;
pub mod metric;
pub mod namespace;
pub mod plugin;
pub mod policy;

pub use cdata::{ConfigDataNode, ConfigDataTree, ConfigValue};
pub use ctree::{NamespaceTree, TreeNode};
pub use error::{CoreError, CoreResult, PolicyError, PolicyResult};
pub use metric::{Metric, NamespaceTags, RequestedMetric, STD_TAG_PLUGIN_RUNNING_ON};
pub use namespace::{Namespace, NamespaceElement, WILDCARD};
pub use plugin::{
    PluginKey, PluginMeta, PluginType, RoutingStrategy, RpcType, SubscribedPlugin,
};
pub use policy::{ConfigPolicy, PolicyNode, Rule};
