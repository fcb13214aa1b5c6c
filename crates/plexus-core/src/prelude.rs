//! Prelude module - commonly used types for convenient import.
//!
//! Use `use plexus_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult, PolicyError, PolicyResult};

// Namespaces and metrics
pub use crate::{Metric, Namespace, NamespaceElement, NamespaceTags, RequestedMetric};

// Plugins
pub use crate::{PluginKey, PluginMeta, PluginType, RoutingStrategy, SubscribedPlugin};

// Configuration
pub use crate::{ConfigDataNode, ConfigDataTree, ConfigPolicy, ConfigValue, PolicyNode, Rule};
