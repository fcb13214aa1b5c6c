//! Prelude module - commonly used types for convenient import.
//!
//! Use `use plexus_control::prelude::*;` to import all essential types.

// Errors
pub use crate::{ControlError, ControlErrors, ControlResult};

// Controller
pub use crate::{Controller, ControllerBuilder};

// Subscriptions
pub use crate::{Resolution, SubscriptionRequest};

// Plugins
pub use crate::{CatalogedMetric, LoadedPlugin, PluginLauncher, RequestedPlugin};
