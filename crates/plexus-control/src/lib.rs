//! Plexus Control - the plugin control plane.
//!
//! This crate provides:
//! - A versioned metric catalog with wildcard lookups
//! - Plugin loading, signature checks and the handshake
//! - Pools of running plugin instances with selection strategies
//! - Per-task subscription groups resolved against the catalog
//! - Deadline-bounded collection, processing and publishing
//! - Health checks with restart of dead instances
//!
//! # Example
//!
//! ```no_run
//! use plexus_config::ControlConfig;
//! use plexus_control::prelude::*;
//!
//! # async fn run() -> Result<(), ControlError> {
//! let controller = Controller::new(ControlConfig::default())?;
//! controller.start();
//! let plugin = controller.load_path("/opt/plexus/plexus-collector-mock").await?;
//! println!("loaded {}", plugin.key());
//! controller.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod catalog;
pub mod collect;
pub mod controller;
pub mod error;
pub mod loader;
pub mod monitor;
pub mod plugin;
pub mod pool;
pub mod runner;
pub mod subscription;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use catalog::{CatalogedMetric, MetricCatalog};
pub use collect::Orchestrator;
pub use controller::{Controller, ControllerBuilder};
pub use error::{
    CatalogError, CollectionError, ControlError, ControlErrors, ControlResult, LoadError,
    RpcError, RpcResult, SubscriptionError,
};
pub use loader::PluginLoader;
pub use monitor::HealthMonitor;
pub use plugin::{
    AvailablePlugin, AvailablePluginInfo, ExecLauncher, LaunchedPlugin, LoadedPlugin,
    PluginClient, PluginLauncher, PluginRegistry, PluginStatus, RequestedPlugin,
};
pub use pool::{PluginPool, PoolInfo, PoolTable};
pub use runner::Runner;
pub use subscription::{
    Resolution, SubscriptionGroup, SubscriptionGroups, SubscriptionRequest, compare_plugins,
};
