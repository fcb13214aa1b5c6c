#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Configuration for the Plexus control plane.
//!
//! [`ControlConfig`] covers pool sizing, timeouts, plugin trust, TLS
//! material handed to plugins, global tags, layered plugin config and
//! logging.
//!
//! # Usage
//!
//! ```rust,no_run
//! use plexus_config::ControlConfig;
//!
//! let config = ControlConfig::load(None).unwrap();
//! println!("max running plugins: {}", config.max_running_plugins);
//! ```
//!
//! # Precedence
//!
//! From lowest to highest priority:
//!
//! 1. Embedded defaults (`defaults.toml` compiled into the binary)
//! 2. The user config file (`<config dir>/plexus/config.toml`), or an
//!    explicit file when one is given
//! 3. `PLEXUS_*` environment variables
//!
//! This crate depends only on `plexus-core` among internal crates. Trust
//! levels and log formats stay strings here and are parsed by the crates
//! that own those types.

/// Environment variable overrides.
pub mod env;
/// Configuration error types.
pub mod error;
/// Config file discovery and loading.
pub mod loader;
/// Deep merging of TOML trees.
pub mod merge;
/// Layered per-plugin configuration.
pub mod plugins;
/// Configuration struct definitions.
pub mod types;
/// Validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use plugins::{PluginConfig, PluginNameConfig, PluginTypeConfig};
pub use types::{ControlConfig, LogSection, TlsSection};

impl ControlConfig {
    /// Load defaults, then `path` (or the user config file when `None`),
    /// then environment overrides, and validate the result.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a file is malformed or validation fails.
    pub fn load(path: Option<&std::path::Path>) -> ConfigResult<Self> {
        loader::load(path)
    }
}
