//! Plexus Telemetry - Logging setup for the plugin control plane.
//!
//! Every Plexus crate logs through `tracing` with structured fields. This
//! crate installs the global subscriber: level and directive filtering,
//! pretty/compact/json/full output, and stdout, stderr or rotating files.
//!
//! # Example
//!
//! ```rust,no_run
//! use plexus_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), plexus_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("plexus_control=debug");
//! setup_logging(&config)?;
//! tracing::info!(plugin = "collector:mock:1", "Plugin loaded");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

#[cfg(feature = "config")]
mod bridge;
mod error;
mod logging;

#[cfg(feature = "config")]
pub use bridge::log_config_from;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
