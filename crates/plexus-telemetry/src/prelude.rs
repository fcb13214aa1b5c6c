//! Prelude module - commonly used types for convenient import.
//!
//! Use `use plexus_telemetry::prelude::*;` to import all essential types.

// Errors
pub use crate::{TelemetryError, TelemetryResult};

// Logging configuration
pub use crate::{FileRotation, LogConfig, LogFormat, LogTarget, setup_logging};
