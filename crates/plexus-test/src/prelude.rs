//! Prelude module - commonly used test helpers for convenient import.
//!
//! Use `use plexus_test::prelude::*;` to import all essential helpers.

pub use crate::{ControlHarness, MockLauncher, MockPlugin};
pub use crate::{
    metric_request, mock_collector, ns, requested, requested_version, test_control_config,
};
