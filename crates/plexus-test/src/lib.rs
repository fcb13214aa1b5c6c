//! Plexus Test - Shared test utilities for the Plexus control plane.
//!
//! This crate re-exports the in-process mock plugins and adds fixtures and
//! a harness that wires a started [`Controller`](plexus_control::Controller)
//! to a [`MockLauncher`].
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! plexus-test.workspace = true
//! ```
//!
//! Then use in your tests:
//!
//! ```rust,ignore
//! use plexus_test::{ControlHarness, mock_collector, metric_request};
//!
//! #[tokio::test]
//! async fn test_collect() {
//!     let h = ControlHarness::new();
//!     h.load(&mock_collector("mock", 1, &["/intel/mock/foo"])).await;
//!     h.controller
//!         .create_subscription_group("t1", metric_request(&["/intel/mock/foo"]))
//!         .await
//!         .unwrap();
//!     let metrics = h
//!         .controller
//!         .collect_metrics("t1", h.deadline(), &Default::default())
//!         .await
//!         .unwrap();
//!     assert_eq!(metrics.len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod logging;

pub use fixtures::*;
pub use harness::*;
pub use logging::*;
pub use plexus_control::testing::{MockLauncher, MockPlugin};
