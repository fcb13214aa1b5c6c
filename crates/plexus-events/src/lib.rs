//! Plexus Events - Typed event bus for the plugin control plane.
//!
//! This crate provides:
//! - [`ControlEvent`], every lifecycle event the control plane emits
//! - [`EventBus`], a broadcast channel for async consumers
//! - [`SubscriberRegistry`] for synchronous callback subscribers
//!
//! # Example
//!
//! ```rust
//! use plexus_core::PluginKey;
//! use plexus_events::{ControlEvent, EventBus, EventMetadata};
//!
//! # async fn example() {
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.publish(ControlEvent::PluginLoaded {
//!     metadata: EventMetadata::new("loader"),
//!     key: "collector:mock:1".parse().unwrap(),
//!     signed: false,
//! });
//!
//! let event = receiver.recv().await.unwrap();
//! assert_eq!(event.event_type(), "plugin_loaded");
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod event;
mod subscriber;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventReceiver};
pub use event::{ControlEvent, EventMetadata};
pub use subscriber::{EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry};
