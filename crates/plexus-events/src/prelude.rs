//! Prelude module - commonly used types for convenient import.
//!
//! Use `use plexus_events::prelude::*;` to import all essential types.

pub use crate::{ControlEvent, EventBus, EventMetadata, EventReceiver};

pub use crate::{EventSubscriber, FilterSubscriber, SubscriberId, SubscriberRegistry};
