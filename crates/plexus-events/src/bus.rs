//! Broadcast event bus.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::event::ControlEvent;
use crate::subscriber::SubscriberRegistry;

/// Default channel capacity for the event bus.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcasts [`ControlEvent`]s to async receivers and synchronous
/// subscribers. Clones share the channel and the registry.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<ControlEvent>>,
    registry: Arc<SubscriberRegistry>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus holding up to `capacity` undelivered events per receiver.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            registry: Arc::new(SubscriberRegistry::new()),
            capacity,
        }
    }

    /// Publish an event; returns how many async receivers got it.
    pub fn publish(&self, event: ControlEvent) -> usize {
        let event = Arc::new(event);
        let delivered = self.sender.send(Arc::clone(&event)).unwrap_or(0);
        trace!(
            event_type = event.event_type(),
            receivers = delivered,
            "Event published"
        );
        self.registry.notify(&event);
        delivered
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            skipped: 0,
        }
    }

    /// Synchronous subscriber registry.
    #[must_use]
    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Async receivers plus synchronous subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .receiver_count()
            .saturating_add(self.registry.len())
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Async end of an [`EventBus`].
#[derive(Debug)]
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<ControlEvent>>,
    skipped: u64,
}

impl EventReceiver {
    /// Wait for the next event; `None` once every sender is gone.
    ///
    /// Lagging skips the dropped events with a warning and adds them to
    /// [`Self::take_skipped`].
    pub async fn recv(&mut self) -> Option<Arc<ControlEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<Arc<ControlEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    fn lagged(&mut self, skipped: u64) {
        warn!(skipped, "Event receiver lagged, events dropped");
        self.skipped = self.skipped.saturating_add(skipped);
    }

    /// Events dropped by lagging since the last call, resetting the count.
    ///
    /// Consumers that act on events should resynchronize their state when
    /// this is non-zero.
    pub fn take_skipped(&mut self) -> u64 {
        std::mem::take(&mut self.skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventMetadata;

    fn loaded(version: i32) -> ControlEvent {
        ControlEvent::PluginLoaded {
            metadata: EventMetadata::new("test"),
            key: plexus_core::PluginKey::new(plexus_core::PluginType::Collector, "mock", version),
            signed: false,
        }
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        assert_eq!(bus.publish(loaded(1)), 1);
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "plugin_loaded");
    }

    #[tokio::test]
    async fn test_no_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.publish(loaded(1)), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_clone_shares_channel() {
        let bus = EventBus::with_capacity(8);
        let clone = bus.clone();
        let mut receiver = bus.subscribe();
        clone.publish(loaded(2));
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
        assert_eq!(clone.capacity(), 8);
    }

    #[tokio::test]
    async fn test_lagged_receiver_keeps_going() {
        let bus = EventBus::with_capacity(2);
        let mut receiver = bus.subscribe();
        for v in 0..5 {
            bus.publish(loaded(v));
        }
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.plugin_key().unwrap().version, 3);
        assert_eq!(receiver.take_skipped(), 3);
        assert_eq!(receiver.take_skipped(), 0);

        for v in 0..4 {
            bus.publish(loaded(v));
        }
        assert!(receiver.try_recv().is_some());
        assert_eq!(receiver.take_skipped(), 3);
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();
        drop(bus);
        assert!(receiver.recv().await.is_none());
    }
}
