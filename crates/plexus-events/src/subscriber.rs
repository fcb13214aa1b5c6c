//! Synchronous event subscribers.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::event::ControlEvent;

/// A callback notified inline when an event is published.
///
/// `on_event` runs on the publisher's task; keep it short.
pub trait EventSubscriber: Send + Sync {
    /// Handle an event.
    fn on_event(&self, event: &ControlEvent);

    /// Whether this subscriber wants `event`.
    fn accepts(&self, event: &ControlEvent) -> bool {
        let _ = event;
        true
    }

    /// Name used in logs.
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Handle returned by [`SubscriberRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

/// Registry of synchronous subscribers shared by clones of an event bus.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn EventSubscriber>>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscriber_count", &self.len())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn register(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriberId {
        let id = SubscriberId(Uuid::new_v4());
        debug!(subscriber_name = %subscriber.name(), "Subscriber registered");
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, subscriber);
        id
    }

    /// Remove a subscriber; returns whether it was registered.
    pub fn unregister(&self, id: SubscriberId) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    /// Deliver `event` to every accepting subscriber.
    ///
    /// A panicking subscriber is logged and does not affect the others.
    pub fn notify(&self, event: &ControlEvent) {
        let subscribers: Vec<Arc<dyn EventSubscriber>> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        for subscriber in subscribers {
            if !subscriber.accepts(event) {
                continue;
            }
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                subscriber.on_event(event);
            }));
            if result.is_err() {
                warn!(
                    subscriber_name = %subscriber.name(),
                    event_type = event.event_type(),
                    "Subscriber panicked"
                );
            }
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Closure-backed subscriber with an optional event-type filter.
pub struct FilterSubscriber<F>
where
    F: Fn(&ControlEvent) + Send + Sync,
{
    name: String,
    event_types: Vec<&'static str>,
    handler: F,
}

impl<F> FilterSubscriber<F>
where
    F: Fn(&ControlEvent) + Send + Sync,
{
    /// Subscribe `handler` to every event.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            event_types: Vec::new(),
            handler,
        }
    }

    /// Only deliver events whose [`ControlEvent::event_type`] is listed.
    #[must_use]
    pub fn with_event_types(mut self, event_types: &[&'static str]) -> Self {
        self.event_types = event_types.to_vec();
        self
    }
}

impl<F> EventSubscriber for FilterSubscriber<F>
where
    F: Fn(&ControlEvent) + Send + Sync,
{
    fn on_event(&self, event: &ControlEvent) {
        (self.handler)(event);
    }

    fn accepts(&self, event: &ControlEvent) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event.event_type())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::event::EventMetadata;

    fn started() -> ControlEvent {
        ControlEvent::ControllerStarted {
            metadata: EventMetadata::new("test"),
        }
    }

    fn loaded() -> ControlEvent {
        ControlEvent::PluginLoaded {
            metadata: EventMetadata::new("test"),
            key: "collector:mock:1".parse().unwrap(),
            signed: false,
        }
    }

    #[test]
    fn test_filter_by_event_type() {
        let registry = SubscriberRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        registry.register(Arc::new(
            FilterSubscriber::new("loads", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .with_event_types(&["plugin_loaded"]),
        ));

        registry.notify(&started());
        registry.notify(&loaded());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let registry = SubscriberRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        registry.register(Arc::new(FilterSubscriber::new("boom", |_| panic!("boom"))));
        registry.register(Arc::new(FilterSubscriber::new("ok", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })));

        registry.notify(&started());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister() {
        let registry = SubscriberRegistry::new();
        let id = registry.register(Arc::new(FilterSubscriber::new("x", |_| {})));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert!(registry.is_empty());
    }
}
