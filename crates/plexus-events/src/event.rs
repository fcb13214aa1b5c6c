//! Control-plane event types.

use chrono::{DateTime, Utc};
use plexus_core::PluginKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Correlates events caused by the same operation.
    pub correlation_id: Option<Uuid>,
    /// Component that emitted the event.
    pub source: String,
}

impl EventMetadata {
    /// Create metadata stamped now.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            source: source.into(),
        }
    }

    /// Set the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Everything the control plane announces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    // ========== Controller ==========
    /// Controller started.
    ControllerStarted {
        /// Event metadata.
        metadata: EventMetadata,
    },

    /// Controller stopped.
    ControllerStopped {
        /// Event metadata.
        metadata: EventMetadata,
    },

    // ========== Catalog ==========
    /// A plugin finished loading and its metrics are in the catalog.
    PluginLoaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Loaded plugin.
        key: PluginKey,
        /// Whether its signature was verified.
        signed: bool,
    },

    /// A plugin and its metrics left the catalog.
    PluginUnloaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Unloaded plugin.
        key: PluginKey,
    },

    /// One plugin replaced another.
    PluginsSwapped {
        /// Event metadata.
        metadata: EventMetadata,
        /// Plugin now loaded.
        loaded: PluginKey,
        /// Plugin removed.
        unloaded: PluginKey,
    },

    // ========== Subscriptions ==========
    /// A task subscribed to a plugin pool.
    PluginSubscribed {
        /// Event metadata.
        metadata: EventMetadata,
        /// Subscribing task.
        task_id: String,
        /// Pool key.
        key: PluginKey,
    },

    /// A task unsubscribed from a plugin pool.
    PluginUnsubscribed {
        /// Event metadata.
        metadata: EventMetadata,
        /// Unsubscribing task.
        task_id: String,
        /// Pool key.
        key: PluginKey,
    },

    // ========== Instances ==========
    /// A plugin instance was spun up.
    AvailablePluginStarted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Pool key.
        key: PluginKey,
        /// Instance id within the pool.
        instance_id: u32,
    },

    /// A plugin instance was killed.
    AvailablePluginStopped {
        /// Event metadata.
        metadata: EventMetadata,
        /// Pool key.
        key: PluginKey,
        /// Instance id within the pool.
        instance_id: u32,
        /// Why it was killed.
        reason: String,
    },

    /// A health check ping failed.
    HealthCheckFailed {
        /// Event metadata.
        metadata: EventMetadata,
        /// Pool key.
        key: PluginKey,
        /// Instance id within the pool.
        instance_id: u32,
        /// Consecutive failures so far.
        failures: u32,
    },

    /// An instance reached the health-check failure limit.
    AvailablePluginDead {
        /// Event metadata.
        metadata: EventMetadata,
        /// Pool key.
        key: PluginKey,
        /// Instance id within the pool.
        instance_id: u32,
        /// Why it is considered dead.
        reason: String,
    },
}

impl ControlEvent {
    /// Snake-case event name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ControllerStarted { .. } => "controller_started",
            Self::ControllerStopped { .. } => "controller_stopped",
            Self::PluginLoaded { .. } => "plugin_loaded",
            Self::PluginUnloaded { .. } => "plugin_unloaded",
            Self::PluginsSwapped { .. } => "plugins_swapped",
            Self::PluginSubscribed { .. } => "plugin_subscribed",
            Self::PluginUnsubscribed { .. } => "plugin_unsubscribed",
            Self::AvailablePluginStarted { .. } => "available_plugin_started",
            Self::AvailablePluginStopped { .. } => "available_plugin_stopped",
            Self::HealthCheckFailed { .. } => "health_check_failed",
            Self::AvailablePluginDead { .. } => "available_plugin_dead",
        }
    }

    /// The event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::ControllerStarted { metadata }
            | Self::ControllerStopped { metadata }
            | Self::PluginLoaded { metadata, .. }
            | Self::PluginUnloaded { metadata, .. }
            | Self::PluginsSwapped { metadata, .. }
            | Self::PluginSubscribed { metadata, .. }
            | Self::PluginUnsubscribed { metadata, .. }
            | Self::AvailablePluginStarted { metadata, .. }
            | Self::AvailablePluginStopped { metadata, .. }
            | Self::HealthCheckFailed { metadata, .. }
            | Self::AvailablePluginDead { metadata, .. } => metadata,
        }
    }

    /// Plugin key the event concerns, if any.
    #[must_use]
    pub fn plugin_key(&self) -> Option<&PluginKey> {
        match self {
            Self::ControllerStarted { .. } | Self::ControllerStopped { .. } => None,
            Self::PluginsSwapped { loaded, .. } => Some(loaded),
            Self::PluginLoaded { key, .. }
            | Self::PluginUnloaded { key, .. }
            | Self::PluginSubscribed { key, .. }
            | Self::PluginUnsubscribed { key, .. }
            | Self::AvailablePluginStarted { key, .. }
            | Self::AvailablePluginStopped { key, .. }
            | Self::HealthCheckFailed { key, .. }
            | Self::AvailablePluginDead { key, .. } => Some(key),
        }
    }

    /// Whether the event changes which plugins are in the catalog.
    #[must_use]
    pub fn is_catalog_change(&self) -> bool {
        matches!(
            self,
            Self::PluginLoaded { .. } | Self::PluginUnloaded { .. } | Self::PluginsSwapped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_tag() {
        let event = ControlEvent::HealthCheckFailed {
            metadata: EventMetadata::new("pool"),
            key: "collector:mock:1".parse().unwrap(),
            instance_id: 3,
            failures: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "health_check_failed");
        assert_eq!(json["instance_id"], 3);
        assert_eq!(json["metadata"]["source"], "pool");
    }

    #[test]
    fn test_plugin_key_and_catalog_change() {
        let key: PluginKey = "publisher:file:2".parse().unwrap();
        let event = ControlEvent::PluginUnloaded {
            metadata: EventMetadata::default(),
            key: key.clone(),
        };
        assert_eq!(event.plugin_key(), Some(&key));
        assert!(event.is_catalog_change());

        let started = ControlEvent::ControllerStarted {
            metadata: EventMetadata::default(),
        };
        assert!(started.plugin_key().is_none());
        assert!(!started.is_catalog_change());
        assert_eq!(started.metadata().source, "unknown");
    }
}
