//! Running plugin instances.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use plexus_core::{PluginKey, PluginMeta};
use plexus_events::{ControlEvent, EventBus, EventMetadata};
use serde::Serialize;
use tracing::{debug, warn};

use super::client::PluginClient;
use super::execution::PluginProcess;
use super::launcher::LaunchedPlugin;

/// Time allowed for the kill RPC before the process is signalled.
const KILL_RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// One running instance of a loaded plugin, owned by its pool.
pub struct AvailablePlugin {
    id: u32,
    key: PluginKey,
    meta: PluginMeta,
    client: PluginClient,
    process: tokio::sync::Mutex<Option<PluginProcess>>,
    hits: AtomicU64,
    last_hit: Mutex<Option<DateTime<Utc>>>,
    failed_health_checks: AtomicU32,
    started_at: DateTime<Utc>,
}

impl fmt::Debug for AvailablePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvailablePlugin")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("hits", &self.hits())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AvailablePlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:v{}:id{}",
            self.key.plugin_type, self.key.name, self.key.version, self.id
        )
    }
}

impl AvailablePlugin {
    /// Wrap a launched plugin as instance `id`.
    #[must_use]
    pub fn new(id: u32, launched: LaunchedPlugin) -> Self {
        Self {
            id,
            key: launched.meta.key(),
            meta: launched.meta,
            client: launched.client,
            process: tokio::sync::Mutex::new(launched.process),
            hits: AtomicU64::new(0),
            last_hit: Mutex::new(None),
            failed_health_checks: AtomicU32::new(0),
            started_at: Utc::now(),
        }
    }

    /// Instance id within the pool.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Pool key.
    #[must_use]
    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    /// Handshake metadata.
    #[must_use]
    pub fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    /// RPC handle.
    #[must_use]
    pub fn client(&self) -> &PluginClient {
        &self.client
    }

    /// Calls routed to this instance.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Time of the last routed call.
    #[must_use]
    pub fn last_hit(&self) -> Option<DateTime<Utc>> {
        *self.last_hit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consecutive failed health checks.
    #[must_use]
    pub fn failed_health_checks(&self) -> u32 {
        self.failed_health_checks.load(Ordering::Relaxed)
    }

    /// Start time.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Count a routed call.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        *self.last_hit.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    /// Ping the instance.
    ///
    /// A success clears the failure count. A failure increments it and
    /// emits [`ControlEvent::HealthCheckFailed`]; reaching `failure_limit`
    /// also emits [`ControlEvent::AvailablePluginDead`]. Returns whether
    /// the ping succeeded.
    pub async fn check_health(&self, timeout: Duration, failure_limit: u32, bus: &EventBus) -> bool {
        let outcome = match tokio::time::timeout(timeout, self.client.ping()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("ping timed out".to_string()),
        };
        match outcome {
            Ok(()) => {
                self.failed_health_checks.store(0, Ordering::Relaxed);
                true
            },
            Err(reason) => {
                let failures = self
                    .failed_health_checks
                    .fetch_add(1, Ordering::Relaxed)
                    .saturating_add(1);
                warn!(instance = %self, failures, error = %reason, "Health check failed");
                bus.publish(ControlEvent::HealthCheckFailed {
                    metadata: EventMetadata::new("health_monitor"),
                    key: self.key.clone(),
                    instance_id: self.id,
                    failures,
                });
                if failures == failure_limit {
                    bus.publish(ControlEvent::AvailablePluginDead {
                        metadata: EventMetadata::new("health_monitor"),
                        key: self.key.clone(),
                        instance_id: self.id,
                        reason: format!("{failures} consecutive health checks failed"),
                    });
                }
                false
            },
        }
    }

    /// Ask the plugin to exit, then stop its process.
    pub async fn kill(&self, reason: &str) {
        match tokio::time::timeout(KILL_RPC_TIMEOUT, self.client.kill(reason)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => debug!(instance = %self, error = %e, "Kill RPC failed"),
            Err(_) => debug!(instance = %self, "Kill RPC timed out"),
        }
        if let Some(mut process) = self.process.lock().await.take() {
            process.terminate().await;
        }
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn info(&self) -> AvailablePluginInfo {
        AvailablePluginInfo {
            id: self.id,
            key: self.key.clone(),
            hits: self.hits(),
            last_hit: self.last_hit(),
            failed_health_checks: self.failed_health_checks(),
            started_at: self.started_at,
        }
    }
}

/// Snapshot of an [`AvailablePlugin`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailablePluginInfo {
    /// Instance id.
    pub id: u32,
    /// Pool key.
    pub key: PluginKey,
    /// Calls routed.
    pub hits: u64,
    /// Last routed call.
    pub last_hit: Option<DateTime<Utc>>,
    /// Consecutive failed health checks.
    pub failed_health_checks: u32,
    /// Start time.
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use plexus_core::PluginType;

    use super::*;
    use crate::testing::MockPlugin;

    #[tokio::test]
    #[allow(clippy::arithmetic_side_effects)]
    async fn test_health_checks_escalate_to_dead() {
        let mock = MockPlugin::collector("mock", 1);
        let instance = AvailablePlugin::new(1, mock.launched());
        let bus = EventBus::new();
        let mut events = bus.subscribe();

        mock.set_healthy(false);
        for _ in 0..3 {
            assert!(
                !instance
                    .check_health(Duration::from_millis(100), 3, &bus)
                    .await
            );
        }
        assert_eq!(instance.failed_health_checks(), 3);

        let mut dead = 0;
        let mut failed = 0;
        while let Some(event) = events.try_recv() {
            match event.as_ref() {
                ControlEvent::HealthCheckFailed { .. } => failed += 1,
                ControlEvent::AvailablePluginDead { instance_id, .. } => {
                    assert_eq!(*instance_id, 1);
                    dead += 1;
                },
                _ => {},
            }
        }
        assert_eq!((failed, dead), (3, 1));

        mock.set_healthy(true);
        assert!(
            instance
                .check_health(Duration::from_millis(100), 3, &bus)
                .await
        );
        assert_eq!(instance.failed_health_checks(), 0);
    }

    #[tokio::test]
    async fn test_hits_and_display() {
        let mock = MockPlugin::new(PluginMeta::new(PluginType::Publisher, "file", 2));
        let instance = AvailablePlugin::new(7, mock.launched());
        assert_eq!(instance.to_string(), "publisher:file:v2:id7");
        assert!(instance.last_hit().is_none());
        instance.record_hit();
        instance.record_hit();
        assert_eq!(instance.hits(), 2);
        assert!(instance.last_hit().is_some());

        instance.kill("test").await;
        assert_eq!(mock.kills(), 1);
    }
}
