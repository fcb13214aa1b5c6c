//! Subscriptions, spin-up and teardown of plugin instances.

use std::sync::Arc;

use plexus_core::PluginKey;
use plexus_events::{ControlEvent, EventBus, EventMetadata};
use tracing::{debug, info, warn};

use crate::error::{CatalogError, ControlResult, LoadError, SubscriptionError};
use crate::loader::PluginLoader;
use crate::plugin::{AvailablePlugin, AvailablePluginInfo, PluginRegistry};
use crate::pool::{PluginPool, PoolTable};

/// Drives pools: subscribes tasks and keeps instances running for them.
#[derive(Debug)]
pub struct Runner {
    pools: Arc<PoolTable>,
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    bus: EventBus,
    max_restarts: u32,
}

impl Runner {
    /// Create a runner.
    #[must_use]
    pub fn new(
        pools: Arc<PoolTable>,
        registry: Arc<PluginRegistry>,
        loader: Arc<PluginLoader>,
        bus: EventBus,
        max_restarts: u32,
    ) -> Self {
        Self {
            pools,
            registry,
            loader,
            bus,
            max_restarts,
        }
    }

    /// The pool table.
    #[must_use]
    pub fn pools(&self) -> &PoolTable {
        &self.pools
    }

    /// Subscribe `task_id` to the pool for `key` and make sure an instance
    /// is running.
    ///
    /// Subscribing twice is a no-op for the subscriber set.
    ///
    /// # Errors
    ///
    /// [`CatalogError::PluginNotFound`] for a key with neither a pool nor a
    /// loaded plugin, or [`SubscriptionError::PoolUnavailable`] when the
    /// instance cannot be started.
    pub async fn subscribe(&self, task_id: &str, key: &PluginKey) -> ControlResult<Arc<PluginPool>> {
        let pool = match self.pools.get(key) {
            Some(pool) => pool,
            None => {
                let plugin = self
                    .registry
                    .get(key)
                    .ok_or_else(|| CatalogError::PluginNotFound {
                        plugin_type: key.plugin_type,
                        name: key.name.clone(),
                        version: key.version,
                    })?;
                self.pools.get_or_create(&plugin.meta)
            },
        };

        if pool.subscribe(task_id) {
            debug!(task_id, plugin = %key, "Subscribed to pool");
            self.bus.publish(ControlEvent::PluginSubscribed {
                metadata: EventMetadata::new("runner"),
                task_id: task_id.to_string(),
                key: key.clone(),
            });
        }

        self.ensure_running(&pool)
            .await
            .map_err(|e| SubscriptionError::PoolUnavailable {
                task_id: task_id.to_string(),
                key: key.clone(),
                message: e.to_string(),
            })?;
        Ok(pool)
    }

    /// Remove `task_id` from the pool for `key`; returns whether it was
    /// subscribed.
    pub fn unsubscribe(&self, task_id: &str, key: &PluginKey) -> bool {
        let Some(pool) = self.pools.get(key) else {
            return false;
        };
        if !pool.unsubscribe(task_id) {
            return false;
        }
        debug!(task_id, plugin = %key, "Unsubscribed from pool");
        self.bus.publish(ControlEvent::PluginUnsubscribed {
            metadata: EventMetadata::new("runner"),
            task_id: task_id.to_string(),
            key: key.clone(),
        });
        true
    }

    /// Start an instance if the pool needs one.
    ///
    /// Spin-up is serialized per pool and the need is re-checked under the
    /// lock, so concurrent callers never start more than the subscribers
    /// call for.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotLoaded`] when the plugin left the catalog, or any
    /// failure from [`PluginLoader::spawn_instance`].
    pub async fn ensure_running(&self, pool: &PluginPool) -> Result<Option<Arc<AvailablePlugin>>, LoadError> {
        if !pool.needs_instance() {
            return Ok(None);
        }
        let _guard = pool.lock_spin_up().await;
        if !pool.needs_instance() {
            return Ok(None);
        }

        let plugin = self
            .registry
            .get(pool.key())
            .ok_or_else(|| LoadError::NotLoaded {
                key: pool.key().clone(),
            })?;
        let launched = self.loader.spawn_instance(&plugin).await?;
        let instance = pool.insert(launched);
        info!(instance = %instance, "Plugin instance started");
        self.bus.publish(ControlEvent::AvailablePluginStarted {
            metadata: EventMetadata::new("runner"),
            key: pool.key().clone(),
            instance_id: instance.id(),
        });
        Ok(Some(instance))
    }

    /// Stop one instance; returns whether it existed.
    pub async fn kill(&self, key: &PluginKey, instance_id: u32, reason: &str) -> bool {
        let Some(pool) = self.pools.get(key) else {
            return false;
        };
        if pool.kill(instance_id, reason).await.is_none() {
            return false;
        }
        info!(plugin = %key, instance_id, reason, "Plugin instance stopped");
        self.stopped(key, instance_id, reason);
        true
    }

    fn stopped(&self, key: &PluginKey, instance_id: u32, reason: &str) {
        self.bus.publish(ControlEvent::AvailablePluginStopped {
            metadata: EventMetadata::new("runner"),
            key: key.clone(),
            instance_id,
            reason: reason.to_string(),
        });
    }

    /// Replace an instance that failed its health checks.
    ///
    /// The instance is stopped; a new one is started if the pool still has
    /// subscribers and fewer than the allowed restarts.
    pub async fn restart_dead(&self, key: &PluginKey, instance_id: u32, reason: &str) {
        self.kill(key, instance_id, reason).await;
        let Some(pool) = self.pools.get(key) else {
            return;
        };
        if !pool.needs_instance() {
            return;
        }
        if pool.restart_count() >= self.max_restarts {
            warn!(
                plugin = %key,
                restarts = pool.restart_count(),
                "Restart limit reached, not restarting plugin"
            );
            return;
        }
        let restarts = pool.record_restart();
        match self.ensure_running(&pool).await {
            Ok(Some(instance)) => info!(instance = %instance, restarts, "Plugin instance restarted"),
            Ok(None) => {},
            Err(e) => warn!(plugin = %key, error = %e, "Plugin restart failed"),
        }
    }

    /// Stop the least used instance when the pool has more instances than
    /// subscribers.
    pub async fn shrink(&self, key: &PluginKey) -> Option<u32> {
        let pool = self.pools.get(key)?;
        if pool.count() <= pool.subscriber_count() {
            return None;
        }
        let reason = "pool has more instances than subscribers";
        let id = pool.kill_least_used(reason).await?;
        debug!(plugin = %key, instance_id = id, "Pool shrunk");
        self.stopped(key, id, reason);
        Some(id)
    }

    /// Resynchronize every pool after lifecycle events were missed.
    ///
    /// Instances with at least `failure_limit` failed health checks are
    /// restarted as if reported dead, and pools with more instances than
    /// subscribers are shrunk.
    pub async fn reconcile(&self, failure_limit: u32) {
        for pool in self.pools.all() {
            let key = pool.key().clone();
            if failure_limit > 0 {
                for instance in pool.instances() {
                    if instance.failed_health_checks() >= failure_limit {
                        self.restart_dead(&key, instance.id(), "health check failures")
                            .await;
                    }
                }
            }
            while self.shrink(&key).await.is_some() {}
        }
        debug!("Pools reconciled");
    }

    /// Snapshot of every running instance.
    #[must_use]
    pub fn available_plugins(&self) -> Vec<AvailablePluginInfo> {
        self.pools
            .all()
            .iter()
            .flat_map(|pool| pool.snapshot())
            .collect()
    }

    /// Stop every instance of every pool.
    pub async fn stop(&self) {
        let reason = "controller stopping";
        for pool in self.pools.all() {
            for id in pool.kill_all(reason).await {
                self.stopped(pool.key(), id, reason);
            }
        }
    }
}
