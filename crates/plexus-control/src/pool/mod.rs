//! Plugin pools: the running instances of one loaded plugin.
//!
//! A pool exists per plugin key once anything subscribes to it. It tracks
//! which tasks depend on it and becomes eligible for spin-up whenever it
//! has subscribers but no running instance.

mod cache;
mod strategy;
mod table;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use plexus_core::{PluginKey, PluginMeta};

pub use cache::MetricCache;
pub use strategy::{
    Affinity, ConfigBased, LeastRecentlyUsed, LowestHit, SelectionStrategy, Sticky,
    config_fingerprint, strategy_for,
};
pub use table::{PoolInfo, PoolTable};

use crate::plugin::{AvailablePlugin, AvailablePluginInfo, LaunchedPlugin};

#[derive(Debug)]
struct PoolInner {
    instances: BTreeMap<u32, Arc<AvailablePlugin>>,
    subscribers: BTreeSet<String>,
    next_id: u32,
    restart_count: u32,
}

/// Running instances and subscribers of one plugin key.
#[derive(Debug)]
pub struct PluginPool {
    key: PluginKey,
    meta: PluginMeta,
    max_instances: usize,
    inner: Mutex<PoolInner>,
    spin_up: tokio::sync::Mutex<()>,
    strategy: Box<dyn SelectionStrategy>,
    cache: MetricCache,
}

impl PluginPool {
    /// Create an empty pool.
    ///
    /// `max_running` caps non-exclusive plugins; the cache lives for the
    /// longer of `cache_expiration` and the plugin's own TTL.
    #[must_use]
    pub fn new(meta: PluginMeta, max_running: usize, cache_expiration: Duration) -> Self {
        let max_instances = if meta.exclusive { 1 } else { max_running.max(1) };
        let ttl = cache_expiration.max(Duration::from_millis(meta.cache_ttl_ms));
        Self {
            key: meta.key(),
            strategy: strategy_for(meta.routing_strategy),
            meta,
            max_instances,
            inner: Mutex::new(PoolInner {
                instances: BTreeMap::new(),
                subscribers: BTreeSet::new(),
                next_id: 1,
                restart_count: 0,
            }),
            spin_up: tokio::sync::Mutex::new(()),
            cache: MetricCache::new(ttl),
        }
    }

    fn inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool key.
    #[must_use]
    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    /// Metadata of the plugin the pool runs.
    #[must_use]
    pub fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    /// Instance cap.
    #[must_use]
    pub fn max_instances(&self) -> usize {
        self.max_instances
    }

    /// Metric cache.
    #[must_use]
    pub fn cache(&self) -> &MetricCache {
        &self.cache
    }

    /// Add a subscriber; returns whether it was new.
    pub fn subscribe(&self, task_id: &str) -> bool {
        self.inner().subscribers.insert(task_id.to_string())
    }

    /// Remove a subscriber; returns whether it was present.
    pub fn unsubscribe(&self, task_id: &str) -> bool {
        self.inner().subscribers.remove(task_id)
    }

    /// Whether `task_id` is subscribed.
    #[must_use]
    pub fn is_subscribed(&self, task_id: &str) -> bool {
        self.inner().subscribers.contains(task_id)
    }

    /// Subscribing tasks.
    #[must_use]
    pub fn subscribers(&self) -> Vec<String> {
        self.inner().subscribers.iter().cloned().collect()
    }

    /// Number of subscribing tasks.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner().subscribers.len()
    }

    /// Number of running instances.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner().instances.len()
    }

    /// Whether the pool needs an instance.
    #[must_use]
    pub fn eligible(&self) -> bool {
        let inner = self.inner();
        !inner.subscribers.is_empty() && inner.instances.is_empty()
    }

    /// Whether another instance should be started.
    ///
    /// True when the pool has subscribers and no instance, or when the
    /// subscribers outnumber what the running instances take at the
    /// plugin's concurrency count. Never true at [`Self::max_instances`].
    #[must_use]
    pub fn needs_instance(&self) -> bool {
        let inner = self.inner();
        let running = inner.instances.len();
        if inner.subscribers.is_empty() || running >= self.max_instances {
            return false;
        }
        let capacity = self.meta.concurrency_count.max(1).saturating_mul(running);
        inner.subscribers.len() > capacity
    }

    /// Serializes spin-up; hold it across the eligibility re-check and launch.
    pub async fn lock_spin_up(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.spin_up.lock().await
    }

    /// Add a launched plugin as a new instance.
    pub fn insert(&self, launched: LaunchedPlugin) -> Arc<AvailablePlugin> {
        let mut inner = self.inner();
        let id = inner.next_id;
        inner.next_id = inner.next_id.saturating_add(1);
        let instance = Arc::new(AvailablePlugin::new(id, launched));
        inner.instances.insert(id, Arc::clone(&instance));
        instance
    }

    /// Instance by id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<AvailablePlugin>> {
        self.inner().instances.get(&id).cloned()
    }

    /// Running instances in id order.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<AvailablePlugin>> {
        self.inner().instances.values().cloned().collect()
    }

    /// Pick an instance for a call.
    #[must_use]
    pub fn select(&self, affinity: &Affinity<'_>) -> Option<Arc<AvailablePlugin>> {
        let candidates = self.instances();
        self.strategy.select(&candidates, affinity)
    }

    /// Remove instance `id` from the pool and stop it.
    pub async fn kill(&self, id: u32, reason: &str) -> Option<Arc<AvailablePlugin>> {
        let removed = self.inner().instances.remove(&id)?;
        self.strategy.remove(id);
        removed.kill(reason).await;
        Some(removed)
    }

    /// Stop every instance; returns the ids stopped.
    pub async fn kill_all(&self, reason: &str) -> Vec<u32> {
        let removed: Vec<Arc<AvailablePlugin>> = {
            let mut inner = self.inner();
            std::mem::take(&mut inner.instances).into_values().collect()
        };
        let mut ids = Vec::with_capacity(removed.len());
        for instance in removed {
            self.strategy.remove(instance.id());
            instance.kill(reason).await;
            ids.push(instance.id());
        }
        self.cache.clear();
        ids
    }

    /// Stop the instance with the fewest hits; returns its id.
    pub async fn kill_least_used(&self, reason: &str) -> Option<u32> {
        let id = self
            .inner()
            .instances
            .values()
            .min_by_key(|i| (i.hits(), i.id()))
            .map(|i| i.id())?;
        self.kill(id, reason).await.map(|i| i.id())
    }

    /// Restarts performed after instance deaths.
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.inner().restart_count
    }

    /// Count a restart; returns the new total.
    pub fn record_restart(&self) -> u32 {
        let mut inner = self.inner();
        inner.restart_count = inner.restart_count.saturating_add(1);
        inner.restart_count
    }

    /// Instance snapshots.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AvailablePluginInfo> {
        self.instances().iter().map(|i| i.info()).collect()
    }
}

#[cfg(test)]
mod tests {
    use plexus_core::PluginType;

    use super::*;
    use crate::testing::MockPlugin;

    fn pool(meta: PluginMeta) -> PluginPool {
        PluginPool::new(meta, 3, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_eligibility() {
        let mock = MockPlugin::collector("mock", 1);
        let pool = pool(mock.meta().clone());
        assert!(!pool.eligible());

        assert!(pool.subscribe("t1"));
        assert!(!pool.subscribe("t1"));
        assert!(pool.is_subscribed("t1"));
        assert_eq!(pool.subscriber_count(), 1);
        assert!(pool.eligible());

        pool.insert(mock.launched());
        assert!(!pool.eligible());
        assert_eq!(pool.subscriber_count(), 1);

        let ids = pool.kill_all("test").await;
        assert_eq!(ids, vec![1]);
        assert!(pool.eligible());

        assert!(pool.unsubscribe("t1"));
        assert!(!pool.unsubscribe("t1"));
        assert!(!pool.eligible());
    }

    #[tokio::test]
    async fn test_needs_instance_grows_with_subscribers() {
        let mock = MockPlugin::new(
            PluginMeta::new(PluginType::Collector, "mock", 1).with_concurrency_count(2),
        );
        let pool = pool(mock.meta().clone());
        assert!(!pool.needs_instance());

        pool.subscribe("t1");
        assert!(pool.needs_instance());
        pool.insert(mock.launched());
        pool.subscribe("t2");
        assert!(!pool.needs_instance());
        pool.subscribe("t3");
        assert!(pool.needs_instance());
        pool.insert(mock.launched());
        assert!(!pool.needs_instance());

        for task in ["t4", "t5", "t6", "t7"] {
            pool.subscribe(task);
        }
        assert!(pool.needs_instance());
        pool.insert(mock.launched());
        // Capped at max_running.
        pool.subscribe("t8");
        assert_eq!(pool.count(), pool.max_instances());
        assert!(!pool.needs_instance());
    }

    #[tokio::test]
    async fn test_exclusive_pool_never_grows() {
        let mock = MockPlugin::new(
            PluginMeta::new(PluginType::Collector, "mock", 1)
                .with_exclusive(true)
                .with_concurrency_count(1),
        );
        let pool = pool(mock.meta().clone());
        pool.subscribe("t1");
        pool.subscribe("t2");
        assert!(pool.needs_instance());
        pool.insert(mock.launched());
        assert!(!pool.needs_instance());
    }

    #[tokio::test]
    async fn test_ids_are_never_reused() {
        let mock = MockPlugin::collector("mock", 1);
        let pool = pool(mock.meta().clone());
        let a = pool.insert(mock.launched());
        let b = pool.insert(mock.launched());
        assert_eq!((a.id(), b.id()), (1, 2));
        pool.kill(1, "test").await.unwrap();
        let c = pool.insert(mock.launched());
        assert_eq!(c.id(), 3);
        assert_eq!(
            pool.instances().iter().map(|i| i.id()).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(mock.kills(), 1);
    }

    #[tokio::test]
    async fn test_kill_least_used() {
        let mock = MockPlugin::collector("mock", 1);
        let pool = pool(mock.meta().clone());
        let a = pool.insert(mock.launched());
        pool.insert(mock.launched());
        a.record_hit();
        assert_eq!(pool.kill_least_used("shrink").await, Some(2));
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn test_limits_from_meta() {
        let exclusive = PluginMeta::new(PluginType::Collector, "x", 1)
            .with_exclusive(true)
            .with_cache_ttl_ms(2000);
        let pool = pool(exclusive);
        assert_eq!(pool.max_instances(), 1);
        assert_eq!(pool.cache().ttl(), Duration::from_secs(2));

        let shared = PluginPool::new(
            PluginMeta::new(PluginType::Collector, "y", 1),
            4,
            Duration::from_millis(500),
        );
        assert_eq!(shared.max_instances(), 4);
        assert_eq!(shared.cache().ttl(), Duration::from_millis(500));
    }
}
