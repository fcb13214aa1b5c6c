//! Every pool, by plugin key.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use plexus_core::{PluginKey, PluginMeta};
use serde::Serialize;

use super::PluginPool;
use crate::plugin::AvailablePluginInfo;

/// Pool snapshot for the management surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolInfo {
    /// Pool key.
    pub key: PluginKey,
    /// Subscribing tasks.
    pub subscribers: Vec<String>,
    /// Restarts after instance deaths.
    pub restart_count: u32,
    /// Running instances.
    pub instances: Vec<AvailablePluginInfo>,
}

/// Pools are created on first subscription and kept thereafter.
#[derive(Debug)]
pub struct PoolTable {
    pools: DashMap<PluginKey, Arc<PluginPool>>,
    max_running: usize,
    cache_expiration: Duration,
}

impl PoolTable {
    /// Create an empty table whose pools use the given limits.
    #[must_use]
    pub fn new(max_running: usize, cache_expiration: Duration) -> Self {
        Self {
            pools: DashMap::new(),
            max_running,
            cache_expiration,
        }
    }

    /// Pool for `key`, if one exists.
    #[must_use]
    pub fn get(&self, key: &PluginKey) -> Option<Arc<PluginPool>> {
        self.pools.get(key).map(|p| Arc::clone(p.value()))
    }

    /// Pool for `meta`'s key, created if missing.
    pub fn get_or_create(&self, meta: &PluginMeta) -> Arc<PluginPool> {
        let entry = self.pools.entry(meta.key()).or_insert_with(|| {
            Arc::new(PluginPool::new(
                meta.clone(),
                self.max_running,
                self.cache_expiration,
            ))
        });
        Arc::clone(entry.value())
    }

    /// Every pool, ordered by key.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<PluginPool>> {
        let mut pools: Vec<Arc<PluginPool>> =
            self.pools.iter().map(|p| Arc::clone(p.value())).collect();
        pools.sort_by(|a, b| a.key().cmp(b.key()));
        pools
    }

    /// Snapshot of every pool.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PoolInfo> {
        self.all()
            .iter()
            .map(|pool| PoolInfo {
                key: pool.key().clone(),
                subscribers: pool.subscribers(),
                restart_count: pool.restart_count(),
                instances: pool.snapshot(),
            })
            .collect()
    }

    /// Number of pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Whether no pool exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
