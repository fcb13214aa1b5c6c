//! Instance selection strategies.

use std::collections::HashMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError};

use plexus_core::{ConfigDataNode, RoutingStrategy};
use rand::seq::SliceRandom;

use crate::plugin::AvailablePlugin;

/// What a call is routed on.
#[derive(Debug, Clone, Copy)]
pub struct Affinity<'a> {
    /// Calling task.
    pub task_id: &'a str,
    /// Fingerprint of the call's config.
    pub config_id: u64,
}

impl<'a> Affinity<'a> {
    /// Affinity for `task_id` calling with `config`.
    #[must_use]
    pub fn new(task_id: &'a str, config: &ConfigDataNode) -> Self {
        Self {
            task_id,
            config_id: config_fingerprint(config),
        }
    }
}

/// Stable fingerprint of a config node.
#[must_use]
pub fn config_fingerprint(config: &ConfigDataNode) -> u64 {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(config)
        .unwrap_or_default()
        .hash(&mut hasher);
    hasher.finish()
}

/// Picks one running instance for a call.
pub trait SelectionStrategy: Send + Sync + fmt::Debug {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Choose among `candidates`, which are ordered by instance id.
    fn select(
        &self,
        candidates: &[Arc<AvailablePlugin>],
        affinity: &Affinity<'_>,
    ) -> Option<Arc<AvailablePlugin>>;

    /// Forget an instance that left the pool.
    fn remove(&self, _instance_id: u32) {}
}

/// Strategy object for a plugin's declared routing strategy.
#[must_use]
pub fn strategy_for(strategy: RoutingStrategy) -> Box<dyn SelectionStrategy> {
    match strategy {
        RoutingStrategy::LowestHit => Box::new(LowestHit),
        RoutingStrategy::LeastRecentlyUsed => Box::new(LeastRecentlyUsed),
        RoutingStrategy::Sticky => Box::new(Sticky::default()),
        RoutingStrategy::ConfigBased => Box::new(ConfigBased::default()),
    }
}

/// Fewest hits wins; ties are broken at random.
#[derive(Debug, Clone, Copy, Default)]
pub struct LowestHit;

impl SelectionStrategy for LowestHit {
    fn name(&self) -> &'static str {
        "lowest-hit"
    }

    fn select(
        &self,
        candidates: &[Arc<AvailablePlugin>],
        _affinity: &Affinity<'_>,
    ) -> Option<Arc<AvailablePlugin>> {
        let lowest = candidates.iter().map(|c| c.hits()).min()?;
        let tied: Vec<&Arc<AvailablePlugin>> =
            candidates.iter().filter(|c| c.hits() == lowest).collect();
        tied.choose(&mut rand::thread_rng()).map(|c| Arc::clone(c))
    }
}

/// The instance idle the longest wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastRecentlyUsed;

impl SelectionStrategy for LeastRecentlyUsed {
    fn name(&self) -> &'static str {
        "least-recently-used"
    }

    fn select(
        &self,
        candidates: &[Arc<AvailablePlugin>],
        _affinity: &Affinity<'_>,
    ) -> Option<Arc<AvailablePlugin>> {
        // `None` sorts before any timestamp, so unused instances go first.
        candidates
            .iter()
            .min_by_key(|c| (c.last_hit(), c.id()))
            .cloned()
    }
}

/// Remembers an instance per routing key and falls back to lowest-hit.
#[derive(Debug, Default)]
struct Assignments<K> {
    by_key: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> Assignments<K> {
    fn select(
        &self,
        key: &K,
        candidates: &[Arc<AvailablePlugin>],
        affinity: &Affinity<'_>,
    ) -> Option<Arc<AvailablePlugin>> {
        let mut by_key = self.by_key.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = by_key.get(key)
            && let Some(assigned) = candidates.iter().find(|c| c.id() == *id)
        {
            return Some(Arc::clone(assigned));
        }
        let chosen = LowestHit.select(candidates, affinity)?;
        by_key.insert(key.clone(), chosen.id());
        Some(chosen)
    }

    fn remove(&self, instance_id: u32) {
        self.by_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, id| *id != instance_id);
    }
}

/// Each task keeps using the instance it was first routed to.
#[derive(Debug, Default)]
pub struct Sticky {
    assignments: Assignments<String>,
}

impl SelectionStrategy for Sticky {
    fn name(&self) -> &'static str {
        "sticky"
    }

    fn select(
        &self,
        candidates: &[Arc<AvailablePlugin>],
        affinity: &Affinity<'_>,
    ) -> Option<Arc<AvailablePlugin>> {
        self.assignments
            .select(&affinity.task_id.to_string(), candidates, affinity)
    }

    fn remove(&self, instance_id: u32) {
        self.assignments.remove(instance_id);
    }
}

/// Calls with the same config keep using the same instance.
#[derive(Debug, Default)]
pub struct ConfigBased {
    assignments: Assignments<u64>,
}

impl SelectionStrategy for ConfigBased {
    fn name(&self) -> &'static str {
        "config-based"
    }

    fn select(
        &self,
        candidates: &[Arc<AvailablePlugin>],
        affinity: &Affinity<'_>,
    ) -> Option<Arc<AvailablePlugin>> {
        self.assignments
            .select(&affinity.config_id, candidates, affinity)
    }

    fn remove(&self, instance_id: u32) {
        self.assignments.remove(instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPlugin;

    fn instances(n: u32) -> Vec<Arc<AvailablePlugin>> {
        let mock = MockPlugin::collector("mock", 1);
        (1..=n)
            .map(|id| Arc::new(AvailablePlugin::new(id, mock.launched())))
            .collect()
    }

    fn affinity(task: &str) -> Affinity<'_> {
        Affinity::new(task, &ConfigDataNode::new())
    }

    #[test]
    fn test_lowest_hit_prefers_idle() {
        let pool = instances(3);
        pool[0].record_hit();
        pool[2].record_hit();
        let chosen = LowestHit.select(&pool, &affinity("t")).unwrap();
        assert_eq!(chosen.id(), 2);
        assert!(LowestHit.select(&[], &affinity("t")).is_none());
    }

    #[test]
    fn test_least_recently_used() {
        let pool = instances(2);
        pool[1].record_hit();
        std::thread::sleep(std::time::Duration::from_millis(2));
        pool[0].record_hit();
        let chosen = LeastRecentlyUsed.select(&pool, &affinity("t")).unwrap();
        assert_eq!(chosen.id(), 2);
    }

    #[test]
    fn test_sticky_keeps_task_on_instance() {
        let pool = instances(3);
        let sticky = Sticky::default();
        let first = sticky.select(&pool, &affinity("task-a")).unwrap();
        for p in &pool {
            if p.id() != first.id() {
                p.record_hit();
            }
        }
        first.record_hit();
        first.record_hit();
        for _ in 0..5 {
            assert_eq!(sticky.select(&pool, &affinity("task-a")).unwrap().id(), first.id());
        }

        sticky.remove(first.id());
        let remaining: Vec<_> = pool.iter().filter(|p| p.id() != first.id()).cloned().collect();
        let moved = sticky.select(&remaining, &affinity("task-a")).unwrap();
        assert_ne!(moved.id(), first.id());
    }

    #[test]
    fn test_config_based_routes_by_config() {
        let pool = instances(2);
        let strategy = ConfigBased::default();
        let config = ConfigDataNode::new().with("user", "root");
        let a = Affinity::new("t1", &config);
        let b = Affinity::new("t2", &config);
        let first = strategy.select(&pool, &a).unwrap();
        first.record_hit();
        assert_eq!(strategy.select(&pool, &b).unwrap().id(), first.id());
        assert_eq!(a.config_id, config_fingerprint(&config));
        assert_ne!(a.config_id, config_fingerprint(&ConfigDataNode::new()));
    }

    #[test]
    fn test_strategy_for() {
        assert_eq!(strategy_for(RoutingStrategy::LowestHit).name(), "lowest-hit");
        assert_eq!(strategy_for(RoutingStrategy::Sticky).name(), "sticky");
        assert_eq!(
            strategy_for(RoutingStrategy::ConfigBased).name(),
            "config-based"
        );
    }
}
