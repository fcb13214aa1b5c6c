//! Per-pool cache of collected values.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use plexus_core::{Metric, Namespace};

#[derive(Debug)]
struct Entry {
    metrics: Vec<Metric>,
    expires_at: Instant,
}

/// Recently collected metrics, keyed by namespace and version.
///
/// A zero TTL disables caching.
#[derive(Debug)]
pub struct MetricCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetricCache {
    /// Create a cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Whether the cache stores anything.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cache key: catalog keys joined by `/`, dynamic elements as `*`.
    #[must_use]
    pub fn key(namespace: &Namespace, version: i32) -> String {
        let path: Vec<&str> = namespace
            .elements()
            .iter()
            .map(plexus_core::NamespaceElement::catalog_key)
            .collect();
        format!("/{}:{version}", path.join("/"))
    }

    /// Cached values for `metric`, if fresh.
    pub fn get(&self, metric: &Metric) -> Option<Vec<Metric>> {
        if !self.enabled() {
            return None;
        }
        let key = Self::key(&metric.namespace, metric.version);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let hit = match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.metrics.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            },
            None => None,
        };
        let counter = if hit.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        hit
    }

    /// Store values collected for `requested`.
    pub fn put(&self, requested: &Metric, collected: Vec<Metric>) {
        if !self.enabled() {
            return;
        }
        let key = Self::key(&requested.namespace, requested.version);
        let expires_at = Instant::now()
            .checked_add(self.ttl)
            .unwrap_or_else(Instant::now);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                Entry {
                    metrics: collected,
                    expires_at,
                },
            );
    }

    /// Store collected metrics grouped by their own cache key, so every
    /// value of a dynamic namespace lands in one entry.
    pub fn put_collected(&self, collected: &[Metric]) {
        if !self.enabled() {
            return;
        }
        let mut grouped: HashMap<String, Vec<Metric>> = HashMap::new();
        for metric in collected {
            grouped
                .entry(Self::key(&metric.namespace, metric.version))
                .or_default()
                .push(metric.clone());
        }
        let expires_at = Instant::now()
            .checked_add(self.ttl)
            .unwrap_or_else(Instant::now);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, metrics) in grouped {
            entries.insert(key, Entry { metrics, expires_at });
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Cache hits so far.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
