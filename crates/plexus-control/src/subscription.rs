//! Per-task subscription groups.
//!
//! A group turns a task's requested metrics and plugins into a concrete
//! set of plugin keys, subscribes the task to their pools, and re-resolves
//! whenever the catalog changes. Only the group's own serialized
//! [`SubscriptionGroups::process`] step ever replaces its resolution.
//!
//! Pools a task reaches outside its resolution, such as a processor named
//! only at call time, are recorded on the group as extra subscriptions so
//! that removing the group releases them too.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use plexus_config::ControlConfig;
use plexus_core::{
    ConfigDataNode, ConfigDataTree, PluginKey, PluginType, PolicyError, RequestedMetric,
    SubscribedPlugin,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogedMetric, MetricCatalog};
use crate::error::{CatalogError, ControlError, ControlErrors, ControlResult, SubscriptionError};
use crate::plugin::PluginRegistry;
use crate::pool::PluginPool;
use crate::runner::Runner;

/// What a task asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Requested metrics, possibly with wildcards.
    #[serde(default)]
    pub requested: Vec<RequestedMetric>,
    /// Explicit processors and publishers.
    #[serde(default)]
    pub plugins: Vec<SubscribedPlugin>,
    /// Task config by namespace.
    #[serde(default)]
    pub config: ConfigDataTree,
}

impl SubscriptionRequest {
    /// A request for `requested` metrics and nothing else.
    #[must_use]
    pub fn metrics(requested: Vec<RequestedMetric>) -> Self {
        Self {
            requested,
            ..Self::default()
        }
    }

    /// Add an explicit plugin.
    #[must_use]
    pub fn with_plugin(mut self, plugin: SubscribedPlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Set the task config tree.
    #[must_use]
    pub fn with_config(mut self, config: ConfigDataTree) -> Self {
        self.config = config;
        self
    }
}

/// Outcome of resolving a [`SubscriptionRequest`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Resolved metrics with their final config, by owning collector.
    pub metrics: BTreeMap<PluginKey, Vec<CatalogedMetric>>,
    /// Every plugin the task depends on, with concrete versions.
    pub plugins: Vec<SubscribedPlugin>,
    /// Failures met while resolving or subscribing.
    pub errors: ControlErrors,
}

impl Resolution {
    /// Number of resolved metrics.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.values().map(Vec::len).sum()
    }

    /// Keys of every plugin the task depends on.
    #[must_use]
    pub fn plugin_keys(&self) -> Vec<PluginKey> {
        self.plugins.iter().map(SubscribedPlugin::key).collect()
    }
}

/// Split `new` against `old` into (adds, removes) by plugin key.
///
/// Multiset difference: a key present twice in `new` and once in `old`
/// is added once.
#[must_use]
pub fn compare_plugins(
    new: &[SubscribedPlugin],
    old: &[SubscribedPlugin],
) -> (Vec<SubscribedPlugin>, Vec<SubscribedPlugin>) {
    let mut remaining: BTreeMap<PluginKey, usize> = BTreeMap::new();
    for plugin in old {
        let count = remaining.entry(plugin.key()).or_default();
        *count = count.saturating_add(1);
    }

    let mut adds = Vec::new();
    for plugin in new {
        match remaining.get_mut(&plugin.key()) {
            Some(count) if *count > 0 => *count = count.saturating_sub(1),
            _ => adds.push(plugin.clone()),
        }
    }

    let mut removes = Vec::new();
    for plugin in old {
        if let Some(count) = remaining.get_mut(&plugin.key())
            && *count > 0
        {
            *count = count.saturating_sub(1);
            removes.push(plugin.clone());
        }
    }
    (adds, removes)
}

fn policy_errors(
    namespace: String,
    plugin: &PluginKey,
    errors: Vec<PolicyError>,
) -> impl Iterator<Item = ControlError> {
    let plugin = plugin.clone();
    errors.into_iter().map(move |source| ControlError::Policy {
        namespace: namespace.clone(),
        plugin: plugin.clone(),
        source,
    })
}

/// Resolves requests against the catalog without side effects.
#[derive(Debug)]
struct Resolver<'a> {
    catalog: &'a MetricCatalog,
    registry: &'a PluginRegistry,
    config: &'a ControlConfig,
}

impl Resolver<'_> {
    fn layered(&self, key: &PluginKey) -> ConfigDataNode {
        self.config
            .plugins
            .get(key.plugin_type, &key.name, key.version)
    }

    fn resolve(&self, request: &SubscriptionRequest) -> Resolution {
        let mut resolution = Resolution::default();

        for requested in &request.requested {
            let found = match self
                .catalog
                .get_metrics(&requested.namespace, requested.version)
            {
                Ok(found) => found,
                Err(e) => {
                    resolution.errors.push(e);
                    continue;
                },
            };
            for mut metric in found {
                let mut config = self.layered(&metric.plugin);
                if let Some(task) = request.config.get(&metric.namespace.strings()) {
                    config.merge(&task);
                }
                match metric.policy.process(&config) {
                    Ok(config) => metric.config = config,
                    Err(errors) => {
                        resolution.errors.extend(policy_errors(
                            metric.namespace.to_string(),
                            &metric.plugin,
                            errors,
                        ));
                        continue;
                    },
                }
                let entries = resolution.metrics.entry(metric.plugin.clone()).or_default();
                if !entries
                    .iter()
                    .any(|m| m.namespace == metric.namespace && m.version == metric.version)
                {
                    entries.push(metric);
                }
            }
        }

        let mut seen = BTreeSet::new();
        for key in resolution.metrics.keys() {
            if seen.insert(key.clone()) {
                resolution
                    .plugins
                    .push(SubscribedPlugin::from(key).with_config(self.layered(key)));
            }
        }

        for requested in &request.plugins {
            let Some(loaded) =
                self.registry
                    .resolve(requested.plugin_type, &requested.name, requested.version)
            else {
                resolution.errors.push(CatalogError::PluginNotFound {
                    plugin_type: requested.plugin_type,
                    name: requested.name.clone(),
                    version: requested.version,
                });
                continue;
            };
            let key = loaded.key();
            let mut config = self.layered(&key);
            config.merge(&requested.config);
            match loaded.policy.root().process(&config) {
                Ok(config) => {
                    if seen.insert(key.clone()) {
                        resolution
                            .plugins
                            .push(SubscribedPlugin::from(&key).with_config(config));
                    }
                },
                Err(errors) => resolution
                    .errors
                    .extend(policy_errors(String::new(), &key, errors)),
            }
        }
        resolution
    }
}

#[derive(Debug, Default)]
struct GroupState {
    /// Set once the first resolution succeeded.
    ready: bool,
    /// Set when the group is released; no further subscriptions.
    closed: bool,
    /// Subscribed pools not in the resolution.
    extras: BTreeSet<PluginKey>,
}

/// One task's subscription state.
#[derive(Debug)]
pub struct SubscriptionGroup {
    task_id: String,
    request: SubscriptionRequest,
    process_lock: tokio::sync::Mutex<()>,
    resolution: RwLock<Arc<Resolution>>,
    state: Mutex<GroupState>,
}

impl SubscriptionGroup {
    fn new(task_id: String, request: SubscriptionRequest) -> Self {
        Self {
            task_id,
            request,
            process_lock: tokio::sync::Mutex::new(()),
            resolution: RwLock::new(Arc::new(Resolution::default())),
            state: Mutex::new(GroupState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_ready(&self) -> bool {
        let state = self.state();
        state.ready && !state.closed
    }

    /// Pools held beyond the resolution, sorted.
    #[must_use]
    pub fn extra_subscriptions(&self) -> Vec<PluginKey> {
        self.state().extras.iter().cloned().collect()
    }

    /// Owning task.
    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The task's request.
    #[must_use]
    pub fn request(&self) -> &SubscriptionRequest {
        &self.request
    }

    /// Current resolution.
    #[must_use]
    pub fn resolution(&self) -> Arc<Resolution> {
        Arc::clone(&self.resolution.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn store(&self, resolution: Arc<Resolution>) {
        *self
            .resolution
            .write()
            .unwrap_or_else(PoisonError::into_inner) = resolution;
    }
}

/// Every task's subscription group.
#[derive(Debug)]
pub struct SubscriptionGroups {
    groups: DashMap<String, Arc<SubscriptionGroup>>,
    catalog: Arc<MetricCatalog>,
    registry: Arc<PluginRegistry>,
    runner: Arc<Runner>,
    config: Arc<ControlConfig>,
}

impl SubscriptionGroups {
    /// Create an empty group table.
    #[must_use]
    pub fn new(
        catalog: Arc<MetricCatalog>,
        registry: Arc<PluginRegistry>,
        runner: Arc<Runner>,
        config: Arc<ControlConfig>,
    ) -> Self {
        Self {
            groups: DashMap::new(),
            catalog,
            registry,
            runner,
            config,
        }
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            catalog: &self.catalog,
            registry: &self.registry,
            config: &self.config,
        }
    }

    /// Create and resolve a group for `task_id`.
    ///
    /// A group whose first resolution fails is not kept, and any pool it
    /// subscribed to is released.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::GroupExists`], or every resolution and
    /// subscription failure.
    pub async fn add(
        &self,
        task_id: &str,
        request: SubscriptionRequest,
    ) -> Result<Arc<Resolution>, ControlErrors> {
        let group = match self.groups.entry(task_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(ControlError::from(SubscriptionError::GroupExists {
                    task_id: task_id.to_string(),
                })
                .into());
            },
            Entry::Vacant(slot) => {
                let group = Arc::new(SubscriptionGroup::new(task_id.to_string(), request));
                slot.insert(Arc::clone(&group));
                group
            },
        };

        let resolution = self.process_group(&group).await;
        if resolution.errors.is_empty() {
            group.state().ready = true;
            info!(
                task_id,
                metrics = resolution.metric_count(),
                plugins = resolution.plugins.len(),
                "Subscription group created"
            );
            return Ok(resolution);
        }

        self.release(&group).await;
        self.groups
            .remove_if(task_id, |_, current| Arc::ptr_eq(current, &group));
        warn!(task_id, errors = resolution.errors.len(), "Subscription group rejected");
        Err(resolution.errors.clone())
    }

    /// Unsubscribe every plugin of the group and delete it.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::GroupNotFound`] for an unknown task.
    pub async fn remove(&self, task_id: &str) -> Result<(), SubscriptionError> {
        let (_, group) = self
            .groups
            .remove_if(task_id, |_, group| group.is_ready())
            .ok_or_else(|| SubscriptionError::GroupNotFound {
                task_id: task_id.to_string(),
            })?;
        self.release(&group).await;
        info!(task_id, "Subscription group removed");
        Ok(())
    }

    /// Close `group` and drop every pool subscription it holds.
    async fn release(&self, group: &SubscriptionGroup) {
        let _guard = group.process_lock.lock().await;
        let extras = {
            let mut state = group.state();
            state.closed = true;
            std::mem::take(&mut state.extras)
        };
        let mut keys: BTreeSet<PluginKey> = group.resolution().plugin_keys().into_iter().collect();
        keys.extend(extras);
        for key in &keys {
            self.runner.unsubscribe(&group.task_id, key);
        }
        group.store(Arc::new(Resolution::default()));
    }

    /// Make sure `task_id` is subscribed to the pool for `key` and that the
    /// pool has an instance.
    ///
    /// A key outside the group's resolution is recorded as an extra
    /// subscription and released with the group.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::GroupNotFound`] for an unknown or removed task,
    /// or any failure from [`Runner::subscribe`].
    pub async fn ensure_subscribed(
        &self,
        task_id: &str,
        key: &PluginKey,
    ) -> ControlResult<Arc<PluginPool>> {
        let not_found = || SubscriptionError::GroupNotFound {
            task_id: task_id.to_string(),
        };
        let group = self.get(task_id).ok_or_else(not_found)?;
        if let Some(pool) = self.runner.pools().get(key)
            && pool.is_subscribed(task_id)
            && pool.count() > 0
        {
            return Ok(pool);
        }

        let _guard = group.process_lock.lock().await;
        let resolved = group.resolution().plugin_keys().contains(key);
        {
            let mut state = group.state();
            if state.closed {
                return Err(not_found().into());
            }
            if !resolved && state.extras.insert(key.clone()) {
                debug!(task_id, plugin = %key, "Tracking subscription outside the resolution");
            }
        }
        self.runner.subscribe(task_id, key).await
    }

    /// Re-resolve one group.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::GroupNotFound`] for an unknown task.
    pub async fn process(&self, task_id: &str) -> Result<Arc<Resolution>, SubscriptionError> {
        let group = self.get(task_id).ok_or_else(|| SubscriptionError::GroupNotFound {
            task_id: task_id.to_string(),
        })?;
        Ok(self.process_group(&group).await)
    }

    /// Re-resolve every group, one at a time. Returns the errors of each
    /// group that has any.
    pub async fn process_all(&self) -> BTreeMap<String, ControlErrors> {
        let mut groups: Vec<Arc<SubscriptionGroup>> = self
            .groups
            .iter()
            .filter(|g| !g.state().closed)
            .map(|g| Arc::clone(g.value()))
            .collect();
        groups.sort_by(|a, b| a.task_id.cmp(&b.task_id));

        let mut failed = BTreeMap::new();
        for group in groups {
            let resolution = self.process_group(&group).await;
            if !resolution.errors.is_empty() {
                warn!(
                    task_id = %group.task_id,
                    errors = %resolution.errors,
                    "Subscription group has unresolved dependencies"
                );
                failed.insert(group.task_id.clone(), resolution.errors.clone());
            }
        }
        failed
    }

    async fn process_group(&self, group: &SubscriptionGroup) -> Arc<Resolution> {
        let _guard = group.process_lock.lock().await;
        if group.state().closed {
            return group.resolution();
        }
        let mut resolution = self.resolver().resolve(&group.request);
        let previous = group.resolution();
        let (adds, removes) = compare_plugins(&resolution.plugins, &previous.plugins);

        // Keys now covered by the resolution stop being extras; removed
        // keys that are still extras stay subscribed.
        let extras = {
            let mut state = group.state();
            let resolved = resolution.plugin_keys();
            state.extras.retain(|key| !resolved.contains(key));
            state.extras.clone()
        };
        for plugin in &adds {
            if let Err(e) = self.runner.subscribe(&group.task_id, &plugin.key()).await {
                resolution.errors.push(e);
            }
        }
        for plugin in removes.iter().filter(|p| !extras.contains(&p.key())) {
            self.runner.unsubscribe(&group.task_id, &plugin.key());
        }
        debug!(
            task_id = %group.task_id,
            added = adds.len(),
            removed = removes.len(),
            errors = resolution.errors.len(),
            "Subscription group processed"
        );

        let resolution = Arc::new(resolution);
        group.store(Arc::clone(&resolution));
        resolution
    }

    /// Group for `task_id`. A group still being created is not visible.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<Arc<SubscriptionGroup>> {
        self.groups
            .get(task_id)
            .filter(|g| g.is_ready())
            .map(|g| Arc::clone(g.value()))
    }

    /// Current resolution of `task_id`.
    #[must_use]
    pub fn resolution(&self, task_id: &str) -> Option<Arc<Resolution>> {
        self.get(task_id).map(|g| g.resolution())
    }

    /// Every task id, sorted.
    #[must_use]
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.is_ready())
            .map(|g| g.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Dry-run resolution of `request` with no subscriptions.
    ///
    /// Collectors are also checked against their plugin-level policy.
    #[must_use]
    pub fn validate_deps(&self, request: &SubscriptionRequest) -> ControlErrors {
        let resolver = self.resolver();
        let mut resolution = resolver.resolve(request);
        for key in resolution.metrics.keys() {
            let Some(loaded) = self.registry.get(key) else {
                continue;
            };
            if let Err(errors) = loaded.policy.root().process(&resolver.layered(key)) {
                resolution
                    .errors
                    .extend(policy_errors(String::new(), key, errors));
            }
        }
        resolution.errors
    }

    /// Tasks that would lose a dependency with no replacement if `key`
    /// were unloaded, sorted.
    #[must_use]
    pub fn unload_impact(&self, key: &PluginKey) -> Vec<String> {
        let mut affected: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.is_ready() && self.depends_only_on(g.request(), key))
            .map(|g| g.key().clone())
            .collect();
        affected.sort();
        affected
    }

    fn depends_only_on(&self, request: &SubscriptionRequest, key: &PluginKey) -> bool {
        let metrics_orphaned = key.plugin_type == PluginType::Collector
            && request.requested.iter().any(|requested| {
                let Ok(candidates) = self.catalog.get_versions(&requested.namespace) else {
                    return false;
                };
                let mut providers: BTreeMap<String, BTreeSet<PluginKey>> = BTreeMap::new();
                for metric in candidates {
                    if requested.version < 1 || metric.version == requested.version {
                        providers
                            .entry(metric.namespace.to_string())
                            .or_default()
                            .insert(metric.plugin);
                    }
                }
                providers
                    .values()
                    .any(|owners| owners.len() == 1 && owners.contains(key))
            });

        metrics_orphaned
            || request.plugins.iter().any(|plugin| {
                if plugin.plugin_type != key.plugin_type || plugin.name != key.name {
                    return false;
                }
                if plugin.version >= 1 {
                    return plugin.version == key.version;
                }
                let versions = self.registry.versions(key.plugin_type, &key.name);
                versions.len() == 1 && versions.contains(&key.version)
            })
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.iter().filter(|g| g.is_ready()).count()
    }

    /// Whether there are no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugins(keys: &[&str]) -> Vec<SubscribedPlugin> {
        keys.iter()
            .map(|k| SubscribedPlugin::from(&k.parse::<PluginKey>().unwrap()))
            .collect()
    }

    fn keys(plugins: &[SubscribedPlugin]) -> Vec<String> {
        plugins.iter().map(|p| p.key().to_string()).collect()
    }

    #[test]
    fn test_compare_plugins_diff() {
        let new = plugins(&["collector:a:1", "collector:b:1", "publisher:c:1"]);
        let old = plugins(&["collector:a:1", "processor:d:1"]);
        let (adds, removes) = compare_plugins(&new, &old);
        assert_eq!(keys(&adds), vec!["collector:b:1", "publisher:c:1"]);
        assert_eq!(keys(&removes), vec!["processor:d:1"]);
    }

    #[test]
    fn test_compare_plugins_multiset() {
        let new = plugins(&["collector:a:1", "collector:a:1", "collector:b:1"]);
        let old = plugins(&["collector:a:1", "collector:b:1", "collector:b:1"]);
        let (adds, removes) = compare_plugins(&new, &old);
        assert_eq!(keys(&adds), vec!["collector:a:1"]);
        assert_eq!(keys(&removes), vec!["collector:b:1"]);

        // adds + common == new and removes + common == old, in counts.
        let common = 2;
        assert_eq!(adds.len() + common, new.len());
        assert_eq!(removes.len() + common, old.len());
    }

    #[test]
    fn test_compare_plugins_identical() {
        let list = plugins(&["collector:a:1", "publisher:b:2"]);
        let (adds, removes) = compare_plugins(&list, &list);
        assert!(adds.is_empty());
        assert!(removes.is_empty());
        let (adds, removes) = compare_plugins(&list, &[]);
        assert_eq!(adds.len(), 2);
        assert!(removes.is_empty());
    }

    #[test]
    fn test_request_builders() {
        let request = SubscriptionRequest::metrics(vec![RequestedMetric::latest(
            plexus_core::Namespace::parse("/intel/mock/foo").unwrap(),
        )])
        .with_plugin(SubscribedPlugin::new(PluginType::Publisher, "file", -1));
        assert_eq!(request.requested.len(), 1);
        assert_eq!(request.plugins.len(), 1);
        assert!(request.config.is_empty());
    }
}
