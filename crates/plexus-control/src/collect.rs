//! Routing collect, process and publish calls to running instances.

use std::sync::Arc;

use futures::future::join_all;
use plexus_core::{
    ConfigDataNode, Metric, NamespaceTags, PluginKey, PluginType, STD_TAG_PLUGIN_RUNNING_ON,
    SubscribedPlugin,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::catalog::CatalogedMetric;
use crate::error::{CatalogError, CollectionError, ControlError, ControlErrors, SubscriptionError};
use crate::plugin::{AvailablePlugin, PluginRegistry};
use crate::pool::{Affinity, PluginPool};
use crate::subscription::SubscriptionGroups;

/// Fans task calls out to plugin instances.
#[derive(Debug)]
pub struct Orchestrator {
    groups: Arc<SubscriptionGroups>,
    registry: Arc<PluginRegistry>,
    hostname: String,
    global_tags: NamespaceTags,
}

impl Orchestrator {
    /// Create an orchestrator tagging collected metrics with `hostname`
    /// and `global_tags`.
    #[must_use]
    pub fn new(
        groups: Arc<SubscriptionGroups>,
        registry: Arc<PluginRegistry>,
        hostname: impl Into<String>,
        global_tags: NamespaceTags,
    ) -> Self {
        Self {
            groups,
            registry,
            hostname: hostname.into(),
            global_tags,
        }
    }

    /// Collect every metric of `task_id`'s subscription.
    ///
    /// Collectors are called concurrently. `deadline` bounds each one
    /// end to end, including any instance spin-up. The result is all or
    /// nothing: any failure discards every value.
    ///
    /// # Errors
    ///
    /// The group's unresolved dependencies, or every collection failure.
    pub async fn collect_metrics(
        &self,
        task_id: &str,
        deadline: Instant,
        tags: &NamespaceTags,
    ) -> Result<Vec<Metric>, ControlErrors> {
        let resolution = self.groups.resolution(task_id).ok_or_else(|| {
            ControlErrors::from(ControlError::from(SubscriptionError::GroupNotFound {
                task_id: task_id.to_string(),
            }))
        })?;
        if !resolution.errors.is_empty() {
            return Err(resolution.errors.clone());
        }

        let results = join_all(resolution.metrics.iter().map(|(key, metrics)| async move {
            tokio::time::timeout_at(deadline, self.collect_from(task_id, key, metrics))
                .await
                .unwrap_or_else(|_| {
                    Err(CollectionError::DeadlineExceeded { key: key.clone() }.into())
                })
        }))
        .await;

        let mut collected = Vec::new();
        let mut errors = ControlErrors::new();
        for result in results {
            match result {
                Ok(metrics) => collected.extend(metrics),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            warn!(task_id, errors = %errors, "Collection failed");
            return Err(errors);
        }

        for metric in &mut collected {
            metric
                .tags
                .insert(STD_TAG_PLUGIN_RUNNING_ON.to_string(), self.hostname.clone());
            metric.apply_namespace_tags(tags);
            metric.apply_namespace_tags(&self.global_tags);
        }
        debug!(task_id, count = collected.len(), "Collected metrics");
        Ok(collected)
    }

    async fn collect_from(
        &self,
        task_id: &str,
        key: &PluginKey,
        metrics: &[CatalogedMetric],
    ) -> Result<Vec<Metric>, ControlError> {
        let pool = self.groups.ensure_subscribed(task_id, key).await?;

        let mut collected = Vec::new();
        let mut misses = Vec::new();
        for metric in metrics.iter().map(CatalogedMetric::to_metric) {
            match pool.cache().get(&metric) {
                Some(hit) => collected.extend(hit),
                None => misses.push(metric),
            }
        }
        if misses.is_empty() {
            return Ok(collected);
        }

        let config = misses
            .first()
            .map(|m| m.config.clone())
            .unwrap_or_default();
        let instance = select(&pool, task_id, &config)?;
        let client = instance
            .client()
            .as_collector()
            .ok_or_else(|| CollectionError::WrongPluginType {
                key: key.clone(),
                expected: PluginType::Collector,
            })?;
        instance.record_hit();

        let fresh = client
            .collect_metrics(&misses)
            .await
            .map_err(|source| CollectionError::Rpc {
                key: key.clone(),
                source,
            })?;
        pool.cache().put_collected(&fresh);
        collected.extend(fresh);
        Ok(collected)
    }

    /// Run `metrics` through a processor.
    ///
    /// Returns the processor's content type and payload. `task_id` must
    /// have a subscription group, which keeps the processor's pool
    /// subscription until the group is removed.
    ///
    /// # Errors
    ///
    /// Resolution, subscription or RPC failures.
    pub async fn process_metrics(
        &self,
        task_id: &str,
        metrics: &[Metric],
        plugin: &SubscribedPlugin,
        config: &ConfigDataNode,
    ) -> Result<(String, Vec<u8>), ControlErrors> {
        let (key, instance) = self.route(task_id, plugin, PluginType::Processor).await?;
        let client = instance
            .client()
            .as_processor()
            .ok_or_else(|| wrong_type(&key, PluginType::Processor))?;
        instance.record_hit();
        let output = client
            .process(metrics, config)
            .await
            .map_err(|source| rpc_failure(&key, source))?;
        debug!(task_id, plugin = %key, content_type = %output.0, "Processed metrics");
        Ok(output)
    }

    /// Send `metrics` to a publisher on behalf of `task_id`'s group.
    ///
    /// # Errors
    ///
    /// Resolution, subscription or RPC failures.
    pub async fn publish_metrics(
        &self,
        task_id: &str,
        metrics: &[Metric],
        plugin: &SubscribedPlugin,
        config: &ConfigDataNode,
    ) -> Result<(), ControlErrors> {
        let (key, instance) = self.route(task_id, plugin, PluginType::Publisher).await?;
        let client = instance
            .client()
            .as_publisher()
            .ok_or_else(|| wrong_type(&key, PluginType::Publisher))?;
        instance.record_hit();
        client
            .publish(metrics, config)
            .await
            .map_err(|source| rpc_failure(&key, source))?;
        debug!(task_id, plugin = %key, count = metrics.len(), "Published metrics");
        Ok(())
    }

    async fn route(
        &self,
        task_id: &str,
        plugin: &SubscribedPlugin,
        expected: PluginType,
    ) -> Result<(PluginKey, Arc<AvailablePlugin>), ControlErrors> {
        if plugin.plugin_type != expected {
            return Err(wrong_type(&plugin.key(), expected));
        }
        let loaded = self
            .registry
            .resolve(plugin.plugin_type, &plugin.name, plugin.version)
            .ok_or_else(|| {
                ControlErrors::from(ControlError::from(CatalogError::PluginNotFound {
                    plugin_type: plugin.plugin_type,
                    name: plugin.name.clone(),
                    version: plugin.version,
                }))
            })?;
        let key = loaded.key();
        let pool = self.groups.ensure_subscribed(task_id, &key).await?;
        let instance = select(&pool, task_id, &plugin.config).map_err(ControlError::from)?;
        Ok((key, instance))
    }
}

fn select(
    pool: &PluginPool,
    task_id: &str,
    config: &ConfigDataNode,
) -> Result<Arc<AvailablePlugin>, CollectionError> {
    pool.select(&Affinity::new(task_id, config))
        .ok_or_else(|| CollectionError::NoAvailableInstance {
            key: pool.key().clone(),
        })
}

fn wrong_type(key: &PluginKey, expected: PluginType) -> ControlErrors {
    ControlError::from(CollectionError::WrongPluginType {
        key: key.clone(),
        expected,
    })
    .into()
}

fn rpc_failure(key: &PluginKey, source: crate::error::RpcError) -> ControlErrors {
    ControlError::from(CollectionError::Rpc {
        key: key.clone(),
        source,
    })
    .into()
}
