//! Typed RPC contract per plugin type.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use plexus_core::{ConfigDataNode, ConfigPolicy, Metric, PluginType};

use crate::error::RpcResult;

/// Calls every plugin answers.
#[async_trait]
pub trait PluginRpc: Send + Sync + fmt::Debug {
    /// Liveness check.
    async fn ping(&self) -> RpcResult<()>;

    /// Ask the plugin to exit.
    async fn kill(&self, reason: &str) -> RpcResult<()>;

    /// The plugin's config policy.
    async fn get_config_policy(&self) -> RpcResult<ConfigPolicy>;
}

/// Collector calls.
#[async_trait]
pub trait CollectorClient: PluginRpc {
    /// Metrics the collector can produce given `config`.
    async fn get_metric_types(&self, config: &ConfigDataNode) -> RpcResult<Vec<Metric>>;

    /// Collect values for `metrics`.
    async fn collect_metrics(&self, metrics: &[Metric]) -> RpcResult<Vec<Metric>>;
}

/// Processor calls.
#[async_trait]
pub trait ProcessorClient: PluginRpc {
    /// Transform metrics, returning a content type and payload.
    async fn process(
        &self,
        metrics: &[Metric],
        config: &ConfigDataNode,
    ) -> RpcResult<(String, Vec<u8>)>;
}

/// Publisher calls.
#[async_trait]
pub trait PublisherClient: PluginRpc {
    /// Publish metrics.
    async fn publish(&self, metrics: &[Metric], config: &ConfigDataNode) -> RpcResult<()>;
}

/// RPC handle for one plugin process, by type.
#[derive(Debug, Clone)]
pub enum PluginClient {
    /// Collector handle.
    Collector(Arc<dyn CollectorClient>),
    /// Processor handle.
    Processor(Arc<dyn ProcessorClient>),
    /// Publisher handle.
    Publisher(Arc<dyn PublisherClient>),
}

impl PluginClient {
    /// Wrap a transport that speaks every type's calls.
    pub fn for_type<C>(plugin_type: PluginType, client: Arc<C>) -> Self
    where
        C: CollectorClient + ProcessorClient + PublisherClient + 'static,
    {
        match plugin_type {
            PluginType::Collector => Self::Collector(client),
            PluginType::Processor => Self::Processor(client),
            PluginType::Publisher => Self::Publisher(client),
        }
    }

    /// The plugin type this handle speaks for.
    #[must_use]
    pub fn plugin_type(&self) -> PluginType {
        match self {
            Self::Collector(_) => PluginType::Collector,
            Self::Processor(_) => PluginType::Processor,
            Self::Publisher(_) => PluginType::Publisher,
        }
    }

    fn common(&self) -> &dyn PluginRpc {
        match self {
            Self::Collector(c) => c.as_ref(),
            Self::Processor(p) => p.as_ref(),
            Self::Publisher(p) => p.as_ref(),
        }
    }

    /// See [`PluginRpc::ping`].
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn ping(&self) -> RpcResult<()> {
        self.common().ping().await
    }

    /// See [`PluginRpc::kill`].
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn kill(&self, reason: &str) -> RpcResult<()> {
        self.common().kill(reason).await
    }

    /// See [`PluginRpc::get_config_policy`].
    ///
    /// # Errors
    ///
    /// Returns the RPC failure.
    pub async fn get_config_policy(&self) -> RpcResult<ConfigPolicy> {
        self.common().get_config_policy().await
    }

    /// The collector handle, if this is a collector.
    #[must_use]
    pub fn as_collector(&self) -> Option<&Arc<dyn CollectorClient>> {
        match self {
            Self::Collector(c) => Some(c),
            _ => None,
        }
    }

    /// The processor handle, if this is a processor.
    #[must_use]
    pub fn as_processor(&self) -> Option<&Arc<dyn ProcessorClient>> {
        match self {
            Self::Processor(p) => Some(p),
            _ => None,
        }
    }

    /// The publisher handle, if this is a publisher.
    #[must_use]
    pub fn as_publisher(&self) -> Option<&Arc<dyn PublisherClient>> {
        match self {
            Self::Publisher(p) => Some(p),
            _ => None,
        }
    }
}
