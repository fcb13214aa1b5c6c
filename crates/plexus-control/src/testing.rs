//! In-process plugins for tests.
//!
//! [`MockPlugin`] answers every RPC from shared state the test can inspect
//! and steer; [`MockLauncher`] hands out mock plugins by executable path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use plexus_core::{ConfigDataNode, ConfigPolicy, Metric, PluginMeta, PluginType};

use crate::error::{LoadError, RpcError, RpcResult};
use crate::plugin::{
    CollectorClient, LaunchedPlugin, PluginArgs, PluginClient, PluginLauncher, PluginRpc,
    ProcessorClient, PublisherClient,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct MockState {
    meta: PluginMeta,
    metrics: Mutex<Vec<Metric>>,
    policy: Mutex<ConfigPolicy>,
    healthy: AtomicBool,
    fail_collect: AtomicBool,
    collect_delay: Mutex<Option<Duration>>,
    kills: AtomicUsize,
    collect_calls: AtomicUsize,
    metric_types_config: Mutex<Option<ConfigDataNode>>,
    collected: Mutex<Vec<Vec<Metric>>>,
    processed: Mutex<Vec<(Vec<Metric>, ConfigDataNode)>>,
    published: Mutex<Vec<(Vec<Metric>, ConfigDataNode)>>,
}

/// A scriptable plugin shared between the test and every instance
/// launched from it.
#[derive(Debug, Clone)]
pub struct MockPlugin {
    state: Arc<MockState>,
}

impl MockPlugin {
    /// A healthy plugin with no metrics and an empty policy.
    #[must_use]
    pub fn new(meta: PluginMeta) -> Self {
        Self {
            state: Arc::new(MockState {
                meta,
                metrics: Mutex::new(Vec::new()),
                policy: Mutex::new(ConfigPolicy::default()),
                healthy: AtomicBool::new(true),
                fail_collect: AtomicBool::new(false),
                collect_delay: Mutex::new(None),
                kills: AtomicUsize::new(0),
                collect_calls: AtomicUsize::new(0),
                metric_types_config: Mutex::new(None),
                collected: Mutex::new(Vec::new()),
                processed: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A collector with default metadata.
    #[must_use]
    pub fn collector(name: &str, version: i32) -> Self {
        Self::new(PluginMeta::new(PluginType::Collector, name, version))
    }

    /// A processor with default metadata.
    #[must_use]
    pub fn processor(name: &str, version: i32) -> Self {
        Self::new(PluginMeta::new(PluginType::Processor, name, version))
    }

    /// A publisher with default metadata.
    #[must_use]
    pub fn publisher(name: &str, version: i32) -> Self {
        Self::new(PluginMeta::new(PluginType::Publisher, name, version))
    }

    /// Advertise `metric` from `get_metric_types`.
    #[must_use]
    pub fn with_metric(self, metric: Metric) -> Self {
        lock(&self.state.metrics).push(metric);
        self
    }

    /// Report `policy` from `get_config_policy`.
    #[must_use]
    pub fn with_policy(self, policy: ConfigPolicy) -> Self {
        *lock(&self.state.policy) = policy;
        self
    }

    /// Handshake metadata.
    #[must_use]
    pub fn meta(&self) -> &PluginMeta {
        &self.state.meta
    }

    /// Make pings succeed or fail.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Make collections fail with a remote error.
    pub fn set_fail_collect(&self, fail: bool) {
        self.state.fail_collect.store(fail, Ordering::SeqCst);
    }

    /// Delay every collection.
    pub fn set_collect_delay(&self, delay: Option<Duration>) {
        *lock(&self.state.collect_delay) = delay;
    }

    /// Kill RPCs received.
    #[must_use]
    pub fn kills(&self) -> usize {
        self.state.kills.load(Ordering::SeqCst)
    }

    /// Collect RPCs received.
    #[must_use]
    pub fn collect_calls(&self) -> usize {
        self.state.collect_calls.load(Ordering::SeqCst)
    }

    /// Config passed to the last `get_metric_types`.
    #[must_use]
    pub fn metric_types_config(&self) -> Option<ConfigDataNode> {
        lock(&self.state.metric_types_config).clone()
    }

    /// Every metric batch passed to `collect_metrics`.
    #[must_use]
    pub fn collected(&self) -> Vec<Vec<Metric>> {
        lock(&self.state.collected).clone()
    }

    /// Every `process` call.
    #[must_use]
    pub fn processed(&self) -> Vec<(Vec<Metric>, ConfigDataNode)> {
        lock(&self.state.processed).clone()
    }

    /// Every `publish` call.
    #[must_use]
    pub fn published(&self) -> Vec<(Vec<Metric>, ConfigDataNode)> {
        lock(&self.state.published).clone()
    }

    /// A launched instance backed by this mock.
    #[must_use]
    pub fn launched(&self) -> LaunchedPlugin {
        let client = Arc::new(MockClient {
            state: Arc::clone(&self.state),
        });
        LaunchedPlugin {
            meta: self.state.meta.clone(),
            client: PluginClient::for_type(self.state.meta.plugin_type, client),
            process: None,
        }
    }
}

#[derive(Debug)]
struct MockClient {
    state: Arc<MockState>,
}

#[async_trait]
impl PluginRpc for MockClient {
    async fn ping(&self) -> RpcResult<()> {
        if self.state.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::Closed)
        }
    }

    async fn kill(&self, _reason: &str) -> RpcResult<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_config_policy(&self) -> RpcResult<ConfigPolicy> {
        Ok(lock(&self.state.policy).clone())
    }
}

#[async_trait]
impl CollectorClient for MockClient {
    async fn get_metric_types(&self, config: &ConfigDataNode) -> RpcResult<Vec<Metric>> {
        *lock(&self.state.metric_types_config) = Some(config.clone());
        Ok(lock(&self.state.metrics).clone())
    }

    async fn collect_metrics(&self, metrics: &[Metric]) -> RpcResult<Vec<Metric>> {
        let call = self
            .state
            .collect_calls
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        let delay = *lock(&self.state.collect_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_collect.load(Ordering::SeqCst) {
            return Err(RpcError::Remote {
                code: -32000,
                message: "collection failed".to_string(),
            });
        }
        lock(&self.state.collected).push(metrics.to_vec());
        Ok(metrics
            .iter()
            .map(|m| {
                m.clone()
                    .with_data(u64::try_from(call).unwrap_or(u64::MAX))
                    .with_timestamp(Utc::now())
            })
            .collect())
    }
}

#[async_trait]
impl ProcessorClient for MockClient {
    async fn process(
        &self,
        metrics: &[Metric],
        config: &ConfigDataNode,
    ) -> RpcResult<(String, Vec<u8>)> {
        lock(&self.state.processed).push((metrics.to_vec(), config.clone()));
        let content = serde_json::to_vec(metrics).map_err(|e| RpcError::Protocol(e.to_string()))?;
        Ok(("application/json".to_string(), content))
    }
}

#[async_trait]
impl PublisherClient for MockClient {
    async fn publish(&self, metrics: &[Metric], config: &ConfigDataNode) -> RpcResult<()> {
        lock(&self.state.published).push((metrics.to_vec(), config.clone()));
        Ok(())
    }
}

/// Launches [`MockPlugin`]s registered by executable path.
#[derive(Debug, Default)]
pub struct MockLauncher {
    plugins: Mutex<HashMap<PathBuf, MockPlugin>>,
    launches: Mutex<Vec<PathBuf>>,
    launch_delay: Mutex<Option<Duration>>,
}

impl MockLauncher {
    /// Create a launcher with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `plugin` for launches of `path`.
    pub fn register(&self, path: impl Into<PathBuf>, plugin: MockPlugin) {
        lock(&self.plugins).insert(path.into(), plugin);
    }

    /// Write a stand-in executable for `plugin` under `dir` and register it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be written.
    pub fn install(&self, dir: &Path, plugin: MockPlugin) -> std::io::Result<PathBuf> {
        let meta = plugin.meta();
        let path = dir.join(format!(
            "plexus-{}-{}-v{}",
            meta.plugin_type, meta.name, meta.version
        ));
        std::fs::write(&path, format!("mock {}\n", meta.key()))?;
        self.register(path.clone(), plugin);
        Ok(path)
    }

    /// Delay every later launch by `delay`, or stop delaying with `None`.
    pub fn set_launch_delay(&self, delay: Option<Duration>) {
        *lock(&self.launch_delay) = delay;
    }

    /// How many times `path` was launched.
    #[must_use]
    pub fn launch_count(&self, path: &Path) -> usize {
        lock(&self.launches).iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl PluginLauncher for MockLauncher {
    async fn launch(
        &self,
        path: &Path,
        _args: &PluginArgs,
        _timeout: Duration,
    ) -> Result<LaunchedPlugin, LoadError> {
        lock(&self.launches).push(path.to_path_buf());
        let delay = *lock(&self.launch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let plugin = lock(&self.plugins).get(path).cloned();
        plugin.map(|p| p.launched()).ok_or_else(|| LoadError::Spawn {
            plugin: path.display().to_string(),
            message: "no mock registered for path".to_string(),
        })
    }
}
