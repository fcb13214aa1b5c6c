//! The control plane entry point.
//!
//! A [`Controller`] owns the catalog, plugin registry, pools and
//! subscription groups. Nothing is global: two controllers in one process
//! share no state.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use plexus_config::ControlConfig;
use plexus_core::{ConfigDataNode, Metric, Namespace, NamespaceTags, PluginKey, SubscribedPlugin};
use plexus_crypto::{PluginSigner, SignatureVerifier, TrustLevel};
use plexus_events::{ControlEvent, EventBus, EventMetadata, EventReceiver};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogedMetric, MetricCatalog};
use crate::collect::Orchestrator;
use crate::error::{ControlError, ControlErrors, ControlResult, LoadError, SubscriptionError};
use crate::loader::PluginLoader;
use crate::monitor::HealthMonitor;
use crate::plugin::{
    AvailablePluginInfo, ExecLauncher, LoadedPlugin, PluginLauncher, PluginRegistry,
    RequestedPlugin,
};
use crate::pool::{PoolInfo, PoolTable};
use crate::runner::Runner;
use crate::subscription::{Resolution, SubscriptionGroups, SubscriptionRequest};

/// Builds a [`Controller`] from configuration.
#[derive(Debug)]
pub struct ControllerBuilder {
    config: ControlConfig,
    launcher: Option<Arc<dyn PluginLauncher>>,
    signer: Option<PluginSigner>,
    bus: Option<EventBus>,
}

impl ControllerBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            launcher: None,
            signer: None,
            bus: None,
        }
    }

    /// Start plugins with `launcher` instead of executing them.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn PluginLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Use `signer` instead of one built from the trust level and keyrings.
    #[must_use]
    pub fn with_signer(mut self, signer: PluginSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Publish on an existing bus.
    #[must_use]
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the controller. It must still be started.
    ///
    /// # Errors
    ///
    /// [`ControlError::Trust`] for an unknown trust level or an unreadable
    /// keyring.
    pub fn build(self) -> ControlResult<Controller> {
        let signer = match self.signer {
            Some(signer) => signer,
            None => {
                let trust: TrustLevel = self.config.plugin_trust_level.parse()?;
                let verifier = if self.config.keyring_paths.is_empty() {
                    SignatureVerifier::new()
                } else {
                    SignatureVerifier::from_keyring_files(self.config.keyring_paths.as_slice())?
                };
                debug!(
                    trust = %trust,
                    keys = verifier.trusted_key_count(),
                    "Plugin trust configured"
                );
                PluginSigner::new(trust, verifier)
            },
        };
        let config = Arc::new(self.config);
        let launcher = self.launcher.unwrap_or_else(|| {
            Arc::new(ExecLauncher::new(config.client_timeout())) as Arc<dyn PluginLauncher>
        });
        let bus = self.bus.unwrap_or_default();

        let catalog = Arc::new(MetricCatalog::new());
        let registry = Arc::new(PluginRegistry::new());
        let loader = Arc::new(PluginLoader::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            launcher,
            Arc::new(signer),
            Arc::clone(&config),
            bus.clone(),
        ));
        let pools = Arc::new(PoolTable::new(
            config.max_running_plugins,
            config.cache_expiration(),
        ));
        let runner = Arc::new(Runner::new(
            Arc::clone(&pools),
            Arc::clone(&registry),
            Arc::clone(&loader),
            bus.clone(),
            config.max_plugin_restarts,
        ));
        let groups = Arc::new(SubscriptionGroups::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&runner),
            Arc::clone(&config),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&groups),
            Arc::clone(&registry),
            loader.hostname(),
            config.tags.clone(),
        );
        let monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&pools),
            bus.clone(),
            config.health_check_interval(),
            config.health_check_timeout(),
            config.health_check_failure_limit,
        ));

        Ok(Controller {
            config,
            bus,
            catalog,
            registry,
            loader,
            pools,
            runner,
            groups,
            orchestrator,
            monitor,
            background: Mutex::new(None),
        })
    }
}

#[derive(Debug)]
struct Background {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns every control plane table.
#[derive(Debug)]
pub struct Controller {
    config: Arc<ControlConfig>,
    bus: EventBus,
    catalog: Arc<MetricCatalog>,
    registry: Arc<PluginRegistry>,
    loader: Arc<PluginLoader>,
    pools: Arc<PoolTable>,
    runner: Arc<Runner>,
    groups: Arc<SubscriptionGroups>,
    orchestrator: Orchestrator,
    monitor: Arc<HealthMonitor>,
    background: Mutex<Option<Background>>,
}

impl Controller {
    /// Build a controller from `config` with default collaborators.
    ///
    /// # Errors
    ///
    /// See [`ControllerBuilder::build`].
    pub fn new(config: ControlConfig) -> ControlResult<Self> {
        ControllerBuilder::new(config).build()
    }

    /// Start the event dispatcher and health monitor. Starting twice is a
    /// no-op.
    pub fn start(&self) {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if background.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let dispatcher = spawn_dispatcher(
            self.bus.subscribe(),
            Arc::clone(&self.runner),
            self.config.health_check_failure_limit,
            cancel.clone(),
        );
        let monitor = Arc::clone(&self.monitor).spawn(cancel.clone());
        *background = Some(Background {
            cancel,
            tasks: vec![dispatcher, monitor],
        });
        drop(background);

        info!(
            max_running_plugins = self.config.max_running_plugins,
            trust = %self.config.plugin_trust_level,
            "Controller started"
        );
        self.bus.publish(ControlEvent::ControllerStarted {
            metadata: EventMetadata::new("controller"),
        });
    }

    /// Stop background work and kill every running instance.
    pub async fn stop(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(background) = background else {
            return;
        };
        background.cancel.cancel();
        for task in background.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        self.runner.stop().await;
        info!("Controller stopped");
        self.bus.publish(ControlEvent::ControllerStopped {
            metadata: EventMetadata::new("controller"),
        });
    }

    /// Whether [`Controller::start`] has run without a matching stop.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn ensure_started(&self) -> ControlResult<()> {
        if self.is_started() {
            Ok(())
        } else {
            Err(ControlError::NotStarted)
        }
    }

    // ========== Management ==========

    /// Load a plugin and re-resolve every subscription group.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotStarted`] or any [`LoadError`].
    pub async fn load(&self, requested: &RequestedPlugin) -> ControlResult<Arc<LoadedPlugin>> {
        self.ensure_started()?;
        let loaded = self.loader.load(requested).await?;
        self.groups.process_all().await;
        Ok(loaded)
    }

    /// Load the executable at `path`, picking up a `.sig` file next to it.
    ///
    /// # Errors
    ///
    /// See [`Controller::load`].
    pub async fn load_path(&self, path: impl AsRef<Path>) -> ControlResult<Arc<LoadedPlugin>> {
        let requested = RequestedPlugin::from_path(path.as_ref())?;
        self.load(&requested).await
    }

    /// Unload a plugin and re-resolve every subscription group.
    ///
    /// Running instances are not killed.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotStarted`], [`LoadError::PluginInUse`] when
    /// unloads are guarded and a task depends on the plugin, or the
    /// registry's not-found errors.
    pub async fn unload(&self, key: &PluginKey) -> ControlResult<Arc<LoadedPlugin>> {
        self.ensure_started()?;
        if self.config.guard_unload {
            let tasks = self.groups.unload_impact(key);
            if !tasks.is_empty() {
                warn!(plugin = %key, tasks = ?tasks, "Unload refused, plugin in use");
                return Err(LoadError::PluginInUse {
                    key: key.clone(),
                    tasks,
                }
                .into());
            }
        }
        let unloaded = self.loader.unload(key)?;
        self.groups.process_all().await;
        Ok(unloaded)
    }

    /// Replace `outgoing` with the plugin at `incoming`.
    ///
    /// Both must share type and name. On failure the catalog is left as it
    /// was.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::SwapMismatch`], or load and unload failures.
    pub async fn swap_plugins(
        &self,
        incoming: &RequestedPlugin,
        outgoing: &PluginKey,
    ) -> ControlResult<Arc<LoadedPlugin>> {
        self.ensure_started()?;
        let loaded = self.loader.load(incoming).await?;
        let key = loaded.key();

        if key.plugin_type != outgoing.plugin_type || key.name != outgoing.name {
            self.rollback(&key);
            return Err(SubscriptionError::SwapMismatch {
                incoming: key,
                outgoing: outgoing.clone(),
            }
            .into());
        }
        if let Err(e) = self.loader.unload(outgoing) {
            self.rollback(&key);
            return Err(e.into());
        }

        info!(loaded = %key, unloaded = %outgoing, "Plugins swapped");
        self.bus.publish(ControlEvent::PluginsSwapped {
            metadata: EventMetadata::new("controller"),
            loaded: key,
            unloaded: outgoing.clone(),
        });
        self.groups.process_all().await;
        Ok(loaded)
    }

    fn rollback(&self, key: &PluginKey) {
        if let Err(e) = self.loader.unload(key) {
            warn!(plugin = %key, error = %e, "Swap rollback failed");
        }
    }

    /// Every loaded plugin.
    #[must_use]
    pub fn plugin_catalog(&self) -> Vec<Arc<LoadedPlugin>> {
        self.registry.list()
    }

    /// Every running instance.
    #[must_use]
    pub fn available_plugins(&self) -> Vec<AvailablePluginInfo> {
        self.runner.available_plugins()
    }

    /// Every pool with its subscribers and instances.
    #[must_use]
    pub fn pools(&self) -> Vec<PoolInfo> {
        self.pools.snapshot()
    }

    /// Every cataloged metric.
    #[must_use]
    pub fn metric_catalog(&self) -> Vec<CatalogedMetric> {
        self.catalog.table()
    }

    /// Metrics at or below `namespace`.
    ///
    /// A version below 1 keeps the latest version of each namespace;
    /// otherwise only that exact version is kept.
    ///
    /// # Errors
    ///
    /// [`crate::error::CatalogError::NothingBelow`] or
    /// [`crate::error::CatalogError::EmptyNamespace`].
    pub fn fetch_metrics(
        &self,
        namespace: &Namespace,
        version: i32,
    ) -> ControlResult<Vec<CatalogedMetric>> {
        let fetched = self.catalog.fetch(namespace)?;
        if version >= 1 {
            return Ok(fetched
                .into_iter()
                .filter(|m| m.version == version)
                .collect());
        }
        let mut latest: BTreeMap<String, CatalogedMetric> = BTreeMap::new();
        for metric in fetched {
            match latest.get(&metric.namespace.to_string()) {
                Some(kept) if kept.version >= metric.version => {},
                _ => {
                    latest.insert(metric.namespace.to_string(), metric);
                },
            }
        }
        Ok(latest.into_values().collect())
    }

    /// The single metric at `namespace`.
    ///
    /// # Errors
    ///
    /// See [`MetricCatalog::get`].
    pub fn get_metric(&self, namespace: &Namespace, version: i32) -> ControlResult<CatalogedMetric> {
        Ok(self.catalog.get(namespace, version)?)
    }

    /// Metrics matching `namespace`, wildcards allowed.
    ///
    /// # Errors
    ///
    /// See [`MetricCatalog::get_metrics`].
    pub fn get_metrics(
        &self,
        namespace: &Namespace,
        version: i32,
    ) -> ControlResult<Vec<CatalogedMetric>> {
        Ok(self.catalog.get_metrics(namespace, version)?)
    }

    /// Every version of every metric matching `namespace`.
    ///
    /// # Errors
    ///
    /// See [`MetricCatalog::get_versions`].
    pub fn get_metric_versions(&self, namespace: &Namespace) -> ControlResult<Vec<CatalogedMetric>> {
        Ok(self.catalog.get_versions(namespace)?)
    }

    /// Plugins owning metrics matching `namespace`.
    ///
    /// # Errors
    ///
    /// See [`MetricCatalog::plugins`].
    pub fn get_plugins(&self, namespace: &Namespace) -> ControlResult<Vec<PluginKey>> {
        Ok(self.catalog.plugins(namespace)?)
    }

    /// Whether a metric exists at `namespace` and `version`.
    #[must_use]
    pub fn metric_exists(&self, namespace: &Namespace, version: i32) -> bool {
        self.catalog.exists(namespace, version)
    }

    /// Tasks that would lose a dependency if `key` were unloaded.
    #[must_use]
    pub fn unload_impact(&self, key: &PluginKey) -> Vec<String> {
        self.groups.unload_impact(key)
    }

    // ========== Scheduler ==========

    /// Create and resolve the subscription group for `task_id`.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotStarted`], a duplicate task, or every resolution
    /// failure.
    pub async fn create_subscription_group(
        &self,
        task_id: &str,
        request: SubscriptionRequest,
    ) -> Result<Arc<Resolution>, ControlErrors> {
        self.ensure_started()?;
        self.groups.add(task_id, request).await
    }

    /// Remove the subscription group for `task_id`.
    ///
    /// # Errors
    ///
    /// [`ControlError::NotStarted`] or [`SubscriptionError::GroupNotFound`].
    pub async fn remove_subscription_group(&self, task_id: &str) -> ControlResult<()> {
        self.ensure_started()?;
        Ok(self.groups.remove(task_id).await?)
    }

    /// Check that `request` would resolve, without subscribing.
    #[must_use]
    pub fn validate_deps(&self, request: &SubscriptionRequest) -> ControlErrors {
        self.groups.validate_deps(request)
    }

    /// Current resolution of `task_id`.
    #[must_use]
    pub fn subscription(&self, task_id: &str) -> Option<Arc<Resolution>> {
        self.groups.resolution(task_id)
    }

    /// Collect `task_id`'s metrics before `deadline`.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::collect_metrics`].
    pub async fn collect_metrics(
        &self,
        task_id: &str,
        deadline: Instant,
        tags: &NamespaceTags,
    ) -> Result<Vec<Metric>, ControlErrors> {
        self.ensure_started()?;
        self.orchestrator
            .collect_metrics(task_id, deadline, tags)
            .await
    }

    /// Run metrics through a processor.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::process_metrics`].
    pub async fn process_metrics(
        &self,
        task_id: &str,
        metrics: &[Metric],
        plugin: &SubscribedPlugin,
        config: &ConfigDataNode,
    ) -> Result<(String, Vec<u8>), ControlErrors> {
        self.ensure_started()?;
        self.orchestrator
            .process_metrics(task_id, metrics, plugin, config)
            .await
    }

    /// Send metrics to a publisher.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::publish_metrics`].
    pub async fn publish_metrics(
        &self,
        task_id: &str,
        metrics: &[Metric],
        plugin: &SubscribedPlugin,
        config: &ConfigDataNode,
    ) -> Result<(), ControlErrors> {
        self.ensure_started()?;
        self.orchestrator
            .publish_metrics(task_id, metrics, plugin, config)
            .await
    }

    /// The controller's event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &ControlConfig {
        &self.config
    }
}

/// React to instance deaths and unsubscriptions until cancelled.
///
/// After the receiver lags, pools are reconciled in place of the dropped
/// events.
fn spawn_dispatcher(
    mut events: EventReceiver,
    runner: Arc<Runner>,
    failure_limit: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                break;
            };
            let skipped = events.take_skipped();
            if skipped > 0 {
                warn!(skipped, "Dispatcher missed events, reconciling pools");
                runner.reconcile(failure_limit).await;
            }
            match event.as_ref() {
                ControlEvent::AvailablePluginDead {
                    key,
                    instance_id,
                    reason,
                    ..
                } => runner.restart_dead(key, *instance_id, reason).await,
                ControlEvent::PluginUnsubscribed { key, .. } => {
                    runner.shrink(key).await;
                },
                _ => {},
            }
        }
        debug!("Event dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use plexus_core::{Namespace, PluginType, RequestedMetric};

    use super::*;
    use crate::error::CollectionError;
    use crate::testing::{MockLauncher, MockPlugin};

    struct Fixture {
        dir: tempfile::TempDir,
        launcher: Arc<MockLauncher>,
        controller: Controller,
    }

    fn fixture_with(config: ControlConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::new());
        let controller = ControllerBuilder::new(config)
            .with_launcher(Arc::clone(&launcher) as Arc<dyn PluginLauncher>)
            .with_signer(PluginSigner::disabled())
            .build()
            .unwrap();
        controller.start();
        Fixture {
            dir,
            launcher,
            controller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ControlConfig {
            cache_expiration_ms: 0,
            ..ControlConfig::default()
        })
    }

    fn ns(s: &str) -> Namespace {
        Namespace::parse(s).unwrap()
    }

    fn collector(name: &str, version: i32, metrics: &[&str]) -> MockPlugin {
        metrics
            .iter()
            .fold(MockPlugin::collector(name, version), |mock, m| {
                mock.with_metric(Metric::new(ns(m), 0))
            })
    }

    async fn load(f: &Fixture, mock: &MockPlugin) -> PluginKey {
        let path = f.launcher.install(f.dir.path(), mock.clone()).unwrap();
        f.controller.load_path(&path).await.unwrap().key()
    }

    #[allow(clippy::arithmetic_side_effects)]
    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn test_operations_require_start() {
        let controller = ControllerBuilder::new(ControlConfig::default())
            .with_launcher(Arc::new(MockLauncher::new()))
            .with_signer(PluginSigner::disabled())
            .build()
            .unwrap();
        assert!(!controller.is_started());
        let key: PluginKey = "collector:mock:1".parse().unwrap();
        assert_eq!(controller.unload(&key).await.unwrap_err(), ControlError::NotStarted);
        let errors = controller
            .create_subscription_group("t1", SubscriptionRequest::default())
            .await
            .unwrap_err();
        assert_eq!(errors.as_slice(), &[ControlError::NotStarted]);
    }

    #[tokio::test]
    async fn test_unknown_trust_level_fails_build() {
        let config = ControlConfig {
            plugin_trust_level: "paranoid".to_string(),
            ..ControlConfig::default()
        };
        let err = ControllerBuilder::new(config).build().unwrap_err();
        assert!(matches!(err, ControlError::Trust(_)));
    }

    #[tokio::test]
    async fn test_collect_end_to_end() {
        let f = fixture();
        let mock = collector("mock", 1, &["/intel/mock/foo", "/intel/mock/bar"]);
        let key = load(&f, &mock).await;

        let request = SubscriptionRequest::metrics(vec![RequestedMetric::latest(ns(
            "/intel/mock/*",
        ))]);
        let resolution = f
            .controller
            .create_subscription_group("t1", request)
            .await
            .unwrap();
        assert_eq!(resolution.metric_count(), 2);
        assert_eq!(resolution.plugin_keys(), vec![key.clone()]);

        let mut tags = NamespaceTags::new();
        tags.insert(
            "/intel/mock".to_string(),
            BTreeMap::from([("task".to_string(), "t1".to_string())]),
        );
        let metrics = f
            .controller
            .collect_metrics("t1", deadline(), &tags)
            .await
            .unwrap();
        assert_eq!(metrics.len(), 2);
        for metric in &metrics {
            assert_eq!(metric.tags.get("task").map(String::as_str), Some("t1"));
            assert!(metric.tags.contains_key(plexus_core::STD_TAG_PLUGIN_RUNNING_ON));
        }
        assert_eq!(f.controller.available_plugins().len(), 1);

        f.controller.remove_subscription_group("t1").await.unwrap();
        assert!(f.controller.subscription("t1").is_none());
        f.controller.stop().await;
        assert_eq!(mock.kills(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_group_rejected() {
        let f = fixture();
        load(&f, &collector("mock", 1, &["/intel/mock/foo"])).await;
        let request =
            SubscriptionRequest::metrics(vec![RequestedMetric::latest(ns("/intel/mock/foo"))]);
        f.controller
            .create_subscription_group("t1", request.clone())
            .await
            .unwrap();
        let errors = f
            .controller
            .create_subscription_group("t1", request)
            .await
            .unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ControlError::Subscription(SubscriptionError::GroupExists { .. })]
        ));
    }

    #[tokio::test]
    async fn test_failed_first_resolution_is_not_kept() {
        let f = fixture();
        let request =
            SubscriptionRequest::metrics(vec![RequestedMetric::latest(ns("/intel/none/foo"))]);
        let errors = f
            .controller
            .create_subscription_group("t1", request)
            .await
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(f.controller.subscription("t1").is_none());
    }

    #[tokio::test]
    async fn test_guarded_unload_refuses_plugin_in_use() {
        let f = fixture_with(ControlConfig {
            cache_expiration_ms: 0,
            guard_unload: true,
            ..ControlConfig::default()
        });
        let key = load(&f, &collector("mock", 1, &["/intel/mock/foo"])).await;
        f.controller
            .create_subscription_group(
                "t1",
                SubscriptionRequest::metrics(vec![RequestedMetric::latest(ns(
                    "/intel/mock/foo",
                ))]),
            )
            .await
            .unwrap();

        assert_eq!(f.controller.unload_impact(&key), vec!["t1".to_string()]);
        let err = f.controller.unload(&key).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Plugin is used by running task. Stop the task to be able to unload the plugin"
        );

        f.controller.remove_subscription_group("t1").await.unwrap();
        f.controller.unload(&key).await.unwrap();
        assert!(f.controller.metric_catalog().is_empty());
    }

    #[tokio::test]
    async fn test_swap_plugins() {
        let f = fixture();
        let old = load(&f, &collector("mock", 1, &["/intel/mock/foo"])).await;
        let mut events = f.controller.events().subscribe();

        let path = f
            .launcher
            .install(f.dir.path(), collector("mock", 2, &["/intel/mock/foo"]))
            .unwrap();
        let swapped = f
            .controller
            .swap_plugins(&RequestedPlugin::from_path(&path).unwrap(), &old)
            .await
            .unwrap();
        assert_eq!(swapped.version(), 2);
        let keys: Vec<String> = f
            .controller
            .plugin_catalog()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(keys, vec!["collector:mock:2"]);

        let mut seen = Vec::new();
        while let Some(event) = events.try_recv() {
            seen.push(event.event_type());
        }
        assert!(seen.contains(&"plugins_swapped"));
    }

    #[tokio::test]
    async fn test_swap_mismatch_rolls_back() {
        let f = fixture();
        let old = load(&f, &collector("mock", 1, &["/intel/mock/foo"])).await;
        let path = f
            .launcher
            .install(f.dir.path(), MockPlugin::publisher("file", 1))
            .unwrap();
        let err = f
            .controller
            .swap_plugins(&RequestedPlugin::from_path(&path).unwrap(), &old)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::Subscription(SubscriptionError::SwapMismatch { .. })
        ));
        let keys: Vec<PluginKey> = f
            .controller
            .plugin_catalog()
            .iter()
            .map(|p| p.key())
            .collect();
        assert_eq!(keys, vec![old]);
    }

    #[tokio::test]
    async fn test_fetch_metrics_latest_per_namespace() {
        let f = fixture();
        load(&f, &collector("mock", 1, &["/intel/mock/foo", "/intel/mock/bar"])).await;
        load(&f, &collector("mock", 2, &["/intel/mock/foo"])).await;

        let latest = f.controller.fetch_metrics(&ns("/intel/mock"), -1).unwrap();
        let found: Vec<(String, i32)> = latest
            .iter()
            .map(|m| (m.namespace.to_string(), m.version))
            .collect();
        assert_eq!(
            found,
            vec![
                ("/intel/mock/bar".to_string(), 1),
                ("/intel/mock/foo".to_string(), 2)
            ]
        );
        assert_eq!(f.controller.fetch_metrics(&ns("/intel/mock"), 1).unwrap().len(), 2);
        assert!(f.controller.metric_exists(&ns("/intel/mock/foo"), 2));
        assert_eq!(
            f.controller.get_plugins(&ns("/intel/mock/foo")).unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_process_and_publish() {
        let f = fixture();
        let processor = MockPlugin::processor("passthru", 1);
        let publisher = MockPlugin::publisher("file", 1);
        load(&f, &processor).await;
        load(&f, &publisher).await;
        f.controller
            .create_subscription_group(
                "t1",
                SubscriptionRequest::default()
                    .with_plugin(SubscribedPlugin::new(PluginType::Publisher, "file", 1)),
            )
            .await
            .unwrap();

        let metrics = vec![Metric::new(ns("/intel/mock/foo"), 1).with_data(1)];
        let (content_type, payload) = f
            .controller
            .process_metrics(
                "t1",
                &metrics,
                &SubscribedPlugin::new(PluginType::Processor, "passthru", -1),
                &ConfigDataNode::new(),
            )
            .await
            .unwrap();
        assert_eq!(content_type, "application/json");
        assert!(!payload.is_empty());

        f.controller
            .publish_metrics(
                "t1",
                &metrics,
                &SubscribedPlugin::new(PluginType::Publisher, "file", 1),
                &ConfigDataNode::new(),
            )
            .await
            .unwrap();
        assert_eq!(publisher.published().len(), 1);

        let errors = f
            .controller
            .publish_metrics(
                "t1",
                &metrics,
                &SubscribedPlugin::new(PluginType::Processor, "passthru", 1),
                &ConfigDataNode::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    fn subscribers(f: &Fixture, key: &PluginKey) -> Vec<String> {
        f.controller
            .pools()
            .into_iter()
            .find(|p| &p.key == key)
            .map(|p| p.subscribers)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_process_subscription_released_with_group() {
        let f = fixture();
        let processor = MockPlugin::processor("passthru", 1);
        let key = load(&f, &processor).await;
        let passthru = SubscribedPlugin::new(PluginType::Processor, "passthru", -1);
        let metrics = vec![Metric::new(ns("/intel/mock/foo"), 1).with_data(1)];

        let errors = f
            .controller
            .process_metrics("t1", &metrics, &passthru, &ConfigDataNode::new())
            .await
            .unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ControlError::Subscription(SubscriptionError::GroupNotFound { .. })]
        ));
        assert!(subscribers(&f, &key).is_empty());

        f.controller
            .create_subscription_group("t1", SubscriptionRequest::default())
            .await
            .unwrap();
        f.controller
            .process_metrics("t1", &metrics, &passthru, &ConfigDataNode::new())
            .await
            .unwrap();
        assert_eq!(subscribers(&f, &key), vec!["t1".to_string()]);

        f.controller.remove_subscription_group("t1").await.unwrap();
        assert!(subscribers(&f, &key).is_empty());
        let errors = f
            .controller
            .process_metrics("t1", &metrics, &passthru, &ConfigDataNode::new())
            .await
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(subscribers(&f, &key).is_empty());
    }

    #[tokio::test]
    #[allow(clippy::arithmetic_side_effects)]
    async fn test_collect_deadline_covers_spin_up() {
        let f = fixture_with(ControlConfig {
            cache_expiration_ms: 0,
            max_plugin_restarts: 0,
            ..ControlConfig::default()
        });
        let key = load(&f, &collector("mock", 1, &["/intel/mock/foo"])).await;
        f.controller
            .create_subscription_group(
                "t1",
                SubscriptionRequest::metrics(vec![RequestedMetric::latest(ns(
                    "/intel/mock/foo",
                ))]),
            )
            .await
            .unwrap();

        // With no restarts allowed, a dead instance leaves the pool empty.
        let instance_id = f.controller.available_plugins()[0].id;
        f.controller.events().publish(ControlEvent::AvailablePluginDead {
            metadata: EventMetadata::new("test"),
            key: key.clone(),
            instance_id,
            reason: "test".to_string(),
        });
        for _ in 0..100 {
            if f.controller.available_plugins().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.controller.available_plugins().is_empty());

        f.launcher.set_launch_delay(Some(Duration::from_secs(5)));
        let started = Instant::now();
        let errors = f
            .controller
            .collect_metrics("t1", started + Duration::from_millis(200), &NamespaceTags::new())
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            errors.as_slice(),
            &[ControlError::Collection(CollectionError::DeadlineExceeded { key })]
        );
    }

    #[tokio::test]
    async fn test_group_hidden_until_resolved() {
        let f = fixture();
        let path = f
            .launcher
            .install(f.dir.path(), collector("mock", 1, &["/intel/mock/foo"]))
            .unwrap();
        f.controller.load_path(&path).await.unwrap();
        f.launcher.set_launch_delay(Some(Duration::from_millis(300)));

        let request =
            SubscriptionRequest::metrics(vec![RequestedMetric::latest(ns("/intel/mock/foo"))]);
        let creating = f.controller.create_subscription_group("t1", request);
        let observe = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            (
                f.controller.subscription("t1").is_none(),
                f.controller
                    .collect_metrics("t1", deadline(), &NamespaceTags::new())
                    .await
                    .is_err(),
            )
        };
        let (created, (hidden, collect_failed)) = tokio::join!(creating, observe);
        created.unwrap();
        assert!(hidden);
        assert!(collect_failed);
        assert_eq!(f.controller.subscription("t1").unwrap().metric_count(), 1);
    }
}
