//! Loading plugins into the catalog and starting their instances.
//!
//! A load starts the executable once to learn its metadata, policy and
//! (for collectors) metrics, registers all of it, then stops that process.
//! Instances that serve calls are started later by the runner through
//! [`PluginLoader::spawn_instance`].

use std::sync::Arc;

use chrono::Utc;
use plexus_config::ControlConfig;
use plexus_core::{ConfigPolicy, PluginKey, STD_TAG_PLUGIN_RUNNING_ON};
use plexus_crypto::{ContentHash, PluginSigner, Signature};
use plexus_events::{ControlEvent, EventBus, EventMetadata};
use tracing::{debug, info, warn};

use crate::catalog::{CatalogedMetric, MetricCatalog};
use crate::error::LoadError;
use crate::plugin::{
    LaunchedPlugin, LoadedPlugin, PluginArgs, PluginLauncher, PluginRegistry, PluginStatus,
    RequestedPlugin,
};

/// Loads and unloads plugins.
#[derive(Debug)]
pub struct PluginLoader {
    registry: Arc<PluginRegistry>,
    catalog: Arc<MetricCatalog>,
    launcher: Arc<dyn PluginLauncher>,
    signer: Arc<PluginSigner>,
    config: Arc<ControlConfig>,
    bus: EventBus,
    hostname: String,
}

impl PluginLoader {
    /// Create a loader writing into `registry` and `catalog`.
    #[must_use]
    pub fn new(
        registry: Arc<PluginRegistry>,
        catalog: Arc<MetricCatalog>,
        launcher: Arc<dyn PluginLauncher>,
        signer: Arc<PluginSigner>,
        config: Arc<ControlConfig>,
        bus: EventBus,
    ) -> Self {
        let hostname = nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|e| {
                warn!(error = %e, "Cannot read host name");
                "localhost".to_string()
            });
        Self {
            registry,
            catalog,
            launcher,
            signer,
            config,
            bus,
            hostname,
        }
    }

    /// Host name stamped on advertised metrics.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    fn verify(
        &self,
        plugin: &str,
        checksum: &ContentHash,
        signature: Option<&Signature>,
    ) -> Result<bool, LoadError> {
        self.signer
            .verify_plugin(plugin, checksum, signature)
            .map_err(|source| LoadError::Signature {
                plugin: plugin.to_string(),
                source,
            })
    }

    /// Load a plugin executable.
    ///
    /// Nothing is registered unless the whole handshake succeeds, and the
    /// process started for the handshake is always stopped.
    ///
    /// # Errors
    ///
    /// Signature, start-up, handshake and RPC failures, or
    /// [`LoadError::AlreadyLoaded`].
    pub async fn load(&self, requested: &RequestedPlugin) -> Result<Arc<LoadedPlugin>, LoadError> {
        let path = requested.path().display().to_string();
        let signed = self.verify(&path, requested.checksum(), requested.signature())?;

        let args = PluginArgs::from_config(&self.config);
        let launched = self
            .launcher
            .launch(requested.path(), &args, self.config.plugin_load_timeout())
            .await?;
        let key = launched.meta.key();

        let entry = LoadedPlugin {
            meta: launched.meta.clone(),
            path: requested.path().to_path_buf(),
            checksum: *requested.checksum(),
            signature: requested.signature().copied(),
            signed,
            policy: ConfigPolicy::default(),
            status: PluginStatus::Loading,
            loaded_at: Utc::now(),
        };
        if let Err(e) = self.registry.reserve(entry.clone()) {
            launched.shutdown("plugin already loaded").await;
            return Err(e);
        }

        let outcome = self.handshake(&launched, &key).await;
        launched.shutdown("load complete").await;

        let (policy, metrics) = match outcome {
            Ok(found) => found,
            Err(e) => {
                self.registry.remove(&key);
                warn!(plugin = %key, error = %e, "Plugin load failed");
                return Err(e);
            },
        };

        let count = metrics.len();
        self.catalog.add_all(metrics);
        let loaded = self.registry.complete(LoadedPlugin { policy, ..entry });
        info!(plugin = %key, metrics = count, signed, "Plugin loaded");
        self.bus.publish(ControlEvent::PluginLoaded {
            metadata: EventMetadata::new("loader"),
            key,
            signed,
        });
        Ok(loaded)
    }

    async fn handshake(
        &self,
        launched: &LaunchedPlugin,
        key: &PluginKey,
    ) -> Result<(ConfigPolicy, Vec<CatalogedMetric>), LoadError> {
        let rpc = |source| LoadError::Rpc {
            key: key.clone(),
            source,
        };
        launched.client.ping().await.map_err(rpc)?;
        let policy = launched.client.get_config_policy().await.map_err(rpc)?;

        let Some(collector) = launched.client.as_collector() else {
            return Ok((policy, Vec::new()));
        };

        let mut config = self
            .config
            .plugins
            .get(key.plugin_type, &key.name, key.version);
        config.apply_defaults(&policy.root().defaults());
        let advertised = collector.get_metric_types(&config).await.map_err(rpc)?;
        debug!(plugin = %key, advertised = advertised.len(), "Metric types received");

        let mut metrics = Vec::with_capacity(advertised.len());
        for mut metric in advertised {
            if metric.version < 1 {
                metric.version = key.version;
            }
            if metric.version < 1 {
                return Err(LoadError::InvalidMetricVersion {
                    key: key.clone(),
                    namespace: metric.namespace.to_string(),
                    version: metric.version,
                });
            }
            metric
                .tags
                .insert(STD_TAG_PLUGIN_RUNNING_ON.to_string(), self.hostname.clone());
            let node = policy.get(&metric.namespace.strings());
            metrics.push(CatalogedMetric::from_advertised(metric, key.clone(), node));
        }
        Ok((policy, metrics))
    }

    /// Remove a plugin and its metrics from the catalog.
    ///
    /// Running instances are left alone.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotLoaded`] or [`LoadError::NotInLoadedState`].
    pub fn unload(&self, key: &PluginKey) -> Result<Arc<LoadedPlugin>, LoadError> {
        let removed = self.registry.remove_loaded(key)?;
        let metrics = self.catalog.delete_by_plugin(key);
        info!(plugin = %key, metrics, "Plugin unloaded");
        self.bus.publish(ControlEvent::PluginUnloaded {
            metadata: EventMetadata::new("loader"),
            key: key.clone(),
        });
        Ok(removed)
    }

    /// Start a serving instance of a loaded plugin.
    ///
    /// The executable must still match the checksum and signature recorded
    /// at load.
    ///
    /// # Errors
    ///
    /// [`LoadError::ChecksumMismatch`], signature and start-up failures, or
    /// [`LoadError::InvalidHandshake`] when the process reports a different
    /// key.
    pub async fn spawn_instance(&self, plugin: &LoadedPlugin) -> Result<LaunchedPlugin, LoadError> {
        let name = plugin.path.display().to_string();
        let checksum = ContentHash::hash_file(&plugin.path).map_err(|e| LoadError::Io {
            path: name.clone(),
            message: e.to_string(),
        })?;
        if checksum != plugin.checksum {
            return Err(LoadError::ChecksumMismatch { plugin: name });
        }
        self.verify(&name, &checksum, plugin.signature.as_ref())?;

        let args = PluginArgs::from_config(&self.config);
        let launched = self
            .launcher
            .launch(&plugin.path, &args, self.config.plugin_load_timeout())
            .await?;
        if launched.meta.key() != plugin.key() {
            let message = format!(
                "expected {} but the process reported {}",
                plugin.key(),
                launched.meta.key()
            );
            launched.shutdown("unexpected plugin").await;
            return Err(LoadError::InvalidHandshake {
                plugin: name,
                message,
            });
        }
        Ok(launched)
    }
}
