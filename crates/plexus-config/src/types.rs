use std::path::PathBuf;
use std::time::Duration;

use plexus_core::NamespaceTags;
use serde::{Deserialize, Serialize};

use crate::plugins::PluginConfig;

/// Control plane configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Instances a single pool may run.
    pub max_running_plugins: usize,
    /// Seconds to wait for a plugin handshake.
    pub plugin_load_timeout_secs: u64,
    /// `disabled`, `enabled` or `warn`.
    pub plugin_trust_level: String,
    /// Keyring files with trusted public keys.
    pub keyring_paths: Vec<PathBuf>,
    /// Metric cache lifetime in milliseconds; 0 disables caching.
    pub cache_expiration_ms: u64,
    /// Restarts of a dead instance before giving up.
    pub max_plugin_restarts: u32,
    /// Seconds between health check rounds.
    pub health_check_interval_secs: u64,
    /// Ping timeout in milliseconds.
    pub health_check_timeout_ms: u64,
    /// Consecutive failures before an instance is declared dead.
    pub health_check_failure_limit: u32,
    /// RPC timeout in milliseconds when no caller deadline applies.
    pub client_timeout_ms: u64,
    /// Port handed to plugins; 0 lets each plugin pick.
    pub listen_port: u16,
    /// Directory for per-plugin scratch space; system temp when unset.
    pub temp_dir_path: Option<PathBuf>,
    /// Log file handed to plugins.
    pub plugin_log_path: Option<PathBuf>,
    /// TLS material handed to plugins.
    pub tls: TlsSection,
    /// Refuse to unload plugins a running task still depends on.
    pub guard_unload: bool,
    /// Tags applied to collected metrics by namespace prefix.
    pub tags: NamespaceTags,
    /// Layered plugin config.
    pub plugins: PluginConfig,
    /// Logging.
    pub log: LogSection,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_running_plugins: 3,
            plugin_load_timeout_secs: 3,
            plugin_trust_level: "enabled".to_owned(),
            keyring_paths: Vec::new(),
            cache_expiration_ms: 500,
            max_plugin_restarts: 10,
            health_check_interval_secs: 5,
            health_check_timeout_ms: 1000,
            health_check_failure_limit: 3,
            client_timeout_ms: 3000,
            listen_port: 0,
            temp_dir_path: None,
            plugin_log_path: None,
            tls: TlsSection::default(),
            guard_unload: false,
            tags: NamespaceTags::new(),
            plugins: PluginConfig::default(),
            log: LogSection::default(),
        }
    }
}

impl ControlConfig {
    /// Handshake timeout.
    #[must_use]
    pub fn plugin_load_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_load_timeout_secs)
    }

    /// Metric cache lifetime.
    #[must_use]
    pub fn cache_expiration(&self) -> Duration {
        Duration::from_millis(self.cache_expiration_ms)
    }

    /// Interval between health check rounds.
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Ping timeout for health checks.
    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Default RPC timeout.
    #[must_use]
    pub fn client_timeout(&self) -> Duration {
        Duration::from_millis(self.client_timeout_ms)
    }

    /// Scratch directory root.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir_path.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// TLS material passed to plugins at launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    /// Certificate file.
    pub cert_path: Option<PathBuf>,
    /// Private key file.
    pub key_path: Option<PathBuf>,
    /// CA certificate files.
    pub ca_paths: Vec<PathBuf>,
}

impl TlsSection {
    /// Whether a certificate and key are configured.
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Base level.
    pub level: String,
    /// `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Extra filter directives.
    pub directives: Vec<String>,
    /// Write rotating log files here instead of stderr.
    pub directory: Option<PathBuf>,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directives: Vec::new(),
            directory: None,
        }
    }
}
