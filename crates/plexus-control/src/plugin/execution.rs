//! Plugin subprocess start-up and handshake.
//!
//! The plugin gets its [`PluginArgs`] as a JSON document in `argv[1]` and
//! must print a [`HandshakeResponse`] as its first stdout line. Later
//! stdout and stderr lines are forwarded to the log.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use plexus_config::ControlConfig;
use plexus_core::{PluginMeta, PluginType};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::LoadError;

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Arguments handed to a plugin at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginArgs {
    /// Where the plugin should write its own log.
    pub plugin_log_path: Option<PathBuf>,
    /// Ping timeout the plugin should expect.
    pub ping_timeout_ms: u64,
    /// Port to listen on; 0 lets the plugin pick.
    pub listen_port: u16,
    /// TLS certificate.
    pub cert_path: Option<PathBuf>,
    /// TLS private key.
    pub key_path: Option<PathBuf>,
    /// TLS CA certificates.
    pub ca_paths: Vec<PathBuf>,
    /// Whether TLS material is configured.
    pub tls_enabled: bool,
}

impl PluginArgs {
    /// Arguments derived from the control configuration.
    #[must_use]
    pub fn from_config(config: &ControlConfig) -> Self {
        Self {
            plugin_log_path: config.plugin_log_path.clone(),
            ping_timeout_ms: config.health_check_timeout_ms,
            listen_port: config.listen_port,
            cert_path: config.tls.cert_path.clone(),
            key_path: config.tls.key_path.clone(),
            ca_paths: config.tls.ca_paths.clone(),
            tls_enabled: config.tls.enabled(),
        }
    }
}

/// Outcome a plugin reports in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeState {
    /// Ready to serve.
    Success,
    /// Start-up failed.
    Failure,
}

/// First stdout line of a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    /// Plugin metadata.
    pub meta: PluginMeta,
    /// Address the RPC server listens on.
    #[serde(default)]
    pub listen_address: String,
    /// Token to present on every call.
    #[serde(default)]
    pub token: String,
    /// Plugin type.
    #[serde(rename = "type")]
    pub plugin_type: PluginType,
    /// Start-up outcome.
    pub state: HandshakeState,
    /// Failure reason when `state` is `failure`.
    #[serde(default)]
    pub error_message: String,
}

/// A running plugin subprocess.
#[derive(Debug)]
pub struct PluginProcess {
    child: Child,
    name: String,
}

impl PluginProcess {
    /// OS process id, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Name used in log lines.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the process has exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Stop the process: SIGTERM, then SIGKILL after a grace period.
    pub async fn terminate(&mut self) {
        if self.has_exited() {
            return;
        }
        if let Some(pid) = self.child.id().and_then(|pid| i32::try_from(pid).ok()) {
            let pid = nix::unistd::Pid::from_raw(pid);
            if let Err(e) = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM) {
                debug!(plugin = %self.name, error = %e, "SIGTERM failed");
            }
            if tokio::time::timeout(TERMINATE_GRACE, self.child.wait())
                .await
                .is_ok()
            {
                return;
            }
        }
        if let Err(e) = self.child.kill().await {
            warn!(plugin = %self.name, error = %e, "Failed to kill plugin process");
        }
    }
}

/// Start the executable at `path` and wait for its handshake.
///
/// On any failure the process is killed before returning.
///
/// # Errors
///
/// [`LoadError::Spawn`], [`LoadError::HandshakeTimeout`],
/// [`LoadError::PluginDied`], [`LoadError::InvalidHandshake`] or
/// [`LoadError::HandshakeFailed`].
pub async fn start(
    path: &Path,
    args: &PluginArgs,
    timeout: Duration,
) -> Result<(PluginProcess, HandshakeResponse), LoadError> {
    let plugin = path.display().to_string();
    let args_json = serde_json::to_string(args).map_err(|e| LoadError::Spawn {
        plugin: plugin.clone(),
        message: e.to_string(),
    })?;

    let mut child = Command::new(path)
        .arg(args_json)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LoadError::Spawn {
            plugin: plugin.clone(),
            message: e.to_string(),
        })?;

    let name = path
        .file_name()
        .map_or_else(|| plugin.clone(), |n| n.to_string_lossy().into_owned());

    if let Some(stderr) = child.stderr.take() {
        let name = name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(plugin = %name, stream = "stderr", "{line}");
            }
        });
    }

    let Some(stdout) = child.stdout.take() else {
        return Err(LoadError::Spawn {
            plugin,
            message: "stdout not captured".to_string(),
        });
    };
    let mut process = PluginProcess { child, name };
    let mut lines = BufReader::new(stdout).lines();

    let first = match tokio::time::timeout(timeout, lines.next_line()).await {
        Err(_) => {
            process.terminate().await;
            return Err(LoadError::HandshakeTimeout {
                plugin,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            });
        },
        Ok(Ok(Some(line))) => line,
        Ok(Ok(None)) => {
            process.terminate().await;
            return Err(LoadError::PluginDied { plugin });
        },
        Ok(Err(e)) => {
            process.terminate().await;
            return Err(LoadError::InvalidHandshake {
                plugin,
                message: e.to_string(),
            });
        },
    };

    let response: HandshakeResponse = match serde_json::from_str(first.trim()) {
        Ok(response) => response,
        Err(e) => {
            process.terminate().await;
            return Err(LoadError::InvalidHandshake {
                plugin,
                message: e.to_string(),
            });
        },
    };
    if response.state == HandshakeState::Failure {
        process.terminate().await;
        return Err(LoadError::HandshakeFailed {
            plugin,
            message: response.error_message,
        });
    }

    let name = process.name.clone();
    tokio::spawn(async move {
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(plugin = %name, stream = "stdout", "{line}");
        }
    });

    debug!(
        plugin = %process.name,
        pid = ?process.id(),
        address = %response.listen_address,
        "Plugin handshake complete"
    );
    Ok((process, response))
}
