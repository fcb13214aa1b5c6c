//! Starting plugin instances.
//!
//! [`PluginLauncher`] is the seam between the control plane and real
//! subprocesses; tests substitute an in-process launcher.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plexus_core::PluginMeta;

use super::client::PluginClient;
use super::execution::{self, PluginArgs, PluginProcess};
use super::jsonrpc::JsonRpcClient;
use crate::error::LoadError;

/// A started plugin: its metadata, RPC handle and (for real subprocesses)
/// the process itself.
pub struct LaunchedPlugin {
    /// Metadata from the handshake.
    pub meta: PluginMeta,
    /// RPC handle.
    pub client: PluginClient,
    /// The subprocess, if any.
    pub process: Option<PluginProcess>,
}

impl fmt::Debug for LaunchedPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedPlugin")
            .field("meta", &self.meta)
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

impl LaunchedPlugin {
    /// Ask the plugin to exit and stop its process.
    pub async fn shutdown(mut self, reason: &str) {
        if let Err(e) = self.client.kill(reason).await {
            tracing::debug!(plugin = %self.meta.key(), error = %e, "Kill RPC failed");
        }
        if let Some(process) = self.process.as_mut() {
            process.terminate().await;
        }
    }
}

/// Starts plugin executables.
#[async_trait]
pub trait PluginLauncher: Send + Sync + fmt::Debug {
    /// Start the plugin at `path` and complete its handshake within
    /// `timeout`.
    async fn launch(
        &self,
        path: &Path,
        args: &PluginArgs,
        timeout: Duration,
    ) -> Result<LaunchedPlugin, LoadError>;
}

/// Launches real executables speaking JSON-RPC.
#[derive(Debug, Clone)]
pub struct ExecLauncher {
    client_timeout: Duration,
}

impl ExecLauncher {
    /// Create a launcher whose clients time out after `client_timeout`.
    #[must_use]
    pub fn new(client_timeout: Duration) -> Self {
        Self { client_timeout }
    }
}

#[async_trait]
impl PluginLauncher for ExecLauncher {
    async fn launch(
        &self,
        path: &Path,
        args: &PluginArgs,
        timeout: Duration,
    ) -> Result<LaunchedPlugin, LoadError> {
        let (mut process, handshake) = execution::start(path, args, timeout).await?;
        if handshake.meta.plugin_type != handshake.plugin_type {
            process.terminate().await;
            return Err(LoadError::InvalidHandshake {
                plugin: path.display().to_string(),
                message: format!(
                    "meta type {} does not match handshake type {}",
                    handshake.meta.plugin_type, handshake.plugin_type
                ),
            });
        }
        let rpc = Arc::new(JsonRpcClient::new(
            handshake.listen_address,
            handshake.token,
            self.client_timeout,
        ));
        Ok(LaunchedPlugin {
            client: PluginClient::for_type(handshake.plugin_type, rpc),
            meta: handshake.meta,
            process: Some(process),
        })
    }
}
