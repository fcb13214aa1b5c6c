//! A started controller backed by mock plugins.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use plexus_config::ControlConfig;
use plexus_control::{Controller, ControllerBuilder, PluginLauncher};
use plexus_core::PluginKey;
use plexus_crypto::PluginSigner;
use tempfile::TempDir;
use tokio::time::Instant;

use crate::{MockLauncher, MockPlugin, init_test_logging, test_control_config};

/// Collection deadline used by [`ControlHarness::deadline`].
pub const TEST_DEADLINE: Duration = Duration::from_secs(5);

/// A started [`Controller`] whose plugins are [`MockPlugin`]s.
///
/// Owns a `TempDir` holding the stand-in plugin files. The tempdir is
/// cleaned up when the harness is dropped. Must be created inside a Tokio
/// runtime.
#[derive(Debug)]
pub struct ControlHarness {
    /// The controller under test.
    pub controller: Controller,
    /// The launcher serving mock plugins.
    pub launcher: Arc<MockLauncher>,
    dir: TempDir,
}

impl ControlHarness {
    /// A harness using [`test_control_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_control_config())
    }

    /// A harness using `config`. Signatures are never checked.
    #[must_use]
    pub fn with_config(config: ControlConfig) -> Self {
        init_test_logging();
        let dir = TempDir::new().expect("failed to create tempdir");
        let launcher = Arc::new(MockLauncher::new());
        let controller = ControllerBuilder::new(config)
            .with_launcher(Arc::clone(&launcher) as Arc<dyn PluginLauncher>)
            .with_signer(PluginSigner::disabled())
            .build()
            .expect("failed to build controller");
        controller.start();
        Self {
            controller,
            launcher,
            dir,
        }
    }

    /// Directory holding installed plugin files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write a stand-in file for `mock` and register it with the launcher.
    #[must_use]
    pub fn install(&self, mock: &MockPlugin) -> PathBuf {
        self.launcher
            .install(self.dir.path(), mock.clone())
            .expect("failed to install mock plugin")
    }

    /// Install and load `mock`, returning its key.
    pub async fn load(&self, mock: &MockPlugin) -> PluginKey {
        let path = self.install(mock);
        self.controller
            .load_path(&path)
            .await
            .unwrap_or_else(|e| panic!("failed to load {}: {e}", path.display()))
            .key()
    }

    /// A deadline [`TEST_DEADLINE`] from now.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        Instant::now()
            .checked_add(TEST_DEADLINE)
            .expect("deadline out of range")
    }
}

impl Default for ControlHarness {
    fn default() -> Self {
        Self::new()
    }
}
