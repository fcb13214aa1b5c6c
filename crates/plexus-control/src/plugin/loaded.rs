//! Loaded plugins and the registry that holds them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use plexus_core::{ConfigPolicy, PluginKey, PluginMeta, PluginType};
use plexus_crypto::{ContentHash, Signature};
use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// Lifecycle state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    /// Handshake in progress.
    Loading,
    /// Fully registered.
    Loaded,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Loading => "loading",
            Self::Loaded => "loaded",
        })
    }
}

/// A plugin file asked to be loaded.
#[derive(Debug, Clone)]
pub struct RequestedPlugin {
    path: PathBuf,
    checksum: ContentHash,
    signature: Option<Signature>,
}

impl RequestedPlugin {
    /// Hash the file at `path` and pick up `<path>.sig` if present.
    ///
    /// # Errors
    ///
    /// [`LoadError::Io`] when the file cannot be hashed, or
    /// [`LoadError::Signature`] when the signature file is malformed.
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self, LoadError> {
        let path = path.into();
        let checksum = ContentHash::hash_file(&path).map_err(|e| LoadError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let sig_path = signature_path(&path);
        let signature = if sig_path.is_file() {
            Some(
                Signature::read_file(&sig_path).map_err(|e| LoadError::Signature {
                    plugin: path.display().to_string(),
                    source: e,
                })?,
            )
        } else {
            None
        };
        Ok(Self {
            path,
            checksum,
            signature,
        })
    }

    /// Use `signature` instead of any signature file.
    #[must_use]
    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Executable path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// BLAKE3 checksum of the executable.
    #[must_use]
    pub fn checksum(&self) -> &ContentHash {
        &self.checksum
    }

    /// Detached signature over the checksum.
    #[must_use]
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }
}

/// Location of the detached signature for a plugin file.
#[must_use]
pub fn signature_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sig");
    PathBuf::from(name)
}

/// A plugin known to the catalog.
#[derive(Debug, Clone)]
pub struct LoadedPlugin {
    /// Handshake metadata.
    pub meta: PluginMeta,
    /// Executable path.
    pub path: PathBuf,
    /// Checksum recorded at load.
    pub checksum: ContentHash,
    /// Signature recorded at load.
    pub signature: Option<Signature>,
    /// Whether the signature was verified.
    pub signed: bool,
    /// Config policy reported at load.
    pub policy: ConfigPolicy,
    /// Registry state.
    pub status: PluginStatus,
    /// Load time.
    pub loaded_at: DateTime<Utc>,
}

impl LoadedPlugin {
    /// Registry key.
    #[must_use]
    pub fn key(&self) -> PluginKey {
        self.meta.key()
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Plugin version.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.meta.version
    }

    /// Plugin type.
    #[must_use]
    pub fn plugin_type(&self) -> PluginType {
        self.meta.plugin_type
    }
}

/// Every loaded (or loading) plugin, by key.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: RwLock<BTreeMap<PluginKey, Arc<LoadedPlugin>>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PluginKey, Arc<LoadedPlugin>>> {
        self.plugins.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<PluginKey, Arc<LoadedPlugin>>> {
        self.plugins.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim a key for a load in progress.
    ///
    /// # Errors
    ///
    /// [`LoadError::AlreadyLoaded`] when the key is taken.
    pub fn reserve(&self, plugin: LoadedPlugin) -> Result<(), LoadError> {
        let key = plugin.key();
        let mut plugins = self.write();
        if plugins.contains_key(&key) {
            return Err(LoadError::AlreadyLoaded { key });
        }
        plugins.insert(
            key,
            Arc::new(LoadedPlugin {
                status: PluginStatus::Loading,
                ..plugin
            }),
        );
        Ok(())
    }

    /// Replace a reservation with the fully loaded entry.
    pub fn complete(&self, plugin: LoadedPlugin) -> Arc<LoadedPlugin> {
        let entry = Arc::new(LoadedPlugin {
            status: PluginStatus::Loaded,
            ..plugin
        });
        self.write().insert(entry.key(), Arc::clone(&entry));
        entry
    }

    /// Remove an entry regardless of state.
    pub fn remove(&self, key: &PluginKey) -> Option<Arc<LoadedPlugin>> {
        self.write().remove(key)
    }

    /// Remove a fully loaded entry.
    ///
    /// # Errors
    ///
    /// [`LoadError::NotLoaded`] for an unknown key and
    /// [`LoadError::NotInLoadedState`] for an entry still loading.
    pub fn remove_loaded(&self, key: &PluginKey) -> Result<Arc<LoadedPlugin>, LoadError> {
        let mut plugins = self.write();
        let status = plugins
            .get(key)
            .map(|p| p.status)
            .ok_or_else(|| LoadError::NotLoaded { key: key.clone() })?;
        if status != PluginStatus::Loaded {
            return Err(LoadError::NotInLoadedState {
                key: key.clone(),
                status: status.to_string(),
            });
        }
        plugins
            .remove(key)
            .ok_or_else(|| LoadError::NotLoaded { key: key.clone() })
    }

    /// A fully loaded entry by exact key.
    #[must_use]
    pub fn get(&self, key: &PluginKey) -> Option<Arc<LoadedPlugin>> {
        self.read()
            .get(key)
            .filter(|p| p.status == PluginStatus::Loaded)
            .cloned()
    }

    /// A fully loaded entry; a version below 1 picks the latest.
    #[must_use]
    pub fn resolve(&self, plugin_type: PluginType, name: &str, version: i32) -> Option<Arc<LoadedPlugin>> {
        if version >= 1 {
            return self.get(&PluginKey::new(plugin_type, name, version));
        }
        self.read()
            .values()
            .filter(|p| {
                p.status == PluginStatus::Loaded
                    && p.plugin_type() == plugin_type
                    && p.name() == name
            })
            .max_by_key(|p| p.version())
            .cloned()
    }

    /// Loaded versions of a plugin, ascending.
    #[must_use]
    pub fn versions(&self, plugin_type: PluginType, name: &str) -> Vec<i32> {
        self.read()
            .values()
            .filter(|p| {
                p.status == PluginStatus::Loaded
                    && p.plugin_type() == plugin_type
                    && p.name() == name
            })
            .map(|p| p.version())
            .collect()
    }

    /// Every fully loaded entry.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<LoadedPlugin>> {
        self.read()
            .values()
            .filter(|p| p.status == PluginStatus::Loaded)
            .cloned()
            .collect()
    }

    /// Number of entries, including reservations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(name: &str, version: i32) -> LoadedPlugin {
        LoadedPlugin {
            meta: PluginMeta::new(PluginType::Collector, name, version),
            path: PathBuf::from("/plugins").join(name),
            checksum: ContentHash::hash(name.as_bytes()),
            signature: None,
            signed: false,
            policy: ConfigPolicy::default(),
            status: PluginStatus::Loading,
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn test_reserve_rejects_duplicates() {
        let registry = PluginRegistry::new();
        registry.reserve(loaded("mock", 1)).unwrap();
        let err = registry.reserve(loaded("mock", 1)).unwrap_err();
        assert_eq!(err.to_string(), "plugin is already loaded: collector:mock:1");
    }

    #[test]
    fn test_reservation_is_invisible_until_complete() {
        let registry = PluginRegistry::new();
        let key = PluginKey::new(PluginType::Collector, "mock", 1);
        registry.reserve(loaded("mock", 1)).unwrap();
        assert!(registry.get(&key).is_none());
        assert!(matches!(
            registry.remove_loaded(&key).unwrap_err(),
            LoadError::NotInLoadedState { .. }
        ));

        registry.complete(loaded("mock", 1));
        assert_eq!(registry.get(&key).unwrap().status, PluginStatus::Loaded);
        registry.remove_loaded(&key).unwrap();
        assert!(matches!(
            registry.remove_loaded(&key).unwrap_err(),
            LoadError::NotLoaded { .. }
        ));
    }

    #[test]
    fn test_resolve_latest() {
        let registry = PluginRegistry::new();
        registry.complete(loaded("mock", 1));
        registry.complete(loaded("mock", 3));
        registry.complete(loaded("other", 7));
        assert_eq!(
            registry
                .resolve(PluginType::Collector, "mock", -1)
                .unwrap()
                .version(),
            3
        );
        assert_eq!(
            registry
                .resolve(PluginType::Collector, "mock", 1)
                .unwrap()
                .version(),
            1
        );
        assert!(registry.resolve(PluginType::Publisher, "mock", -1).is_none());
        assert_eq!(registry.versions(PluginType::Collector, "mock"), vec![1, 3]);
    }

    #[test]
    fn test_requested_plugin_reads_signature_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin");
        std::fs::write(&path, b"#!/bin/sh\n").unwrap();

        let requested = RequestedPlugin::from_path(&path).unwrap();
        assert!(requested.signature().is_none());
        assert_eq!(*requested.checksum(), ContentHash::hash(b"#!/bin/sh\n"));

        let keypair = plexus_crypto::KeyPair::generate();
        let signature = keypair.sign(requested.checksum().as_bytes());
        std::fs::write(signature_path(&path), signature.to_base64()).unwrap();
        let requested = RequestedPlugin::from_path(&path).unwrap();
        assert_eq!(requested.signature(), Some(&signature));
    }
}
