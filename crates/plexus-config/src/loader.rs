//! Config file discovery and layered loading.
//!
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge the explicit file, or the user config file when none is given
//! 3. Apply `PLEXUS_*` environment overrides
//! 4. Deserialize into [`ControlConfig`]
//! 5. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::ControlConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Load configuration using the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is malformed, an environment value
/// is unparsable, or the merged configuration fails validation.
pub fn load(path: Option<&Path>) -> ConfigResult<ControlConfig> {
    load_with_env(path, &collect_env_vars())
}

/// Load configuration with an explicit environment map.
///
/// An explicit `path` must exist. Without one, the user config file is
/// used if present.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    path: Option<&Path>,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ControlConfig> {
    let mut merged = defaults_value()?;

    match path {
        Some(path) => {
            let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
                path: path.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
            deep_merge(&mut merged, &overlay);
            info!(path = %path.display(), "loaded config file");
        },
        None => {
            if let Ok(user_path) = user_config_path()
                && let Some(overlay) = try_load_file(&user_path)?
            {
                deep_merge(&mut merged, &overlay);
                info!(path = %user_path.display(), "loaded user config");
            }
        },
    }

    let env_count = apply_env_overrides(&mut merged, env_vars)?;
    if env_count > 0 {
        debug!(count = env_count, "applied environment overrides");
    }

    let config: ControlConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    validate::validate(&config)?;
    Ok(config)
}

/// Load a config from a specific file path, layered only over defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_file(path: &Path) -> ConfigResult<ControlConfig> {
    load_with_env(Some(path), &HashMap::<String, String>::new())
}

/// Parse a config from a TOML string, layered over defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the string cannot be parsed or validated.
pub fn load_str(content: &str) -> ConfigResult<ControlConfig> {
    let mut merged = defaults_value()?;
    let overlay: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: "<inline>".to_owned(),
        source: e,
    })?;
    deep_merge(&mut merged, &overlay);
    let config: ControlConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<inline>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Location of the user config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoConfigDir`] when the platform has no config dir.
pub fn user_config_path() -> ConfigResult<PathBuf> {
    directories::ProjectDirs::from("", "", "plexus")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

fn defaults_value() -> ConfigResult<toml::Value> {
    toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })
}

/// Try to load a file, returning `None` if it doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}
