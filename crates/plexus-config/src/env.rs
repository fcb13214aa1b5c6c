//! `PLEXUS_*` environment variable overrides.
//!
//! Environment variables override every file layer. A value is parsed
//! according to the type of the value it replaces; `keyring_paths` and
//! `log.directives` take a comma separated list.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: ValueKind,
}

#[derive(Debug, Clone, Copy)]
enum ValueKind {
    Str,
    Int,
    Bool,
    List,
}

const fn mapping(var_name: &'static str, field_path: &'static str, kind: ValueKind) -> EnvMapping {
    EnvMapping {
        var_name,
        field_path,
        kind,
    }
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    mapping("PLEXUS_MAX_RUNNING_PLUGINS", "max_running_plugins", ValueKind::Int),
    mapping("PLEXUS_PLUGIN_LOAD_TIMEOUT_SECS", "plugin_load_timeout_secs", ValueKind::Int),
    mapping("PLEXUS_PLUGIN_TRUST_LEVEL", "plugin_trust_level", ValueKind::Str),
    mapping("PLEXUS_KEYRING_PATHS", "keyring_paths", ValueKind::List),
    mapping("PLEXUS_CACHE_EXPIRATION_MS", "cache_expiration_ms", ValueKind::Int),
    mapping("PLEXUS_MAX_PLUGIN_RESTARTS", "max_plugin_restarts", ValueKind::Int),
    mapping("PLEXUS_HEALTH_CHECK_INTERVAL_SECS", "health_check_interval_secs", ValueKind::Int),
    mapping("PLEXUS_HEALTH_CHECK_TIMEOUT_MS", "health_check_timeout_ms", ValueKind::Int),
    mapping("PLEXUS_HEALTH_CHECK_FAILURE_LIMIT", "health_check_failure_limit", ValueKind::Int),
    mapping("PLEXUS_CLIENT_TIMEOUT_MS", "client_timeout_ms", ValueKind::Int),
    mapping("PLEXUS_LISTEN_PORT", "listen_port", ValueKind::Int),
    mapping("PLEXUS_TEMP_DIR_PATH", "temp_dir_path", ValueKind::Str),
    mapping("PLEXUS_PLUGIN_LOG_PATH", "plugin_log_path", ValueKind::Str),
    mapping("PLEXUS_GUARD_UNLOAD", "guard_unload", ValueKind::Bool),
    mapping("PLEXUS_TLS_CERT_PATH", "tls.cert_path", ValueKind::Str),
    mapping("PLEXUS_TLS_KEY_PATH", "tls.key_path", ValueKind::Str),
    mapping("PLEXUS_LOG_LEVEL", "log.level", ValueKind::Str),
    mapping("PLEXUS_LOG_FORMAT", "log.format", ValueKind::Str),
    mapping("PLEXUS_LOG_DIRECTIVES", "log.directives", ValueKind::List),
    mapping("PLEXUS_LOG_DIRECTORY", "log.directory", ValueKind::Str),
];

/// Snapshot of the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Apply every known `PLEXUS_*` variable in `env_vars` to `merged`.
///
/// Returns the number of variables applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a value cannot be parsed as the
/// field's type.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<usize> {
    let mut count: usize = 0;
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let value = parse_value(mapping, raw)?;
        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying environment override"
        );
        set_field(merged, mapping.field_path, value);
        count = count.saturating_add(1);
    }
    Ok(count)
}

fn parse_value(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    let raw = raw.trim();
    let invalid = |message: String| ConfigError::EnvError {
        var: mapping.var_name.to_owned(),
        message,
    };
    match mapping.kind {
        ValueKind::Str => Ok(toml::Value::String(raw.to_owned())),
        ValueKind::Int => raw
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| invalid(format!("expected an integer: {e}"))),
        ValueKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            other => Err(invalid(format!("expected a boolean, got '{other}'"))),
        },
        ValueKind::List => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
    }
}

/// Set a dotted field path, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let mut current = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let toml::Value::Table(table) = current else {
            return;
        };
        if segments.peek().is_none() {
            table.insert(segment.to_owned(), value);
            return;
        }
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_apply_env_overrides() {
        let mut merged: toml::Value =
            toml::from_str("max_running_plugins = 3\n[log]\nlevel = \"info\"").unwrap();
        let env = make_env(&[
            ("PLEXUS_MAX_RUNNING_PLUGINS", "7"),
            ("PLEXUS_LOG_LEVEL", "debug"),
            ("PLEXUS_GUARD_UNLOAD", "yes"),
            ("UNRELATED", "x"),
        ]);

        let count = apply_env_overrides(&mut merged, &env).unwrap();

        assert_eq!(count, 3);
        assert_eq!(merged["max_running_plugins"].as_integer(), Some(7));
        assert_eq!(merged["log"]["level"].as_str(), Some("debug"));
        assert_eq!(merged["guard_unload"].as_bool(), Some(true));
    }

    #[test]
    fn test_creates_missing_tables() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let env = make_env(&[("PLEXUS_TLS_CERT_PATH", "/etc/plexus/cert.pem")]);
        apply_env_overrides(&mut merged, &env).unwrap();
        assert_eq!(merged["tls"]["cert_path"].as_str(), Some("/etc/plexus/cert.pem"));
    }

    #[test]
    fn test_list_values() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let env = make_env(&[("PLEXUS_KEYRING_PATHS", "/a.keys, /b.keys,")]);
        apply_env_overrides(&mut merged, &env).unwrap();
        let paths = merged["keyring_paths"].as_array().unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[1].as_str(), Some("/b.keys"));
    }

    #[test]
    fn test_bad_integer_rejected() {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let env = make_env(&[("PLEXUS_LISTEN_PORT", "eighty")]);
        let err = apply_env_overrides(&mut merged, &env).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { ref var, .. } if var == "PLEXUS_LISTEN_PORT"));
    }
}
