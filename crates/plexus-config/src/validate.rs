use crate::error::{ConfigError, ConfigResult};
use crate::types::ControlConfig;

const TRUST_LEVELS: &[&str] = &["disabled", "enabled", "warn"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json", "full"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Validate a loaded configuration.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &ControlConfig) -> ConfigResult<()> {
    validate_pool(config)?;
    validate_health(config)?;
    validate_trust(config)?;
    validate_tls(config)?;
    validate_tags(config)?;
    validate_log(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_pool(config: &ControlConfig) -> ConfigResult<()> {
    if config.max_running_plugins == 0 {
        return Err(invalid("max_running_plugins", "must be at least 1"));
    }
    if config.plugin_load_timeout_secs == 0 {
        return Err(invalid("plugin_load_timeout_secs", "must be at least 1"));
    }
    if config.client_timeout_ms == 0 {
        return Err(invalid("client_timeout_ms", "must be at least 1"));
    }
    Ok(())
}

fn validate_health(config: &ControlConfig) -> ConfigResult<()> {
    if config.health_check_interval_secs == 0 {
        return Err(invalid("health_check_interval_secs", "must be at least 1"));
    }
    if config.health_check_timeout_ms == 0 {
        return Err(invalid("health_check_timeout_ms", "must be at least 1"));
    }
    if config.health_check_failure_limit == 0 {
        return Err(invalid("health_check_failure_limit", "must be at least 1"));
    }
    Ok(())
}

fn validate_trust(config: &ControlConfig) -> ConfigResult<()> {
    let level = config.plugin_trust_level.to_ascii_lowercase();
    if !TRUST_LEVELS.contains(&level.as_str()) {
        return Err(invalid(
            "plugin_trust_level",
            format!(
                "unknown trust level '{}', expected one of {}",
                config.plugin_trust_level,
                TRUST_LEVELS.join(", ")
            ),
        ));
    }
    Ok(())
}

fn validate_tls(config: &ControlConfig) -> ConfigResult<()> {
    match (&config.tls.cert_path, &config.tls.key_path) {
        (Some(_), None) => Err(invalid("tls.key_path", "required when tls.cert_path is set")),
        (None, Some(_)) => Err(invalid("tls.cert_path", "required when tls.key_path is set")),
        _ => Ok(()),
    }
}

fn validate_tags(config: &ControlConfig) -> ConfigResult<()> {
    for prefix in config.tags.keys() {
        if !prefix.starts_with('/') {
            return Err(invalid(
                &format!("tags.{prefix}"),
                "tag prefixes must start with '/'",
            ));
        }
    }
    Ok(())
}

fn validate_log(config: &ControlConfig) -> ConfigResult<()> {
    if !LOG_FORMATS.contains(&config.log.format.as_str()) {
        return Err(invalid(
            "log.format",
            format!("expected one of {}", LOG_FORMATS.join(", ")),
        ));
    }
    if !LOG_LEVELS.contains(&config.log.level.to_ascii_lowercase().as_str()) {
        return Err(invalid(
            "log.level",
            format!("expected one of {}", LOG_LEVELS.join(", ")),
        ));
    }
    Ok(())
}
