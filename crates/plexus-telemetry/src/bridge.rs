//! Building a [`LogConfig`] from the daemon configuration file.

use plexus_config::LogSection;

use crate::error::TelemetryResult;
use crate::logging::{FileRotation, LogConfig, LogFormat};

/// Translate the `[log]` section of the daemon config.
///
/// # Errors
///
/// Returns [`TelemetryError::ConfigError`](crate::TelemetryError::ConfigError)
/// for an unknown format name.
pub fn log_config_from(section: &LogSection) -> TelemetryResult<LogConfig> {
    let format: LogFormat = section.format.parse()?;
    let mut config = LogConfig::new(section.level.clone()).with_format(format);
    for directive in &section.directives {
        config = config.with_directive(directive.clone());
    }
    if let Some(dir) = &section.directory {
        config = config.with_file_logging(dir, "plexus", FileRotation::Daily);
    }
    Ok(config)
}
