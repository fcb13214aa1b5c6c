use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A config file is not valid TOML or does not fit the schema.
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// File path or a `<...>` marker for in-memory layers.
        path: String,
        /// Underlying TOML error.
        source: toml::de::Error,
    },

    /// An environment override could not be applied.
    #[error("invalid value for environment variable {var}: {message}")]
    EnvError {
        /// Variable name.
        var: String,
        /// What was wrong.
        message: String,
    },

    /// A value failed validation.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What was wrong.
        message: String,
    },

    /// No user config directory could be determined.
    #[error("could not determine the user config directory")]
    NoConfigDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
