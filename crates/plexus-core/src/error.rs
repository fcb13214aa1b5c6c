//! Error types for core domain parsing and config policy processing.

use thiserror::Error;

/// Errors produced while parsing core domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A namespace string could not be parsed.
    #[error("invalid namespace `{namespace}`: {reason}")]
    InvalidNamespace {
        /// The offending input.
        namespace: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Unknown plugin type name.
    #[error("unknown plugin type: {0}")]
    UnknownPluginType(String),

    /// A plugin key did not have the `type:name:version` shape.
    #[error("invalid plugin key `{0}`, expected type:name:version")]
    InvalidPluginKey(String),
}

/// Result type for core parsing operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// A config value violated a policy rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// A required key was not supplied and has no default.
    #[error("required key missing ({key})")]
    RequiredKeyMissing {
        /// Config key.
        key: String,
    },

    /// The supplied value has the wrong type.
    #[error("type mismatch ({key} wanted type '{wanted}' but provided type '{provided}')")]
    TypeMismatch {
        /// Config key.
        key: String,
        /// Type required by the rule.
        wanted: &'static str,
        /// Type actually supplied.
        provided: &'static str,
    },

    /// Numeric value below the rule's minimum.
    #[error("value is under minimum ({key} value {value} < {minimum})")]
    UnderMinimum {
        /// Config key.
        key: String,
        /// Supplied value.
        value: String,
        /// Rule minimum.
        minimum: String,
    },

    /// Numeric value above the rule's maximum.
    #[error("value is over maximum ({key} value {value} > {maximum})")]
    OverMaximum {
        /// Config key.
        key: String,
        /// Supplied value.
        value: String,
        /// Rule maximum.
        maximum: String,
    },
}

impl PolicyError {
    /// The config key the error refers to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::RequiredKeyMissing { key }
            | Self::TypeMismatch { key, .. }
            | Self::UnderMinimum { key, .. }
            | Self::OverMaximum { key, .. } => key,
        }
    }
}

/// Result type for policy rule construction and validation.
pub type PolicyResult<T> = Result<T, PolicyError>;
