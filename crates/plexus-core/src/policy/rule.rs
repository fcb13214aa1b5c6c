//! Individual config policy rules.

use serde::{Deserialize, Serialize};

use crate::cdata::ConfigValue;
use crate::error::{PolicyError, PolicyResult};

/// A single typed rule for one config key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Rule {
    /// String value.
    String {
        /// Config key.
        key: String,
        /// Whether a value must be supplied.
        #[serde(default)]
        required: bool,
        /// Default value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// Integer value with optional bounds.
    Integer {
        /// Config key.
        key: String,
        /// Whether a value must be supplied.
        #[serde(default)]
        required: bool,
        /// Default value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<i64>,
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<i64>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<i64>,
    },
    /// Float value with optional bounds.
    Float {
        /// Config key.
        key: String,
        /// Whether a value must be supplied.
        #[serde(default)]
        required: bool,
        /// Default value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<f64>,
        /// Inclusive lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum: Option<f64>,
        /// Inclusive upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        maximum: Option<f64>,
    },
    /// Boolean value.
    Bool {
        /// Config key.
        key: String,
        /// Whether a value must be supplied.
        #[serde(default)]
        required: bool,
        /// Default value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<bool>,
    },
}

impl Rule {
    /// A string rule.
    #[must_use]
    pub fn string(key: impl Into<String>, required: bool) -> Self {
        Self::String {
            key: key.into(),
            required,
            default: None,
        }
    }

    /// An integer rule.
    #[must_use]
    pub fn integer(key: impl Into<String>, required: bool) -> Self {
        Self::Integer {
            key: key.into(),
            required,
            default: None,
            minimum: None,
            maximum: None,
        }
    }

    /// A float rule.
    #[must_use]
    pub fn float(key: impl Into<String>, required: bool) -> Self {
        Self::Float {
            key: key.into(),
            required,
            default: None,
            minimum: None,
            maximum: None,
        }
    }

    /// A bool rule.
    #[must_use]
    pub fn bool(key: impl Into<String>, required: bool) -> Self {
        Self::Bool {
            key: key.into(),
            required,
            default: None,
        }
    }

    /// The config key this rule governs.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::String { key, .. }
            | Self::Integer { key, .. }
            | Self::Float { key, .. }
            | Self::Bool { key, .. } => key,
        }
    }

    /// Whether a value must be present after defaults.
    #[must_use]
    pub fn required(&self) -> bool {
        match self {
            Self::String { required, .. }
            | Self::Integer { required, .. }
            | Self::Float { required, .. }
            | Self::Bool { required, .. } => *required,
        }
    }

    /// Type name this rule expects.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Integer { .. } => "integer",
            Self::Float { .. } => "float",
            Self::Bool { .. } => "bool",
        }
    }

    /// The default value, if any.
    #[must_use]
    pub fn default_value(&self) -> Option<ConfigValue> {
        match self {
            Self::String { default, .. } => default.clone().map(ConfigValue::Str),
            Self::Integer { default, .. } => default.map(ConfigValue::Int),
            Self::Float { default, .. } => default.map(ConfigValue::Float),
            Self::Bool { default, .. } => default.map(ConfigValue::Bool),
        }
    }

    /// Set the default value.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::TypeMismatch`] when the value does not fit the
    /// rule type, or a bound error when it lies outside the rule's range.
    pub fn with_default(mut self, value: impl Into<ConfigValue>) -> PolicyResult<Self> {
        let value = self.validate(value.into())?;
        match (&mut self, value) {
            (Self::String { default, .. }, ConfigValue::Str(v)) => *default = Some(v),
            (Self::Integer { default, .. }, ConfigValue::Int(v)) => *default = Some(v),
            (Self::Float { default, .. }, ConfigValue::Float(v)) => *default = Some(v),
            (Self::Bool { default, .. }, ConfigValue::Bool(v)) => *default = Some(v),
            (rule, other) => {
                return Err(PolicyError::TypeMismatch {
                    key: rule.key().to_string(),
                    wanted: rule.type_name(),
                    provided: other.type_name(),
                });
            },
        }
        Ok(self)
    }

    /// Set the inclusive minimum of a numeric rule.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::TypeMismatch`] for non-numeric rules or a
    /// non-numeric bound.
    pub fn with_minimum(mut self, bound: impl Into<ConfigValue>) -> PolicyResult<Self> {
        let bound = bound.into();
        match (&mut self, bound) {
            (Self::Integer { minimum, .. }, ConfigValue::Int(v)) => *minimum = Some(v),
            (Self::Float { minimum, .. }, ConfigValue::Float(v)) => *minimum = Some(v),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float { minimum, .. }, ConfigValue::Int(v)) => *minimum = Some(v as f64),
            (rule, other) => {
                return Err(PolicyError::TypeMismatch {
                    key: rule.key().to_string(),
                    wanted: rule.type_name(),
                    provided: other.type_name(),
                });
            },
        }
        Ok(self)
    }

    /// Set the inclusive maximum of a numeric rule.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::TypeMismatch`] for non-numeric rules or a
    /// non-numeric bound.
    pub fn with_maximum(mut self, bound: impl Into<ConfigValue>) -> PolicyResult<Self> {
        let bound = bound.into();
        match (&mut self, bound) {
            (Self::Integer { maximum, .. }, ConfigValue::Int(v)) => *maximum = Some(v),
            (Self::Float { maximum, .. }, ConfigValue::Float(v)) => *maximum = Some(v),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float { maximum, .. }, ConfigValue::Int(v)) => *maximum = Some(v as f64),
            (rule, other) => {
                return Err(PolicyError::TypeMismatch {
                    key: rule.key().to_string(),
                    wanted: rule.type_name(),
                    provided: other.type_name(),
                });
            },
        }
        Ok(self)
    }

    /// Check a supplied value against this rule.
    ///
    /// Integers supplied for float rules are widened. Returns the value to
    /// store.
    ///
    /// # Errors
    ///
    /// Returns a [`PolicyError`] describing the violation.
    pub fn validate(&self, value: ConfigValue) -> PolicyResult<ConfigValue> {
        let mismatch = |provided: &ConfigValue| PolicyError::TypeMismatch {
            key: self.key().to_string(),
            wanted: self.type_name(),
            provided: provided.type_name(),
        };
        match self {
            Self::String { .. } => match value {
                ConfigValue::Str(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            Self::Bool { .. } => match value {
                ConfigValue::Bool(_) => Ok(value),
                other => Err(mismatch(&other)),
            },
            Self::Integer {
                minimum, maximum, ..
            } => {
                let ConfigValue::Int(v) = value else {
                    return Err(mismatch(&value));
                };
                self.check_bounds(v, *minimum, *maximum)?;
                Ok(value)
            },
            Self::Float {
                minimum, maximum, ..
            } => {
                let v = match value {
                    ConfigValue::Float(v) => v,
                    #[allow(clippy::cast_precision_loss)]
                    ConfigValue::Int(v) => v as f64,
                    other => return Err(mismatch(&other)),
                };
                self.check_bounds(v, *minimum, *maximum)?;
                Ok(ConfigValue::Float(v))
            },
        }
    }

    fn check_bounds<T>(&self, value: T, minimum: Option<T>, maximum: Option<T>) -> PolicyResult<()>
    where
        T: PartialOrd + std::fmt::Display + Copy,
    {
        if let Some(min) = minimum
            && value < min
        {
            return Err(PolicyError::UnderMinimum {
                key: self.key().to_string(),
                value: value.to_string(),
                minimum: min.to_string(),
            });
        }
        if let Some(max) = maximum
            && value > max
        {
            return Err(PolicyError::OverMaximum {
                key: self.key().to_string(),
                value: value.to_string(),
                maximum: max.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_bounds() {
        let rule = Rule::integer("port", true)
            .with_minimum(1_i64)
            .unwrap()
            .with_maximum(10_i64)
            .unwrap();
        assert!(rule.validate(ConfigValue::Int(5)).is_ok());
        assert_eq!(
            rule.validate(ConfigValue::Int(0)).unwrap_err().to_string(),
            "value is under minimum (port value 0 < 1)"
        );
        assert_eq!(
            rule.validate(ConfigValue::Int(11)).unwrap_err().to_string(),
            "value is over maximum (port value 11 > 10)"
        );
    }

    #[test]
    fn test_type_mismatch_message() {
        let rule = Rule::string("user", false);
        let err = rule.validate(ConfigValue::Int(3)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "type mismatch (user wanted type 'string' but provided type 'integer')"
        );
    }

    #[test]
    fn test_float_accepts_int() {
        let rule = Rule::float("ratio", false);
        assert_eq!(
            rule.validate(ConfigValue::Int(2)).unwrap(),
            ConfigValue::Float(2.0)
        );
    }

    #[test]
    fn test_with_default_checks_type_and_bounds() {
        assert!(Rule::bool("on", false).with_default("yes").is_err());
        let rule = Rule::integer("n", false).with_maximum(3_i64).unwrap();
        assert!(rule.clone().with_default(4_i64).is_err());
        let rule = rule.with_default(2_i64).unwrap();
        assert_eq!(rule.default_value(), Some(ConfigValue::Int(2)));
    }

    #[test]
    fn test_serde_tagged() {
        let rule: Rule = serde_json::from_value(serde_json::json!({
            "type": "integer",
            "key": "n",
            "required": true,
            "minimum": 1
        }))
        .unwrap();
        assert_eq!(rule.key(), "n");
        assert!(rule.required());
        assert!(rule.validate(ConfigValue::Int(0)).is_err());
    }
}
