//! Metric namespaces.
//!
//! A namespace is an ordered list of elements such as `/intel/mock/foo`.
//! Elements are either static, dynamic (a value that varies per instance,
//! e.g. a host id) or the `*` wildcard used in queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Rendered value of wildcard and unbound dynamic elements.
pub const WILDCARD: &str = "*";

/// One element of a [`Namespace`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ElementRepr", into = "ElementRepr")]
pub enum NamespaceElement {
    /// A fixed segment.
    Static(String),
    /// A segment whose value varies per instance.
    Dynamic {
        /// Name of the dynamic element (e.g. `host`).
        name: String,
        /// Human readable description.
        description: String,
        /// Concrete value once bound by a collection.
        value: Option<String>,
    },
    /// Matches any segment.
    Wildcard,
}

impl NamespaceElement {
    /// Create a static element.
    #[must_use]
    pub fn new_static(value: impl Into<String>) -> Self {
        let value = value.into();
        if value == WILDCARD {
            Self::Wildcard
        } else {
            Self::Static(value)
        }
    }

    /// Create an unbound dynamic element.
    #[must_use]
    pub fn new_dynamic(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Dynamic {
            name: name.into(),
            description: description.into(),
            value: None,
        }
    }

    /// The rendered value of this element.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Static(v) => v,
            Self::Dynamic { value, .. } => value.as_deref().unwrap_or(WILDCARD),
            Self::Wildcard => WILDCARD,
        }
    }

    /// Whether this is a dynamic element.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }

    /// Whether this element renders as `*` and therefore matches anything.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.value() == WILDCARD
    }

    /// Key under which this element is stored in the metric catalog.
    ///
    /// Dynamic elements always live under the wildcard child, whatever
    /// value they carry.
    #[must_use]
    pub fn catalog_key(&self) -> &str {
        match self {
            Self::Static(v) => v,
            Self::Dynamic { .. } | Self::Wildcard => WILDCARD,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ElementRepr {
    value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
}

impl From<ElementRepr> for NamespaceElement {
    fn from(repr: ElementRepr) -> Self {
        if repr.name.is_empty() {
            return Self::new_static(repr.value);
        }
        let value = (repr.value != WILDCARD).then_some(repr.value);
        Self::Dynamic {
            name: repr.name,
            description: repr.description,
            value,
        }
    }
}

impl From<NamespaceElement> for ElementRepr {
    fn from(element: NamespaceElement) -> Self {
        match element {
            NamespaceElement::Static(value) => Self {
                value,
                name: String::new(),
                description: String::new(),
            },
            NamespaceElement::Dynamic {
                name,
                description,
                value,
            } => Self {
                value: value.unwrap_or_else(|| WILDCARD.to_string()),
                name,
                description,
            },
            NamespaceElement::Wildcard => Self {
                value: WILDCARD.to_string(),
                name: String::new(),
                description: String::new(),
            },
        }
    }
}

/// An ordered metric namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(Vec<NamespaceElement>);

impl Namespace {
    /// Create a namespace from elements.
    #[must_use]
    pub fn new(elements: Vec<NamespaceElement>) -> Self {
        Self(elements)
    }

    /// Create a namespace of static elements; `*` becomes a wildcard.
    #[must_use]
    pub fn from_strs<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            values
                .into_iter()
                .map(NamespaceElement::new_static)
                .collect(),
        )
    }

    /// Parse a rendered namespace such as `/intel/mock/foo`.
    ///
    /// The first character is taken as the separator.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidNamespace`] for empty input or empty
    /// segments.
    pub fn parse(input: &str) -> CoreResult<Self> {
        let mut chars = input.chars();
        let Some(separator) = chars.next() else {
            return Err(CoreError::InvalidNamespace {
                namespace: input.to_string(),
                reason: "empty namespace".to_string(),
            });
        };
        let body = chars.as_str().trim_end_matches(separator);
        if body.is_empty() {
            return Err(CoreError::InvalidNamespace {
                namespace: input.to_string(),
                reason: "no namespace elements".to_string(),
            });
        }
        let mut elements = Vec::new();
        for segment in body.split(separator) {
            if segment.is_empty() {
                return Err(CoreError::InvalidNamespace {
                    namespace: input.to_string(),
                    reason: "empty namespace element".to_string(),
                });
            }
            elements.push(NamespaceElement::new_static(segment));
        }
        Ok(Self(elements))
    }

    /// Append a static element.
    #[must_use]
    pub fn add_static(mut self, value: impl Into<String>) -> Self {
        self.0.push(NamespaceElement::new_static(value));
        self
    }

    /// Append an unbound dynamic element.
    #[must_use]
    pub fn add_dynamic(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.0.push(NamespaceElement::new_dynamic(name, description));
        self
    }

    /// Bind the value of the dynamic element at `index`.
    ///
    /// Returns `false` when no dynamic element lives at that index.
    pub fn bind(&mut self, index: usize, bound: impl Into<String>) -> bool {
        match self.0.get_mut(index) {
            Some(NamespaceElement::Dynamic { value, .. }) => {
                *value = Some(bound.into());
                true
            },
            _ => false,
        }
    }

    /// The namespace elements.
    #[must_use]
    pub fn elements(&self) -> &[NamespaceElement] {
        &self.0
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the namespace has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rendered element values.
    #[must_use]
    pub fn strings(&self) -> Vec<String> {
        self.0.iter().map(|e| e.value().to_string()).collect()
    }

    /// Whether any element renders as `*`.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(NamespaceElement::is_wildcard)
    }

    /// Indices of dynamic elements.
    #[must_use]
    pub fn dynamic_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_dynamic())
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether the namespace contains a dynamic element.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.0.iter().any(NamespaceElement::is_dynamic)
    }

    /// Copy of this namespace with every dynamic element unbound.
    #[must_use]
    pub fn unbound(&self) -> Self {
        Self(
            self.0
                .iter()
                .map(|e| match e {
                    NamespaceElement::Dynamic {
                        name, description, ..
                    } => NamespaceElement::Dynamic {
                        name: name.clone(),
                        description: description.clone(),
                        value: None,
                    },
                    other => other.clone(),
                })
                .collect(),
        )
    }

    /// Whether the rendered values start with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &[String]) -> bool {
        prefix.len() <= self.0.len()
            && self
                .0
                .iter()
                .zip(prefix)
                .all(|(element, p)| element.value() == p)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for element in &self.0 {
            write!(f, "/{}", element.value())?;
        }
        Ok(())
    }
}

impl From<Vec<NamespaceElement>> for Namespace {
    fn from(elements: Vec<NamespaceElement>) -> Self {
        Self(elements)
    }
}

/// Split a rendered namespace prefix (`/intel/mock`) into its values.
#[must_use]
pub fn split_prefix(prefix: &str) -> Vec<String> {
    let mut chars = prefix.chars();
    let Some(separator) = chars.next() else {
        return Vec::new();
    };
    chars
        .as_str()
        .trim_end_matches(separator)
        .split(separator)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
