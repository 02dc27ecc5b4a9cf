//! Schema adapter.
//!
//! Every validation library is reached through one capability, [`Validator`].
//! [`assert`] turns a validator verdict into either the untouched value or a
//! non-empty [`Issues`] list. Values are never stripped: a schema only has to
//! confirm the required shape, and extra fields pass through.
//!
//! Three validator families ship with the crate:
//! - [`Schema`]: a small lenient engine built from combinators
//! - [`SerdeSchema`]: validation by attempting a typed serde deserialization
//! - closures `Fn(&Value) -> Result<(), Vec<ValidationIssue>>`

mod engine;
mod serde_schema;

pub use engine::{Custom, Field, Schema};
pub use serde_schema::SerdeSchema;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One step in the path to an offending value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A single schema violation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Human-readable description.
    pub message: String,
    /// Location of the offending value, outermost key first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
}

impl ValidationIssue {
    /// Issue at the root of the validated value.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
        }
    }

    /// Issue at the given path.
    pub fn at(message: impl Into<String>, path: Vec<PathSegment>) -> Self {
        Self {
            message: message.into(),
            path: if path.is_empty() { None } else { Some(path) },
        }
    }

    /// Prefix this issue's path with `segment`.
    #[must_use]
    pub fn nested(mut self, segment: impl Into<PathSegment>) -> Self {
        let mut path = vec![segment.into()];
        path.extend(self.path.take().unwrap_or_default());
        self.path = Some(path);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) if !path.is_empty() => {
                let joined: Vec<String> = path.iter().map(ToString::to_string).collect();
                write!(f, "{}: {}", joined.join("."), self.message)
            }
            _ => f.write_str(&self.message),
        }
    }
}

/// Non-empty, ordered list of validation issues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Issues(Vec<ValidationIssue>);

impl Issues {
    /// Wrap `issues`, substituting a generic issue when the list is empty.
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        if issues.is_empty() {
            Self(vec![ValidationIssue::new("Validation failed")])
        } else {
            Self(issues)
        }
    }

    /// Borrow the issues.
    pub fn as_slice(&self) -> &[ValidationIssue] {
        &self.0
    }

    /// Number of issues (always at least one).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Unwrap into the inner vector.
    pub fn into_vec(self) -> Vec<ValidationIssue> {
        self.0
    }
}

impl IntoIterator for Issues {
    type Item = ValidationIssue;
    type IntoIter = std::vec::IntoIter<ValidationIssue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Validation capability implemented once per schema engine.
///
/// Implementations must not mutate or strip the value. Returning
/// `Err(vec![])` is tolerated; [`assert`] substitutes a generic issue.
pub trait Validator: Send + Sync {
    /// Check `value` against this schema.
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>>;
}

impl<F> Validator for F
where
    F: Fn(&Value) -> Result<(), Vec<ValidationIssue>> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        self(value)
    }
}

/// Shared, type-erased validator.
pub type SharedValidator = Arc<dyn Validator>;

/// Assert `value` against `schema`.
///
/// Returns the value unchanged on success, or the non-empty issue list.
pub fn assert(schema: &dyn Validator, value: Value) -> Result<Value, Issues> {
    match schema.validate(&value) {
        Ok(()) => Ok(value),
        Err(issues) => Err(Issues::new(issues)),
    }
}
