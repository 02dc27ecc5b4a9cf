//! Validation through serde deserialization.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{PathSegment, ValidationIssue, Validator};

/// Validator that accepts a value iff it deserializes into `T`.
///
/// Lets a `#[derive(Deserialize)]` type act as the schema for an event or
/// endpoint. Unknown fields are accepted unless `T` opts into
/// `deny_unknown_fields`.
pub struct SerdeSchema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSchema<T> {
    /// Create a validator for `T`.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SerdeSchema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerdeSchema")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: DeserializeOwned> Validator for SerdeSchema<T> {
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        match T::deserialize(value) {
            Ok(_) => Ok(()),
            Err(e) => Err(vec![issue_from_error(&e.to_string())]),
        }
    }
}

/// serde_json reports the offending field as "missing field `amount`" or
/// "unknown field `x`"; lift the backticked name into the issue path.
fn issue_from_error(message: &str) -> ValidationIssue {
    let field = message
        .split_once('`')
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(name, _)| name.to_owned());
    match field {
        Some(name) if message.starts_with("missing field") || message.starts_with("unknown field") => {
            ValidationIssue::at(message, vec![PathSegment::Key(name)])
        }
        _ => ValidationIssue::new(message),
    }
}
