//! Core error types.

/// Malformed schema definition, reported when the schema is built.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SchemaError {
    /// `enumeration` called with no options.
    #[error("enumeration must list at least one option")]
    EmptyEnumeration,

    /// `union` called with no variants.
    #[error("union must list at least one variant")]
    EmptyUnion,
}

/// Frame encoding or decoding failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Value could not be serialized to JSON.
    #[error("serialize failed: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Text was not valid JSON or did not match the target type.
    #[error("parse failed: {0}")]
    Parse(#[source] serde_json::Error),

    /// Envelope did not carry a string `type` field.
    #[error("message has no string `type` field")]
    MissingType,
}
