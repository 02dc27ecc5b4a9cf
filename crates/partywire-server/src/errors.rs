//! Server error types.

use thiserror::Error;

/// Invalid event registry definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Two events share a tag.
    #[error("duplicate event tag: {0}")]
    DuplicateTag(String),
    /// An event was registered with an empty tag.
    #[error("event tag must not be empty")]
    EmptyTag,
}

/// Invalid endpoint definition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// The same method and path pattern were declared twice.
    #[error("duplicate endpoint: {method} {path}")]
    DuplicateEndpoint {
        /// HTTP method.
        method: String,
        /// Path pattern as declared.
        path: String,
    },
    /// The path pattern cannot be parsed.
    #[error("invalid path `{path}`: {reason}")]
    InvalidPath {
        /// Path pattern as declared.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file is not valid JSON or has wrong field types.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value is out of range.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Server startup or runtime failure.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Other socket I/O failure.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The Prometheus recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}
