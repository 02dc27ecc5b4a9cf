//! Client error types.

use partywire_core::{CodecError, Issues};

/// Errors from the socket dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The WebSocket handshake failed.
    #[error("failed to connect to {url}: {source}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    /// The message could not be serialized.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The outbound queue is full; the message was not sent.
    #[error("outbound queue full")]
    QueueFull,

    /// The socket is gone or the client was torn down.
    #[error("client closed")]
    Closed,
}

/// Errors from [`ApiClient`](crate::api::ApiClient).
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No declared route matches the method and path.
    #[error("no {method} route declared for {path}")]
    UnknownRoute {
        /// Request method.
        method: String,
        /// Requested path template.
        path: String,
    },

    /// A `:name` segment had no value in the request params.
    #[error("missing path param: {0}")]
    MissingPathParam(String),

    /// The server rejected the request params.
    #[error("invalid params: {} issue(s)", .0.len())]
    InvalidParams(Issues),

    /// Non-success status without a `fetch.error` body.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Response status code.
        status: u16,
        /// Response body as text.
        body: String,
    },

    /// Transport failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The response body was not valid JSON.
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}
