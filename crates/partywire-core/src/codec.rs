//! Frame decoding and encoding.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::errors::CodecError;

/// A data frame as it arrives from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame; only meaningful when it holds UTF-8 JSON.
    Binary(Bytes),
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Frame {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// Decode a frame into a non-empty JSON value.
///
/// Returns `None` when the frame is not UTF-8, is not JSON, or decodes to an
/// empty value (see [`is_empty`]). Callers report all three the same way.
pub fn decode(frame: &Frame) -> Option<Value> {
    let text = match frame {
        Frame::Text(text) => text.as_str(),
        Frame::Binary(bytes) => std::str::from_utf8(bytes).ok()?,
    };
    let value: Value = serde_json::from_str(text).ok()?;
    if is_empty(&value) { None } else { Some(value) }
}

/// `null`, `false`, numeric zero and `""` count as empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f == 0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Serialize a message to its wire text.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String, CodecError> {
    serde_json::to_string(message).map_err(CodecError::Serialize)
}
