//! Wire message types.
//!
//! Every message in either direction is a JSON object whose `type` field names
//! the variant. [`Envelope`] carries such an object without losing any of its
//! fields. [`ErrorResponse`] and [`FetchError`] are the two error shapes the
//! server emits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::CodecError;
use crate::schema::Issues;

/// Tag of socket error responses.
pub const WS_ERROR: &str = "ws.error";
/// Tag of HTTP parameter error bodies.
pub const FETCH_ERROR: &str = "fetch.error";

// ── Envelope ────────────────────────────────────────────────────────

/// A JSON object with a string `type` discriminant and any other fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Envelope with only the `type` field set.
    pub fn new(message_type: impl Into<String>) -> Self {
        let mut fields = Map::new();
        let _ = fields.insert("type".into(), Value::String(message_type.into()));
        Self { fields }
    }

    /// Builder-style field insert. Setting `type` is ignored.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "type" {
            let _ = self.fields.insert(key, value.into());
        }
        self
    }

    /// The discriminant tag.
    pub fn message_type(&self) -> &str {
        self.fields
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Look up a field by name.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields, including `type`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Deserialize the whole envelope into a typed message.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        T::deserialize(&Value::Object(self.fields.clone())).map_err(CodecError::Parse)
    }

    /// Unwrap into the underlying JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl TryFrom<Value> for Envelope {
    type Error = CodecError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) if fields.get("type").is_some_and(Value::is_string) => {
                Ok(Self { fields })
            }
            _ => Err(CodecError::MissingType),
        }
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        envelope.into_value()
    }
}

// ── Socket errors ───────────────────────────────────────────────────

/// Why the server rejected an inbound socket message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorReason {
    /// Frame was not decodable JSON, or decoded to an empty value.
    #[serde(rename = "empty message")]
    EmptyMessage,
    /// Discriminant or payload failed validation.
    #[serde(rename = "invalid message")]
    InvalidMessage,
    /// Tag passed validation but has no route.
    #[serde(rename = "no matching route")]
    NoMatchingRoute,
    /// The handler failed.
    #[serde(rename = "unexpected error")]
    UnexpectedError,
}

impl ErrorReason {
    /// Wire text of this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmptyMessage => "empty message",
            Self::InvalidMessage => "invalid message",
            Self::NoMatchingRoute => "no matching route",
            Self::UnexpectedError => "unexpected error",
        }
    }
}

impl std::fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum WsErrorTag {
    #[serde(rename = "ws.error")]
    WsError,
}

/// `{ "type": "ws.error", "reason": ..., "issues"?: [...] }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    tag: WsErrorTag,
    /// Rejection reason.
    pub reason: ErrorReason,
    /// Present only for [`ErrorReason::InvalidMessage`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Issues>,
}

impl ErrorResponse {
    fn bare(reason: ErrorReason) -> Self {
        Self {
            tag: WsErrorTag::WsError,
            reason,
            issues: None,
        }
    }

    /// Undecodable or empty frame.
    pub fn empty_message() -> Self {
        Self::bare(ErrorReason::EmptyMessage)
    }

    /// Validation failure with its issues.
    pub fn invalid_message(issues: Issues) -> Self {
        Self {
            issues: Some(issues),
            ..Self::bare(ErrorReason::InvalidMessage)
        }
    }

    /// Valid tag without a route.
    pub fn no_matching_route() -> Self {
        Self::bare(ErrorReason::NoMatchingRoute)
    }

    /// Handler failure.
    pub fn unexpected_error() -> Self {
        Self::bare(ErrorReason::UnexpectedError)
    }
}

// ── HTTP errors ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum FetchErrorTag {
    #[serde(rename = "fetch.error")]
    FetchError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
enum FetchErrorReason {
    #[serde(rename = "invalid params")]
    InvalidParams,
}

/// `{ "type": "fetch.error", "reason": "invalid params", "issues": [...] }`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FetchError {
    #[serde(rename = "type")]
    tag: FetchErrorTag,
    reason: FetchErrorReason,
    /// What was wrong with the request.
    pub issues: Issues,
}

impl FetchError {
    /// Invalid request parameters.
    pub fn invalid_params(issues: Issues) -> Self {
        Self {
            tag: FetchErrorTag::FetchError,
            reason: FetchErrorReason::InvalidParams,
            issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PathSegment, ValidationIssue};
    use serde_json::json;

    #[test]
    fn envelope_keeps_extra_fields() {
        let value = json!({"type": "latency", "id": "abc", "nested": {"a": [1]}});
        let env = Envelope::try_from(value.clone()).unwrap();
        assert_eq!(env.message_type(), "latency");
        assert_eq!(env.get("id"), Some(&json!("abc")));
        assert_eq!(env.into_value(), value);
    }

    #[test]
    fn envelope_requires_string_type() {
        assert!(Envelope::try_from(json!({"type": 1})).is_err());
        assert!(Envelope::try_from(json!({"id": "x"})).is_err());
        assert!(Envelope::try_from(json!("ping")).is_err());
    }

    #[test]
    fn envelope_deserializes_from_text() {
        let env: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(env, Envelope::new("ping"));
        assert!(serde_json::from_str::<Envelope>(r#"{"kind":"ping"}"#).is_err());
    }

    #[test]
    fn envelope_builder_cannot_overwrite_type() {
        let env = Envelope::new("pong").with("type", "other").with("size", 2);
        assert_eq!(env.message_type(), "pong");
        assert_eq!(serde_json::to_value(&env).unwrap(), json!({"type": "pong", "size": 2}));
    }

    #[test]
    fn envelope_parses_typed() {
        #[derive(Deserialize)]
        struct Add {
            amount: i64,
        }
        let env = Envelope::new("add-to-counter").with("amount", 5);
        let add: Add = env.parse().unwrap();
        assert_eq!(add.amount, 5);
        assert!(env.parse::<Vec<u8>>().is_err());
    }

    #[test]
    fn error_reasons_use_spaced_wire_text() {
        for (reason, text) in [
            (ErrorReason::EmptyMessage, "empty message"),
            (ErrorReason::InvalidMessage, "invalid message"),
            (ErrorReason::NoMatchingRoute, "no matching route"),
            (ErrorReason::UnexpectedError, "unexpected error"),
        ] {
            assert_eq!(serde_json::to_value(reason).unwrap(), json!(text));
            assert_eq!(reason.to_string(), text);
        }
    }

    #[test]
    fn error_response_without_issues() {
        let json = serde_json::to_value(ErrorResponse::empty_message()).unwrap();
        assert_eq!(json, json!({"type": "ws.error", "reason": "empty message"}));
    }

    #[test]
    fn error_response_with_issues() {
        let issues = Issues::new(vec![ValidationIssue::at(
            "Missing required field",
            vec![PathSegment::from("amount")],
        )]);
        let json = serde_json::to_value(ErrorResponse::invalid_message(issues)).unwrap();
        assert_eq!(json["reason"], "invalid message");
        assert_eq!(json["issues"][0]["path"], json!(["amount"]));
    }

    #[test]
    fn error_response_rejects_other_tags() {
        let parsed: ErrorResponse =
            serde_json::from_value(json!({"type": "ws.error", "reason": "unexpected error"}))
                .unwrap();
        assert_eq!(parsed, ErrorResponse::unexpected_error());
        assert!(
            serde_json::from_value::<ErrorResponse>(json!({"type": "pong", "reason": "empty message"}))
                .is_err()
        );
    }

    #[test]
    fn fetch_error_shape() {
        let err = FetchError::invalid_params(Issues::new(vec![ValidationIssue::new("bad")]));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"type": "fetch.error", "reason": "invalid params", "issues": [{"message": "bad"}]})
        );
    }
}
