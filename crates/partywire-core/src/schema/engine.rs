//! Built-in lenient schema engine.
//!
//! Objects accept keys they do not describe. Validation only reports issues,
//! it never rewrites the value.

use serde_json::{Map, Value};

use super::{PathSegment, SharedValidator, ValidationIssue, Validator};
use crate::errors::SchemaError;

/// Any [`Validator`] embedded in a [`Schema`] tree.
#[derive(Clone)]
pub struct Custom(SharedValidator);

impl std::fmt::Debug for Custom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Custom(..)")
    }
}

/// A named member of an object schema.
#[derive(Clone, Debug)]
pub struct Field {
    name: String,
    schema: Schema,
    required: bool,
}

impl Field {
    /// A key that must be present.
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    /// A key that may be absent; when present it must match `schema`.
    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }

    /// Field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the key must be present.
    pub fn is_required(&self) -> bool {
        self.required && !matches!(self.schema, Schema::Optional(_))
    }
}

/// Structural schema for JSON values.
#[derive(Clone, Debug)]
pub enum Schema {
    /// Accepts every value.
    Any,
    /// Rejects every value.
    Never,
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Boolean,
    /// Any JSON number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// JSON string.
    String,
    /// Exactly this value.
    Literal(Value),
    /// One of these strings.
    Enumeration(Vec<String>),
    /// Array whose every item matches.
    Array(Box<Schema>),
    /// Object whose every value matches.
    Record(Box<Schema>),
    /// Object with described fields; undescribed keys pass through.
    Object(Vec<Field>),
    /// May be absent when used as an object field.
    Optional(Box<Schema>),
    /// The inner schema or `null`.
    Nullable(Box<Schema>),
    /// At least one variant matches.
    Union(Vec<Schema>),
    /// Delegates to an external validator; its issue paths are nested under
    /// the current position.
    Custom(Custom),
}

impl Schema {
    /// Accept anything.
    pub fn any() -> Self {
        Self::Any
    }

    /// Reject everything.
    pub fn never() -> Self {
        Self::Never
    }

    /// `null` only.
    pub fn null() -> Self {
        Self::Null
    }

    /// Booleans.
    pub fn boolean() -> Self {
        Self::Boolean
    }

    /// Numbers.
    pub fn number() -> Self {
        Self::Number
    }

    /// Integral numbers.
    pub fn integer() -> Self {
        Self::Integer
    }

    /// Strings.
    pub fn string() -> Self {
        Self::String
    }

    /// Exactly `value`.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// One of `options`. An empty option set is a definition error.
    pub fn enumeration<I, S>(options: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        if options.is_empty() {
            return Err(SchemaError::EmptyEnumeration);
        }
        Ok(Self::Enumeration(options))
    }

    /// Arrays of `item`.
    pub fn array(item: Self) -> Self {
        Self::Array(Box::new(item))
    }

    /// String-keyed maps of `value`.
    pub fn record(value: Self) -> Self {
        Self::Record(Box::new(value))
    }

    /// Objects with the given fields.
    pub fn object(fields: impl IntoIterator<Item = Field>) -> Self {
        Self::Object(fields.into_iter().collect())
    }

    /// Optional object member.
    pub fn optional(inner: Self) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// `inner` or `null`.
    pub fn nullable(inner: Self) -> Self {
        Self::Nullable(Box::new(inner))
    }

    /// Any of `variants`. An empty variant list is a definition error.
    pub fn union(variants: impl IntoIterator<Item = Self>) -> Result<Self, SchemaError> {
        let variants: Vec<Self> = variants.into_iter().collect();
        if variants.is_empty() {
            return Err(SchemaError::EmptyUnion);
        }
        Ok(Self::Union(variants))
    }

    /// Embed an external validator.
    pub fn custom(validator: SharedValidator) -> Self {
        Self::Custom(Custom(validator))
    }

    /// Make every field of an object schema optional. Other schemas are
    /// returned unchanged.
    #[must_use]
    pub fn partial(self) -> Self {
        match self {
            Self::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|f| Field {
                        required: false,
                        ..f
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    fn expected(&self) -> String {
        match self {
            Self::Any => "any".into(),
            Self::Never => "never".into(),
            Self::Null => "null".into(),
            Self::Boolean => "boolean".into(),
            Self::Number => "number".into(),
            Self::Integer => "integer".into(),
            Self::String => "string".into(),
            Self::Literal(v) => v.to_string(),
            Self::Enumeration(opts) => opts
                .iter()
                .map(|o| format!("\"{o}\""))
                .collect::<Vec<_>>()
                .join(" | "),
            Self::Array(_) => "array".into(),
            Self::Record(_) | Self::Object(_) => "object".into(),
            Self::Optional(inner) => inner.expected(),
            Self::Nullable(inner) => format!("{} | null", inner.expected()),
            Self::Union(vs) => vs.iter().map(Self::expected).collect::<Vec<_>>().join(" | "),
            Self::Custom(_) => "custom".into(),
        }
    }

    fn check(&self, value: &Value, path: &mut Vec<PathSegment>, issues: &mut Vec<ValidationIssue>) {
        let ok = match self {
            Self::Any => true,
            Self::Never => false,
            Self::Null => value.is_null(),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::String => value.is_string(),
            Self::Literal(expected) => value == expected,
            Self::Enumeration(options) => value
                .as_str()
                .is_some_and(|s| options.iter().any(|o| o == s)),
            Self::Array(item) => {
                let Some(items) = value.as_array() else {
                    issues.push(self.mismatch(value, path));
                    return;
                };
                for (i, v) in items.iter().enumerate() {
                    path.push(PathSegment::Index(i));
                    item.check(v, path, issues);
                    let _ = path.pop();
                }
                true
            }
            Self::Record(inner) => {
                let Some(map) = value.as_object() else {
                    issues.push(self.mismatch(value, path));
                    return;
                };
                for (k, v) in map {
                    path.push(PathSegment::Key(k.clone()));
                    inner.check(v, path, issues);
                    let _ = path.pop();
                }
                true
            }
            Self::Object(fields) => {
                let Some(map) = value.as_object() else {
                    issues.push(self.mismatch(value, path));
                    return;
                };
                check_fields(fields, map, path, issues);
                true
            }
            Self::Optional(inner) => {
                inner.check(value, path, issues);
                true
            }
            Self::Nullable(inner) => {
                if !value.is_null() {
                    inner.check(value, path, issues);
                }
                true
            }
            Self::Union(variants) => variants.iter().any(|v| v.validate(value).is_ok()),
            Self::Custom(Custom(validator)) => {
                if let Err(found) = validator.validate(value) {
                    if found.is_empty() {
                        issues.push(ValidationIssue::at("Validation failed", path.clone()));
                    }
                    issues.extend(found.into_iter().map(|issue| prefixed(issue, path)));
                }
                true
            }
        };
        if !ok {
            issues.push(self.mismatch(value, path));
        }
    }

    fn mismatch(&self, value: &Value, path: &[PathSegment]) -> ValidationIssue {
        let message = match self {
            Self::Literal(_) => format!("Invalid literal: expected {}, received {value}", self.expected()),
            Self::Enumeration(_) => {
                format!("Invalid option: expected {}, received {value}", self.expected())
            }
            Self::Never => format!("Invalid type: expected never, received {}", kind(value)),
            _ => format!("Invalid type: expected {}, received {}", self.expected(), kind(value)),
        };
        ValidationIssue::at(message, path.to_vec())
    }
}

fn check_fields(
    fields: &[Field],
    map: &Map<String, Value>,
    path: &mut Vec<PathSegment>,
    issues: &mut Vec<ValidationIssue>,
) {
    for field in fields {
        path.push(PathSegment::Key(field.name.clone()));
        match map.get(&field.name) {
            Some(v) => field.schema.check(v, path, issues),
            None if field.is_required() => issues.push(ValidationIssue::at(
                format!("Missing required field: expected {}", field.schema.expected()),
                path.clone(),
            )),
            None => {}
        }
        let _ = path.pop();
    }
}

fn prefixed(mut issue: ValidationIssue, prefix: &[PathSegment]) -> ValidationIssue {
    if prefix.is_empty() {
        return issue;
    }
    let mut path = prefix.to_vec();
    path.extend(issue.path.take().unwrap_or_default());
    issue.path = Some(path);
    issue
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Validator for Schema {
    fn validate(&self, value: &Value) -> Result<(), Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        let mut path = Vec::new();
        self.check(value, &mut path, &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issues(schema: &Schema, value: &Value) -> Vec<ValidationIssue> {
        schema.validate(value).err().unwrap_or_default()
    }

    #[test]
    fn primitives() {
        assert!(Schema::string().validate(&json!("x")).is_ok());
        assert!(Schema::number().validate(&json!(1.5)).is_ok());
        assert!(Schema::integer().validate(&json!(2)).is_ok());
        assert!(Schema::integer().validate(&json!(2.5)).is_err());
        assert!(Schema::boolean().validate(&json!(false)).is_ok());
        assert!(Schema::null().validate(&json!(null)).is_ok());
        assert!(Schema::any().validate(&json!({"a": [1]})).is_ok());
        assert!(Schema::never().validate(&json!(null)).is_err());
    }

    #[test]
    fn object_allows_extra_keys() {
        let schema = Schema::object([Field::required("id", Schema::string())]);
        assert!(schema.validate(&json!({"id": "a", "other": 1})).is_ok());
    }

    #[test]
    fn object_reports_missing_field_with_path() {
        let schema = Schema::object([Field::required("amount", Schema::number())]);
        let found = issues(&schema, &json!({"type": "add-to-counter"}));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, Some(vec![PathSegment::from("amount")]));
        assert!(found[0].message.contains("Missing required field"));
    }

    #[test]
    fn object_rejects_non_object() {
        let schema = Schema::object([]);
        let found = issues(&schema, &json!([1, 2]));
        assert_eq!(found.len(), 1);
        assert!(found[0].path.is_none());
        assert!(found[0].message.contains("received array"));
    }

    #[test]
    fn optional_field_may_be_absent() {
        let schema = Schema::object([Field::optional("note", Schema::string())]);
        assert!(schema.validate(&json!({})).is_ok());
        assert!(schema.validate(&json!({"note": 3})).is_err());
    }

    #[test]
    fn optional_wrapper_counts_as_not_required() {
        let schema = Schema::object([Field::required("note", Schema::optional(Schema::string()))]);
        assert!(schema.validate(&json!({})).is_ok());
    }

    #[test]
    fn nested_paths_include_indices() {
        let schema = Schema::object([Field::required(
            "items",
            Schema::array(Schema::object([Field::required("qty", Schema::integer())])),
        )]);
        let found = issues(&schema, &json!({"items": [{"qty": 1}, {"qty": "x"}]}));
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].path,
            Some(vec![
                PathSegment::from("items"),
                PathSegment::Index(1),
                PathSegment::from("qty"),
            ])
        );
    }

    #[test]
    fn collects_every_issue_in_order() {
        let schema = Schema::object([
            Field::required("a", Schema::string()),
            Field::required("b", Schema::number()),
        ]);
        let found = issues(&schema, &json!({}));
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].path, Some(vec![PathSegment::from("a")]));
        assert_eq!(found[1].path, Some(vec![PathSegment::from("b")]));
    }

    #[test]
    fn enumeration_matches_options() {
        let schema = Schema::enumeration(["ping", "latency"]).unwrap();
        assert!(schema.validate(&json!("ping")).is_ok());
        let found = issues(&schema, &json!("pong"));
        assert!(found[0].message.contains("\"ping\" | \"latency\""));
    }

    #[test]
    fn empty_enumeration_is_definition_error() {
        let err = Schema::enumeration(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, SchemaError::EmptyEnumeration));
    }

    #[test]
    fn empty_union_is_definition_error() {
        assert!(matches!(Schema::union([]), Err(SchemaError::EmptyUnion)));
    }

    #[test]
    fn union_accepts_any_variant() {
        let schema = Schema::union([Schema::string(), Schema::number()]).unwrap();
        assert!(schema.validate(&json!("a")).is_ok());
        assert!(schema.validate(&json!(1)).is_ok());
        assert!(schema.validate(&json!(true)).is_err());
    }

    #[test]
    fn nullable_accepts_null() {
        let schema = Schema::nullable(Schema::string());
        assert!(schema.validate(&json!(null)).is_ok());
        assert!(schema.validate(&json!("x")).is_ok());
        assert!(schema.validate(&json!(1)).is_err());
    }

    #[test]
    fn literal_matches_exactly() {
        let schema = Schema::literal("v1");
        assert!(schema.validate(&json!("v1")).is_ok());
        assert!(schema.validate(&json!("v2")).is_err());
    }

    #[test]
    fn record_checks_every_value() {
        let schema = Schema::record(Schema::string());
        assert!(schema.validate(&json!({"a": "1", "b": "2"})).is_ok());
        let found = issues(&schema, &json!({"a": "1", "b": 2}));
        assert_eq!(found[0].path, Some(vec![PathSegment::from("b")]));
    }

    #[test]
    fn partial_relaxes_required_fields() {
        let schema = Schema::object([
            Field::required("body", Schema::object([Field::required("name", Schema::string())])),
            Field::required("query", Schema::record(Schema::string())),
        ])
        .partial();
        assert!(schema.validate(&json!({})).is_ok());
        // Nested objects keep their own requirements.
        assert!(schema.validate(&json!({"body": {}})).is_err());
    }

    #[test]
    fn custom_issues_nest_under_field() {
        let even = |v: &Value| -> Result<(), Vec<ValidationIssue>> {
            if v.as_i64().is_some_and(|n| n % 2 == 0) {
                Ok(())
            } else {
                Err(vec![ValidationIssue::new("must be even")])
            }
        };
        let schema = Schema::object([Field::required(
            "query",
            Schema::custom(std::sync::Arc::new(even)),
        )]);
        assert!(schema.validate(&json!({"query": 4})).is_ok());
        let found = issues(&schema, &json!({"query": 3}));
        assert_eq!(found[0].message, "must be even");
        assert_eq!(found[0].path, Some(vec![PathSegment::from("query")]));
    }

    #[test]
    fn partial_leaves_non_objects_alone() {
        let schema = Schema::string().partial();
        assert!(schema.validate(&json!(1)).is_err());
    }
}
