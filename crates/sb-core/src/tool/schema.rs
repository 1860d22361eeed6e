//! Declared input schemas and argument coercion.

use std::collections::{BTreeSet, HashMap};

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Number, Value};

use crate::error::{FieldIssue, ToolError};

/// Value kind a field accepts after coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    /// A non-negative integer that fits in 32 bits, for counts and limits.
    UnsignedInteger,
    Number,
    Boolean,
    List,
    Object,
    Any,
}

impl FieldKind {
    fn json_type(self) -> Option<&'static str> {
        match self {
            FieldKind::String => Some("string"),
            FieldKind::Integer | FieldKind::UnsignedInteger => Some("integer"),
            FieldKind::Number => Some("number"),
            FieldKind::Boolean => Some("boolean"),
            FieldKind::List => Some("array"),
            FieldKind::Object => Some("object"),
            FieldKind::Any => None,
        }
    }

    /// Coerces `value` into this kind, or describes why it cannot be.
    fn coerce(self, value: Value) -> Result<Value, String> {
        match self {
            FieldKind::Any => Ok(value),
            FieldKind::String => match value {
                Value::String(_) => Ok(value),
                other => Err(format!("expected a string, got {}", kind_name(&other))),
            },
            FieldKind::Integer => coerce_integer(value),
            FieldKind::UnsignedInteger => coerce_unsigned(value),
            FieldKind::Number => coerce_number(value),
            FieldKind::Boolean => coerce_boolean(value),
            FieldKind::List => match value {
                Value::Array(_) => Ok(value),
                other => Err(format!("expected a list, got {}", kind_name(&other))),
            },
            FieldKind::Object => match value {
                Value::Object(_) => Ok(value),
                other => Err(format!("expected an object, got {}", kind_name(&other))),
            },
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

/// Largest magnitude at which every integer is exactly representable as f64.
const MAX_SAFE_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

fn integral_float(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_FLOAT_INT {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

fn coerce_integer(value: Value) -> Result<Value, String> {
    match value {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
        Value::Number(n) => n
            .as_f64()
            .and_then(integral_float)
            .ok_or_else(|| format!("expected an integer, got {}", n)),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(integral_float)
                .ok_or_else(|| format!("expected an integer, got '{}'", s))
        }
        other => Err(format!("expected an integer, got {}", kind_name(&other))),
    }
}

fn coerce_unsigned(value: Value) -> Result<Value, String> {
    let value = coerce_integer(value)?;
    match value.as_u64() {
        Some(n) if n <= u64::from(u32::MAX) => Ok(value),
        _ => Err(format!(
            "expected an integer between 0 and {}, got {}",
            u32::MAX,
            value
        )),
    }
}

fn coerce_number(value: Value) -> Result<Value, String> {
    match value {
        Value::Number(_) => Ok(value),
        Value::String(s) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Ok(Value::from(i));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| format!("expected a number, got '{}'", s))
        }
        other => Err(format!("expected a number, got {}", kind_name(&other))),
    }
}

fn coerce_boolean(value: Value) -> Result<Value, String> {
    match value {
        Value::Bool(_) => Ok(value),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(format!("expected a boolean, got '{}'", s)),
        },
        Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(Value::Bool(true)),
            Some(0) => Ok(Value::Bool(false)),
            _ => Err(format!("expected a boolean, got {}", n)),
        },
        other => Err(format!("expected a boolean, got {}", kind_name(&other))),
    }
}

/// One declared input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// What happens to arguments that match no declared field.
///
/// There is no default; every structured schema picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtraFields {
    /// Unknown keys are dropped before deserialization.
    Ignore,
    /// Unknown keys are reported as input errors.
    Forbid,
}

/// Shape of a tool's input type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSchema {
    Structured {
        fields: Vec<FieldSpec>,
        extra_fields: ExtraFields,
    },
    /// A free-form mapping with no declared fields. Tools refuse it.
    Untyped,
}

impl InputSchema {
    pub fn structured(extra_fields: ExtraFields, fields: Vec<FieldSpec>) -> Self {
        InputSchema::Structured {
            fields,
            extra_fields,
        }
    }

    pub fn fields(&self) -> &[FieldSpec] {
        match self {
            InputSchema::Structured { fields, .. } => fields,
            InputSchema::Untyped => &[],
        }
    }

    /// Checks the schema can back a tool.
    pub fn validate(&self, tool: &str) -> Result<(), ToolError> {
        let invalid = |reason: String| ToolError::InvalidDefinition {
            tool: tool.to_string(),
            reason,
        };

        let fields = match self {
            InputSchema::Untyped => {
                return Err(invalid(
                    "input must be a structured type with declared fields, not an untyped mapping"
                        .to_string(),
                ))
            }
            InputSchema::Structured { fields, .. } => fields,
        };

        let mut seen = BTreeSet::new();
        for field in fields {
            if field.name.trim().is_empty() {
                return Err(invalid("input field names must not be empty".to_string()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(format!("input field '{}' is declared twice", field.name)));
            }
        }
        Ok(())
    }

    /// Applies the coercion rules to raw named arguments.
    ///
    /// Every problem is collected; the error lists all offending fields.
    pub fn coerce(
        &self,
        tool: &str,
        mut arguments: Map<String, Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        let (fields, extra_fields) = match self {
            InputSchema::Untyped => return Ok(arguments),
            InputSchema::Structured {
                fields,
                extra_fields,
            } => (fields, *extra_fields),
        };

        let mut issues = Vec::new();
        let mut coerced = Map::new();

        for field in fields {
            match arguments.remove(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        issues.push(FieldIssue::new(&field.name, "field required"));
                    }
                }
                Some(value) => match field.kind.coerce(value) {
                    Ok(value) => {
                        coerced.insert(field.name.clone(), value);
                    }
                    Err(reason) => issues.push(FieldIssue::new(&field.name, reason)),
                },
            }
        }

        if extra_fields == ExtraFields::Forbid {
            for name in arguments.keys() {
                issues.push(FieldIssue::new(name, "extra fields not permitted"));
            }
        }

        if issues.is_empty() {
            Ok(coerced)
        } else {
            Err(ToolError::InvalidInput {
                tool: tool.to_string(),
                issues,
            })
        }
    }

    /// Renders a JSON-schema `parameters` object for function calling.
    pub fn to_json_schema(&self) -> Value {
        match self {
            InputSchema::Untyped => json!({ "type": "object" }),
            InputSchema::Structured {
                fields,
                extra_fields,
            } => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for field in fields {
                    let mut property = Map::new();
                    if let Some(json_type) = field.kind.json_type() {
                        property.insert("type".to_string(), json!(json_type));
                    }
                    if field.kind == FieldKind::UnsignedInteger {
                        property.insert("minimum".to_string(), json!(0));
                        property.insert("maximum".to_string(), json!(u32::MAX));
                    }
                    if let Some(description) = &field.description {
                        property.insert("description".to_string(), json!(description));
                    }
                    properties.insert(field.name.clone(), Value::Object(property));
                    if field.required {
                        required.push(json!(field.name));
                    }
                }
                let additional = *extra_fields == ExtraFields::Ignore;
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": additional,
                })
            }
        }
    }
}

/// A type a tool can take as its single input.
///
/// Implementors describe their fields so arguments can be coerced and
/// validated before deserialization.
pub trait ToolInput: DeserializeOwned + Send + 'static {
    fn schema() -> InputSchema;
}

impl ToolInput for Value {
    fn schema() -> InputSchema {
        InputSchema::Untyped
    }
}

impl ToolInput for Map<String, Value> {
    fn schema() -> InputSchema {
        InputSchema::Untyped
    }
}

impl ToolInput for HashMap<String, Value> {
    fn schema() -> InputSchema {
        InputSchema::Untyped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(extra_fields: ExtraFields) -> InputSchema {
        InputSchema::structured(
            extra_fields,
            vec![
                FieldSpec::required("query", FieldKind::String).describe("Search text"),
                FieldSpec::optional("limit", FieldKind::Integer),
                FieldSpec::optional("threshold", FieldKind::Number),
                FieldSpec::optional("include_closed", FieldKind::Boolean),
            ],
        )
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_coerces_strings() {
        let coerced = schema(ExtraFields::Ignore)
            .coerce(
                "search",
                args(json!({
                    "query": "malware",
                    "limit": "25",
                    "threshold": "0.5",
                    "include_closed": "Yes",
                })),
            )
            .unwrap();

        assert_eq!(coerced["limit"], json!(25));
        assert_eq!(coerced["threshold"], json!(0.5));
        assert_eq!(coerced["include_closed"], json!(true));
    }

    #[test]
    fn test_integral_float_becomes_integer() {
        let coerced = schema(ExtraFields::Ignore)
            .coerce("search", args(json!({"query": "x", "limit": 10.0})))
            .unwrap();
        assert_eq!(coerced["limit"], json!(10));
        assert!(coerced["limit"].is_i64());
    }

    #[test]
    fn test_null_optional_is_absent() {
        let coerced = schema(ExtraFields::Ignore)
            .coerce("search", args(json!({"query": "x", "limit": null})))
            .unwrap();
        assert!(!coerced.contains_key("limit"));
    }

    #[test]
    fn test_all_issues_reported() {
        let err = schema(ExtraFields::Ignore)
            .coerce(
                "search",
                args(json!({"limit": "many", "include_closed": "maybe"})),
            )
            .unwrap_err();

        let fields: Vec<_> = err.issues().iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["query", "limit", "include_closed"]);
        assert_eq!(err.issues()[0].reason, "field required");
    }

    #[test]
    fn test_extras_ignored_or_forbidden() {
        let input = json!({"query": "x", "unexpected": 1});

        let coerced = schema(ExtraFields::Ignore)
            .coerce("search", args(input.clone()))
            .unwrap();
        assert!(!coerced.contains_key("unexpected"));

        let err = schema(ExtraFields::Forbid)
            .coerce("search", args(input))
            .unwrap_err();
        assert_eq!(err.issues()[0].field, "unexpected");
    }

    #[test]
    fn test_fractional_integer_rejected() {
        let err = schema(ExtraFields::Ignore)
            .coerce("search", args(json!({"query": "x", "limit": 2.5})))
            .unwrap_err();
        assert_eq!(err.issues()[0].field, "limit");
    }

    #[test]
    fn test_unsigned_integer_bounds() {
        let schema = InputSchema::structured(
            ExtraFields::Ignore,
            vec![FieldSpec::optional("limit", FieldKind::UnsignedInteger)],
        );

        let coerced = schema.coerce("t", args(json!({"limit": "25"}))).unwrap();
        assert_eq!(coerced["limit"], json!(25));

        for bad in [json!(-1), json!(4_294_967_296u64), json!("-3")] {
            let err = schema
                .coerce("t", args(json!({ "limit": bad })))
                .unwrap_err();
            assert_eq!(err.issues()[0].field, "limit");
            assert!(err.issues()[0].reason.contains("between 0 and"));
        }

        let rendered = schema.to_json_schema();
        assert_eq!(rendered["properties"]["limit"]["minimum"], 0);
        assert_eq!(rendered["properties"]["limit"]["type"], "integer");
    }

    #[test]
    fn test_untyped_schema_invalid() {
        assert!(matches!(
            <Value as ToolInput>::schema().validate("t"),
            Err(ToolError::InvalidDefinition { .. })
        ));
        assert!(<HashMap<String, Value> as ToolInput>::schema()
            .validate("t")
            .is_err());
    }

    #[test]
    fn test_duplicate_field_invalid() {
        let schema = InputSchema::structured(
            ExtraFields::Ignore,
            vec![
                FieldSpec::required("id", FieldKind::String),
                FieldSpec::optional("id", FieldKind::Integer),
            ],
        );
        assert!(schema.validate("t").is_err());
    }

    #[test]
    fn test_json_schema() {
        let rendered = schema(ExtraFields::Forbid).to_json_schema();
        assert_eq!(rendered["properties"]["query"]["type"], "string");
        assert_eq!(rendered["properties"]["query"]["description"], "Search text");
        assert_eq!(rendered["properties"]["limit"]["type"], "integer");
        assert_eq!(rendered["required"], json!(["query"]));
        assert_eq!(rendered["additionalProperties"], json!(false));
    }
}
