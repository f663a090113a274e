use serde_json::{Map as JsonMap, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Tool argument shapes are only known at runtime, per provider and per
/// tool, so each discovered schema is compiled once into a validator that
/// every later invocation runs its arguments through.
#[derive(Debug, Clone)]
pub struct ArgumentValidator {
    required: Vec<String>,
    properties: BTreeMap<String, PropertyType>,
    allow_additional: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    Any,
}

impl PropertyType {
    fn parse(declared: &Value) -> Option<Self> {
        match declared.as_str() {
            Some("string") => Some(PropertyType::String),
            Some("number") => Some(PropertyType::Number),
            Some("integer") => Some(PropertyType::Integer),
            Some("boolean") => Some(PropertyType::Boolean),
            Some("array") => Some(PropertyType::Array),
            Some("object") => Some(PropertyType::Object),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
            PropertyType::Array => "array",
            PropertyType::Object => "object",
            PropertyType::Any => "any",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("tool parameter schema must be a JSON object")]
    NotAnObject,
    #[error("unsupported type '{declared}' for property '{property}'")]
    UnsupportedType { property: String, declared: String },
    #[error("required property '{property}' is not declared and additional properties are forbidden")]
    ContradictoryRequired { property: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("tool arguments must be a JSON object")]
    NotAnObject,
    #[error("missing required argument '{field}'")]
    MissingRequired { field: String },
    #[error("argument '{field}' expected {expected}, got {actual}")]
    InvalidType {
        field: String,
        expected: &'static str,
        actual: String,
    },
    #[error("unexpected argument '{field}'")]
    UnexpectedArgument { field: String },
}

/// Compiles a JSON-Schema-like `inputSchema` into an [`ArgumentValidator`].
/// A self-contradictory schema fails here, which cancels that one tool's
/// registration without touching its siblings.
pub fn compile(schema: &Value) -> Result<ArgumentValidator, SchemaError> {
    let root = match schema {
        Value::Object(map) => map,
        // Providers may omit the schema entirely for argument-free tools.
        Value::Null => return Ok(ArgumentValidator::permissive()),
        _ => return Err(SchemaError::NotAnObject),
    };

    if let Some(declared) = root.get("type") {
        if declared.as_str() != Some("object") {
            return Err(SchemaError::NotAnObject);
        }
    }

    let mut properties = BTreeMap::new();
    if let Some(declared) = root.get("properties").and_then(Value::as_object) {
        for (name, property) in declared {
            let kind = match property.get("type") {
                None => PropertyType::Any,
                Some(declared) => PropertyType::parse(declared).ok_or_else(|| {
                    SchemaError::UnsupportedType {
                        property: name.clone(),
                        declared: declared.as_str().unwrap_or("<non-string>").to_string(),
                    }
                })?,
            };
            properties.insert(name.clone(), kind);
        }
    }

    let allow_additional = root
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let mut required = Vec::new();
    if let Some(names) = root.get("required").and_then(Value::as_array) {
        for name in names.iter().filter_map(Value::as_str) {
            if !properties.contains_key(name) && !allow_additional {
                return Err(SchemaError::ContradictoryRequired {
                    property: name.to_string(),
                });
            }
            required.push(name.to_string());
        }
    }

    Ok(ArgumentValidator {
        required,
        properties,
        allow_additional,
    })
}

impl ArgumentValidator {
    fn permissive() -> Self {
        Self {
            required: Vec::new(),
            properties: BTreeMap::new(),
            allow_additional: true,
        }
    }

    /// Checks and coerces one invocation's arguments. `null` stands in for
    /// an empty argument object; string values are losslessly coerced to
    /// the declared number or boolean type where possible.
    pub fn validate(&self, arguments: &Value) -> Result<Value, ArgumentError> {
        let supplied = match arguments {
            Value::Null => JsonMap::new(),
            Value::Object(map) => map.clone(),
            _ => return Err(ArgumentError::NotAnObject),
        };

        for field in &self.required {
            if !supplied.contains_key(field) {
                return Err(ArgumentError::MissingRequired {
                    field: field.clone(),
                });
            }
        }

        let mut checked = JsonMap::new();
        for (field, value) in supplied {
            match self.properties.get(&field) {
                Some(kind) => {
                    let value = coerce(&field, value, *kind)?;
                    checked.insert(field, value);
                }
                None if self.allow_additional => {
                    checked.insert(field, value);
                }
                None => return Err(ArgumentError::UnexpectedArgument { field }),
            }
        }

        Ok(Value::Object(checked))
    }
}

fn coerce(field: &str, value: Value, kind: PropertyType) -> Result<Value, ArgumentError> {
    let matches = match kind {
        PropertyType::Any => true,
        PropertyType::String => value.is_string(),
        PropertyType::Number => value.is_number(),
        PropertyType::Integer => value.is_i64() || value.is_u64(),
        PropertyType::Boolean => value.is_boolean(),
        PropertyType::Array => value.is_array(),
        PropertyType::Object => value.is_object(),
    };
    if matches {
        return Ok(value);
    }

    if let Value::String(text) = &value {
        let parsed = match kind {
            PropertyType::Number => text.parse::<f64>().ok().and_then(|n| {
                serde_json::Number::from_f64(n).map(Value::Number)
            }),
            PropertyType::Integer => text.parse::<i64>().ok().map(Value::from),
            PropertyType::Boolean => text.parse::<bool>().ok().map(Value::Bool),
            _ => None,
        };
        if let Some(parsed) = parsed {
            return Ok(parsed);
        }
    }

    Err(ArgumentError::InvalidType {
        field: field.to_string(),
        expected: kind.name(),
        actual: type_name(&value).to_string(),
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string" },
                "days": { "type": "integer" },
                "detailed": { "type": "boolean" }
            },
            "required": ["city"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_valid_arguments() {
        let validator = compile(&weather_schema()).expect("compile");
        let checked = validator
            .validate(&json!({ "city": "Jakarta", "days": 3 }))
            .expect("validate");
        assert_eq!(checked, json!({ "city": "Jakarta", "days": 3 }));
    }

    #[test]
    fn null_arguments_become_empty_object() {
        let validator = compile(&json!({ "type": "object" })).expect("compile");
        assert_eq!(validator.validate(&Value::Null).expect("validate"), json!({}));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let validator = compile(&weather_schema()).expect("compile");
        let error = validator.validate(&json!({ "days": 3 })).expect_err("must fail");
        assert_eq!(
            error,
            ArgumentError::MissingRequired { field: "city".into() }
        );
    }

    #[test]
    fn wrong_type_is_rejected() {
        let validator = compile(&weather_schema()).expect("compile");
        let error = validator
            .validate(&json!({ "city": 42 }))
            .expect_err("must fail");
        assert!(matches!(error, ArgumentError::InvalidType { .. }));
    }

    #[test]
    fn undeclared_field_is_rejected_when_forbidden() {
        let validator = compile(&weather_schema()).expect("compile");
        let error = validator
            .validate(&json!({ "city": "Jakarta", "zip": "12345" }))
            .expect_err("must fail");
        assert_eq!(
            error,
            ArgumentError::UnexpectedArgument { field: "zip".into() }
        );
    }

    #[test]
    fn string_values_coerce_to_declared_scalars() {
        let validator = compile(&weather_schema()).expect("compile");
        let checked = validator
            .validate(&json!({ "city": "Jakarta", "days": "5", "detailed": "true" }))
            .expect("validate");
        assert_eq!(checked, json!({ "city": "Jakarta", "days": 5, "detailed": true }));
    }

    #[test]
    fn contradictory_required_fails_compilation() {
        let schema = json!({
            "type": "object",
            "properties": { "city": { "type": "string" } },
            "required": ["city", "phantom"],
            "additionalProperties": false
        });
        let error = compile(&schema).expect_err("must fail");
        assert_eq!(
            error,
            SchemaError::ContradictoryRequired { property: "phantom".into() }
        );
    }

    #[test]
    fn non_object_root_fails_compilation() {
        assert_eq!(compile(&json!("string")).expect_err("must fail"), SchemaError::NotAnObject);
        assert_eq!(
            compile(&json!({ "type": "array" })).expect_err("must fail"),
            SchemaError::NotAnObject
        );
    }

    #[test]
    fn unknown_property_type_fails_compilation() {
        let schema = json!({
            "type": "object",
            "properties": { "blob": { "type": "binary" } }
        });
        assert!(matches!(
            compile(&schema).expect_err("must fail"),
            SchemaError::UnsupportedType { .. }
        ));
    }

    #[test]
    fn missing_schema_is_permissive() {
        let validator = compile(&Value::Null).expect("compile");
        let checked = validator
            .validate(&json!({ "anything": [1, 2, 3] }))
            .expect("validate");
        assert_eq!(checked, json!({ "anything": [1, 2, 3] }));
    }
}
