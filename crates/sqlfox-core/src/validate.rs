//! Input validation and coercion.
//!
//! Turns a raw input mapping into typed column values for a declared set of
//! field shapes, collecting every field-level problem into one
//! [`ValidationError`] instead of stopping at the first.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::ValidationError;
use crate::types::SqlType;
use crate::value::Value;

/// Input types accepted by [`validate_input`].
#[derive(Debug, Clone)]
pub enum ValidateInput {
    /// Field names mapped to already-typed values.
    Dict(HashMap<String, Value>),
    /// A JSON object string to parse.
    Json(String),
    /// A parsed JSON object.
    JsonValue(serde_json::Value),
}

impl From<HashMap<String, Value>> for ValidateInput {
    fn from(map: HashMap<String, Value>) -> Self {
        ValidateInput::Dict(map)
    }
}

impl From<Vec<(String, Value)>> for ValidateInput {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        ValidateInput::Dict(pairs.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, Value); N]> for ValidateInput {
    fn from(pairs: [(&str, Value); N]) -> Self {
        ValidateInput::Dict(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

impl From<&str> for ValidateInput {
    fn from(json: &str) -> Self {
        ValidateInput::Json(json.to_string())
    }
}

impl From<serde_json::Value> for ValidateInput {
    fn from(value: serde_json::Value) -> Self {
        ValidateInput::JsonValue(value)
    }
}

/// What to do with input keys that match no declared field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExtraFields {
    /// Drop them silently.
    Ignore,
    /// Report each one as an error.
    #[default]
    Forbid,
    /// Pass them through unchanged.
    Allow,
}

/// Options for [`validate_input`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// If true, values must already have the exact column shape.
    pub strict: bool,
    /// Policy for undeclared input keys.
    pub extra: ExtraFields,
}

impl ValidateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable strict mode (no implicit type conversions).
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn extra(mut self, policy: ExtraFields) -> Self {
        self.extra = policy;
        self
    }
}

/// The shape of one declared field, as seen by validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldShape {
    pub name: String,
    pub sql_type: SqlType,
    /// NULL is an acceptable value.
    pub nullable: bool,
    /// The field must be present in the input.
    pub required: bool,
}

impl FieldShape {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            required: false,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }
}

/// Coerced values plus the names the caller actually supplied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validated {
    pub values: BTreeMap<String, Value>,
    pub fields_set: BTreeSet<String>,
}

/// Result type for validation.
pub type ValidateResult<T> = std::result::Result<T, ValidationError>;

/// Validate `input` against `shapes`.
pub fn validate_input(
    shapes: &[FieldShape],
    input: impl Into<ValidateInput>,
    options: ValidateOptions,
) -> ValidateResult<Validated> {
    let mut errors = ValidationError::new();
    let raw = match normalize(input.into(), shapes) {
        Ok(raw) => raw,
        Err(message) => {
            errors.add_custom("__root__", message);
            return Err(errors);
        }
    };

    let mut out = Validated::default();
    for (name, value) in &raw {
        if shapes.iter().any(|s| &s.name == name) {
            continue;
        }
        match options.extra {
            ExtraFields::Ignore => {}
            ExtraFields::Forbid => errors.add_extra(name.clone()),
            ExtraFields::Allow => {
                out.values.insert(name.clone(), value.clone());
                out.fields_set.insert(name.clone());
            }
        }
    }

    for shape in shapes {
        let Some(value) = raw.get(&shape.name) else {
            if shape.required {
                errors.add_required(shape.name.clone());
            }
            continue;
        };
        if value.is_null() {
            if shape.nullable {
                out.values.insert(shape.name.clone(), Value::Null);
                out.fields_set.insert(shape.name.clone());
            } else {
                errors.add_custom(shape.name.clone(), "none is not an allowed value");
            }
            continue;
        }
        match coerce(value, &shape.sql_type, options.strict) {
            Some(coerced) => {
                out.values.insert(shape.name.clone(), coerced);
                out.fields_set.insert(shape.name.clone());
            }
            None => errors.add_wrong_type(
                shape.name.clone(),
                &shape.sql_type.sql_name(),
                value.type_name(),
            ),
        }
    }

    if !errors.is_empty() {
        tracing::debug!(errors = errors.errors.len(), "Input failed validation");
    }
    errors.into_result().map(|()| out)
}

fn normalize(input: ValidateInput, shapes: &[FieldShape]) -> Result<HashMap<String, Value>, String> {
    let object = match input {
        ValidateInput::Dict(map) => return Ok(map),
        ValidateInput::Json(text) => {
            serde_json::from_str::<serde_json::Value>(&text).map_err(|e| e.to_string())?
        }
        ValidateInput::JsonValue(value) => value,
    };
    let serde_json::Value::Object(map) = object else {
        return Err("input must be a JSON object".to_string());
    };
    Ok(map
        .into_iter()
        .map(|(key, json)| {
            let sql_type = shapes.iter().find(|s| s.name == key).map(|s| &s.sql_type);
            let value = from_json(json, sql_type);
            (key, value)
        })
        .collect())
}

fn from_json(json: serde_json::Value, sql_type: Option<&SqlType>) -> Value {
    if sql_type.is_some_and(SqlType::is_json) {
        return if json.is_null() {
            Value::Null
        } else {
            Value::Json(json)
        };
    }
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::BigInt(i),
            None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

/// Coerce `value` into the shape stored for `sql_type`.
///
/// Returns `None` when no coercion applies. In strict mode only values that
/// already have the column's shape (or widen losslessly) are accepted.
pub fn coerce(value: &Value, sql_type: &SqlType, strict: bool) -> Option<Value> {
    if sql_type.accepts(value) {
        return Some(match (sql_type, value) {
            (SqlType::BigInt, Value::Int(v)) => Value::BigInt(i64::from(*v)),
            _ => value.clone(),
        });
    }
    if strict {
        return None;
    }
    match sql_type {
        SqlType::Integer => match value {
            Value::BigInt(v) => i32::try_from(*v).ok().map(Value::Int),
            Value::Bool(v) => Some(Value::Int(i32::from(*v))),
            #[allow(clippy::cast_possible_truncation)]
            Value::Double(v) if v.fract() == 0.0 && v.abs() <= f64::from(i32::MAX) => {
                Some(Value::Int(*v as i32))
            }
            Value::Text(s) => s.trim().parse().ok().map(Value::Int),
            _ => None,
        },
        SqlType::BigInt => match value {
            Value::Bool(v) => Some(Value::BigInt(i64::from(*v))),
            Value::Text(s) => s.trim().parse().ok().map(Value::BigInt),
            _ => None,
        },
        SqlType::Float => match value {
            Value::Int(_) | Value::BigInt(_) => value.as_f64().map(Value::Double),
            Value::Text(s) => s.trim().parse().ok().map(Value::Double),
            _ => None,
        },
        SqlType::Boolean => match value {
            Value::Int(0) | Value::BigInt(0) => Some(Value::Bool(false)),
            Value::Int(1) | Value::BigInt(1) => Some(Value::Bool(true)),
            Value::Text(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            _ => None,
        },
        SqlType::Text => match value {
            Value::Int(v) => Some(Value::Text(v.to_string())),
            Value::BigInt(v) => Some(Value::Text(v.to_string())),
            Value::Double(v) => Some(Value::Text(v.to_string())),
            _ => None,
        },
        SqlType::Date => value.as_i64().and_then(|v| i32::try_from(v).ok()).map(Value::Date),
        SqlType::Time => value.as_i64().map(Value::Time),
        SqlType::DateTime => value.as_i64().map(Value::Timestamp),
        // Bare numbers are seconds.
        SqlType::Interval => match value {
            Value::Int(_) | Value::BigInt(_) => {
                value.as_i64().and_then(|s| s.checked_mul(1_000_000)).map(Value::Interval)
            }
            #[allow(clippy::cast_possible_truncation)]
            Value::Double(s) => Some(Value::Interval((s * 1_000_000.0).round() as i64)),
            _ => None,
        },
        SqlType::Json | SqlType::JsonB => Some(Value::Json(value.clone().into())),
        SqlType::Blob => match value {
            Value::Text(s) => Some(Value::Bytes(s.clone().into_bytes())),
            _ => None,
        },
        SqlType::Custom(_) => Some(value.clone()),
    }
}
