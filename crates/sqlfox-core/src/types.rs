//! SQL type definitions and mapping.

use crate::value::Value;

/// Semantic SQL types a column can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    // Integer types
    Integer,
    BigInt,

    // Floating point
    Float,

    // Boolean
    Boolean,

    // String types
    Text,

    // Binary
    Blob,

    // Date/time types
    Date,
    Time,
    DateTime,
    Interval,

    // JSON
    Json,
    JsonB,

    // Custom type name
    Custom(&'static str),
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> String {
        match self {
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Float => "DOUBLE PRECISION".to_string(),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Blob => "BLOB".to_string(),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::DateTime => "TIMESTAMP".to_string(),
            SqlType::Interval => "INTERVAL".to_string(),
            SqlType::Json => "JSON".to_string(),
            SqlType::JsonB => "JSONB".to_string(),
            SqlType::Custom(name) => (*name).to_string(),
        }
    }

    /// Check if this type is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(self, SqlType::Integer | SqlType::BigInt)
    }

    /// Check if this type stores JSON documents.
    pub const fn is_json(&self) -> bool {
        matches!(self, SqlType::Json | SqlType::JsonB)
    }

    /// Check if this type is a date/time type.
    pub const fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date | SqlType::Time | SqlType::DateTime | SqlType::Interval
        )
    }

    /// Whether a value of this shape can be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (SqlType::Custom(_), _) => true,
            (SqlType::Integer, Value::Int(_))
            | (SqlType::BigInt, Value::Int(_) | Value::BigInt(_))
            | (SqlType::Float, Value::Double(_))
            | (SqlType::Boolean, Value::Bool(_))
            | (SqlType::Text, Value::Text(_))
            | (SqlType::Blob, Value::Bytes(_))
            | (SqlType::Date, Value::Date(_))
            | (SqlType::Time, Value::Time(_))
            | (SqlType::DateTime, Value::Timestamp(_))
            | (SqlType::Interval, Value::Interval(_))
            | (SqlType::Json | SqlType::JsonB, Value::Json(_)) => true,
            _ => false,
        }
    }
}
