//! Core types and traits for sqlfox.
//!
//! This crate provides the foundations shared by the query compiler, the
//! executors and the ORM itself:
//!
//! - `Connection` trait for asynchronous database executors
//! - `Value` and `Row` for dynamically typed data
//! - `SqlType` for semantic column types
//! - `validate` for coercing raw input into typed fields
//! - `Outcome` re-export from asupersync for cancel-correct operations
//! - `Cx` context for structured concurrency

// Re-export asupersync primitives for structured concurrency
pub use asupersync::{Cx, Outcome};

pub mod connection;
pub mod error;
pub mod row;
pub mod types;
pub mod validate;
pub mod value;

pub use connection::{Connection, ConnectionConfig, Dialect};
pub use error::{
    BuilderError, ConnectionError, ConnectionErrorKind, Error, FieldValidationError,
    InstanceError, ModelError, QueryError, QueryErrorKind, RelationError, Result, TypeError,
    ValidationError, ValidationErrorKind,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::SqlType;
pub use validate::{
    ExtraFields, FieldShape, ValidateInput, ValidateOptions, ValidateResult, Validated, coerce,
    validate_input,
};
pub use value::Value;
