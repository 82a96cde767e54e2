//! Error types for sqlfox operations.

use std::fmt;

/// The primary error type for all sqlfox operations.
#[derive(Debug)]
pub enum Error {
    /// Connection registry and executor lifecycle errors
    Connection(ConnectionError),
    /// Statement execution errors reported by the executor
    Query(QueryError),
    /// Value conversion errors
    Type(TypeError),
    /// Errors raised while building a model class
    Model(ModelError),
    /// Errors raised by operations on a model instance
    Instance(InstanceError),
    /// Errors raised by relation objects
    Relation(RelationError),
    /// Errors raised by the fluent query builder
    Builder(BuilderError),
    /// Aggregate input validation failure
    Validation(ValidationError),
    /// Serialization/deserialization errors
    Serde(String),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection lost or closed during operation
    Disconnected,
    /// A named connection was initialized twice
    AlreadyInitialized,
    /// A named connection was used before `init`
    NotInitialized,
    /// No connection registered under the requested name
    Unknown,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Bound parameters do not match the statement
    Parameter,
    /// Database busy or locked
    Busy,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

/// Model-construction-time failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// A field was declared without a type annotation.
    UnannotatedField(String),
    /// A field name uses the reserved `__` prefix.
    PrivateField(String),
    /// No primary key after inheritance merge.
    NoPrimaryKey,
    /// More than one column flagged as primary key.
    MultiplePrimaryKeys(Vec<String>),
    /// Abstract models may not declare relations.
    AbstractModelRelation,
    /// The declared type has no column mapping.
    UnsupportedType { type_name: String, column: String },
    /// Neither the annotation nor a modifier resolves to a type.
    NoType(String),
    /// More than one type override in the modifier list.
    MultipleTypes(String),
    /// A modifier is neither a type nor a column argument.
    UnknownArgument { repr: String, type_name: String },
    /// A table of this name is already registered.
    DuplicateTable(String),
    /// A relation target could not be resolved at finalize time.
    UnresolvedTarget { relation: String, target: String },
    /// A many-to-many relation names the owning model as its target.
    SelfReferentialAssociation(String),
    /// A foreign-key target is not of the form `table.column`.
    InvalidForeignKey(String),
}

/// Instance-operation-time failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceError {
    /// Reading an undeclared name.
    NoSuchColumn(String),
    /// Writing or filtering on an undeclared name.
    InvalidColumn(String),
    /// The operation needs a persisted row.
    Unbound,
    /// The primary key of a bound instance was reassigned.
    ImmutablePrimaryKey(String),
    /// Abstract models cannot be instantiated.
    AbstractInstantiation,
    /// A relation name was assigned like a plain field.
    RelationAssignment(String),
    /// Bound, yet the primary key is absent.
    MissingPrimaryKey,
}

/// Relation-operation-time failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationError {
    /// The relation has not been resolved by `finalize_relations`.
    Uninitialized(String),
    /// The local collection was accessed before `fetch`.
    NotFetched(String),
    /// The object is not an instance of the relation's target model.
    TargetMismatch { expected: String, got: String },
    /// A local removal found no entry for the identifier.
    NotInList(i64),
}

/// Query-builder-time failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    /// A structural mutator was called after a raw query was attached.
    QueryBuilt,
    /// A pre-built query of the wrong kind was attached.
    InvalidQueryType { got: String, expected: Option<String> },
    /// Malformed argument combination (both forms, or neither).
    Arguments(String),
    /// `order_by` keyword value outside `{-1, 1}`.
    InvalidOrder(i32),
}

/// Validation error for field-level validation.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The errors, one per offending field
    pub errors: Vec<FieldValidationError>,
}

/// A single validation error for a field.
#[derive(Debug, Clone)]
pub struct FieldValidationError {
    /// The field name that failed validation
    pub field: String,
    /// The kind of validation that failed
    pub kind: ValidationErrorKind,
    /// Human-readable error message
    pub message: String,
}

/// The type of validation constraint that was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationErrorKind {
    /// Required field is missing/null
    Required,
    /// Value cannot be coerced to the field type
    WrongType,
    /// Field is not declared on the model
    Extra,
    /// Custom validation failed
    Custom,
}

impl ValidationError {
    /// Create a new empty validation error container.
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Check if there are any validation errors.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add a field validation error.
    pub fn add(
        &mut self,
        field: impl Into<String>,
        kind: ValidationErrorKind,
        message: impl Into<String>,
    ) {
        self.errors.push(FieldValidationError {
            field: field.into(),
            kind,
            message: message.into(),
        });
    }

    /// Add a required field error.
    pub fn add_required(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Required, "is required");
    }

    /// Add a type mismatch error.
    pub fn add_wrong_type(&mut self, field: impl Into<String>, expected: &str, actual: &str) {
        self.add(
            field,
            ValidationErrorKind::WrongType,
            format!("expected {expected}, got {actual}"),
        );
    }

    /// Add an undeclared field error.
    pub fn add_extra(&mut self, field: impl Into<String>) {
        self.add(field, ValidationErrorKind::Extra, "extra fields not permitted");
    }

    /// Add a custom validation error.
    pub fn add_custom(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.add(field, ValidationErrorKind::Custom, message);
    }

    /// Convert to Result, returning Ok(()) if no errors, Err(self) otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl Default for ValidationError {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Is this a connection error that likely requires reconnection?
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect | ConnectionErrorKind::Disconnected,
                ..
            })
        )
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a "not initialized" registry error.
    pub fn not_initialized(name: &str) -> Self {
        Error::Connection(ConnectionError::new(
            ConnectionErrorKind::NotInitialized,
            format!("Connection {name:?} is not initialized"),
        ))
    }

    /// Shorthand for an "already initialized" registry error.
    pub fn already_initialized(name: &str) -> Self {
        Error::Connection(ConnectionError::new(
            ConnectionErrorKind::AlreadyInitialized,
            format!("Connection {name:?} is already initialized"),
        ))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Model(e) => write!(f, "{}", e),
            Error::Instance(e) => write!(f, "{}", e),
            Error::Relation(e) => write!(f, "{}", e),
            Error::Builder(e) => write!(f, "{}", e),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::Serde(msg) => write!(f, "Serialization error: {}", msg),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Validation(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnannotatedField(name) => write!(f, "Unannotated field '{}'", name),
            ModelError::PrivateField(name) => {
                write!(f, "Fields starting with __ are not allowed (got '{}')", name)
            }
            ModelError::NoPrimaryKey => write!(f, "Model must have at least one primary key"),
            ModelError::MultiplePrimaryKeys(names) => {
                write!(f, "Model must have exactly one primary key (got {:?})", names)
            }
            ModelError::AbstractModelRelation => {
                write!(f, "Abstract models cannot have relations")
            }
            ModelError::UnsupportedType { type_name, column } => write!(
                f,
                "Unsupported type '{}' specified in annotation for column '{}'",
                type_name, column
            ),
            ModelError::NoType(column) => write!(f, "No type specified for column '{}'", column),
            ModelError::MultipleTypes(column) => write!(
                f,
                "More than one type specified in arguments for column '{}'",
                column
            ),
            ModelError::UnknownArgument { repr, type_name } => {
                write!(f, "Argument {} has unknown type {}", repr, type_name)
            }
            ModelError::DuplicateTable(name) => {
                write!(f, "Table '{}' is already defined in this registry", name)
            }
            ModelError::UnresolvedTarget { relation, target } => write!(
                f,
                "Relation '{}' targets unknown model '{}'",
                relation, target
            ),
            ModelError::SelfReferentialAssociation(name) => write!(
                f,
                "Association table '{}' would join a table to itself",
                name
            ),
            ModelError::InvalidForeignKey(target) => write!(
                f,
                "Foreign key target '{}' must have the form table.column",
                target
            ),
        }
    }
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceError::NoSuchColumn(name) => write!(f, "No such column '{}'", name),
            InstanceError::InvalidColumn(name) => write!(f, "Invalid column '{}'", name),
            InstanceError::Unbound => write!(f, "Instance is not bound to db, call .save first"),
            InstanceError::ImmutablePrimaryKey(name) => write!(
                f,
                "Primary key '{}' cannot be changed on a bound instance",
                name
            ),
            InstanceError::AbstractInstantiation => {
                write!(f, "Abstract models cannot be instantiated")
            }
            InstanceError::RelationAssignment(name) => write!(
                f,
                "'{}' is a relation; use its add/delete methods instead of assignment",
                name
            ),
            InstanceError::MissingPrimaryKey => {
                write!(f, "Instance is bound but has no primary key value")
            }
        }
    }
}

impl fmt::Display for RelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationError::Uninitialized(name) => write!(
                f,
                "Relation '{}' is not initialized, call finalize_relations first",
                name
            ),
            RelationError::NotFetched(name) => {
                write!(f, "Relation '{}' is not fetched, call .fetch first", name)
            }
            RelationError::TargetMismatch { expected, got } => write!(
                f,
                "Relation expects instances of '{}', got '{}'",
                expected, got
            ),
            RelationError::NotInList(id) => write!(f, "Object {} not in list", id),
        }
    }
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuilderError::QueryBuilt => write!(
                f,
                "Query is already built, but you are trying to call a method modifying it"
            ),
            BuilderError::InvalidQueryType { got, expected } => {
                write!(f, "Invalid query type '{}'", got)?;
                if let Some(expected) = expected {
                    write!(f, ", expected '{}'", expected)?;
                }
                Ok(())
            }
            BuilderError::Arguments(message) => write!(f, "{}", message),
            BuilderError::InvalidOrder(value) => write!(
                f,
                "Keyword argument value must be -1 or 1 (got {})",
                value
            ),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            write!(f, "validation passed")
        } else if self.errors.len() == 1 {
            let err = &self.errors[0];
            write!(f, "validation error on '{}': {}", err.field, err.message)
        } else {
            writeln!(f, "validation errors:")?;
            for err in &self.errors {
                writeln!(f, "  - {}: {}", err.field, err.message)?;
            }
            Ok(())
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ModelError> for Error {
    fn from(err: ModelError) -> Self {
        Error::Model(err)
    }
}

impl From<InstanceError> for Error {
    fn from(err: InstanceError) -> Self {
        Error::Instance(err)
    }
}

impl From<RelationError> for Error {
    fn from(err: RelationError) -> Self {
        Error::Relation(err)
    }
}

impl From<BuilderError> for Error {
    fn from(err: BuilderError) -> Self {
        Error::Builder(err)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serde(err.to_string())
    }
}

/// Result type alias for sqlfox operations.
pub type Result<T> = std::result::Result<T, Error>;
