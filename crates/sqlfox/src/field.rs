//! Field declarations and their translation into column definitions.
//!
//! A field is declared with a [`DeclaredType`] (usually derived from a Rust
//! type through [`Annotated`]) plus a list of [`Modifier`]s. [`translate`]
//! resolves both into one immutable [`ColumnDef`], or fails before anything
//! is registered.
//!
//! ```ignore
//! use sqlfox::field::{autoincrement, default, fkey, int64, null, pkey};
//!
//! FieldDecl::typed("id", int64()).with((pkey(), autoincrement()));
//! FieldDecl::new::<i32>("balance").with(default(100));
//! FieldDecl::new::<i64>("group_id").with((fkey("group.id"), !null()));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Not;
use std::sync::Arc;
use std::time::Duration;

use sqlfox_core::{Dialect, Error, FieldShape, ModelError, Result, SqlType, Value};
use sqlfox_query::Expr;

/// Built-in scalar kinds with a fixed column mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Integer,
    Float,
    Text,
    Boolean,
    DateTime,
    Date,
    Time,
    Duration,
    /// String-keyed mapping, stored as JSON.
    Map,
    /// Sequence, stored as JSON.
    List,
    /// Any serializable structure, stored as JSON.
    Structured,
}

impl ScalarKind {
    /// The type table.
    pub const fn sql_type(self) -> SqlType {
        match self {
            ScalarKind::Integer => SqlType::Integer,
            ScalarKind::Float => SqlType::Float,
            ScalarKind::Text => SqlType::Text,
            ScalarKind::Boolean => SqlType::Boolean,
            ScalarKind::DateTime => SqlType::DateTime,
            ScalarKind::Date => SqlType::Date,
            ScalarKind::Time => SqlType::Time,
            ScalarKind::Duration => SqlType::Interval,
            ScalarKind::Map | ScalarKind::List | ScalarKind::Structured => SqlType::Json,
        }
    }
}

/// The type a field is declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    /// A built-in scalar kind, mapped through the type table.
    Scalar(ScalarKind),
    /// A raw SQL type, used as-is.
    Sql(SqlType),
    /// Nullable wrapper around an inner type.
    Optional(Box<DeclaredType>),
    /// A generic shape with no column mapping, such as a tuple.
    Unsupported(String),
    /// A named type with no mapping of its own; needs a type override.
    Opaque(String),
}

impl DeclaredType {
    pub fn scalar(kind: ScalarKind) -> Self {
        DeclaredType::Scalar(kind)
    }

    pub fn optional(inner: impl Into<DeclaredType>) -> Self {
        DeclaredType::Optional(Box::new(inner.into()))
    }

    /// Unwrap optional layers: `(mapped type, required)`.
    fn resolve(&self, column: &str) -> Result<(Option<SqlType>, bool)> {
        match self {
            DeclaredType::Scalar(kind) => Ok((Some(kind.sql_type()), true)),
            DeclaredType::Sql(sql_type) => Ok((Some(sql_type.clone()), true)),
            DeclaredType::Optional(inner) => {
                let (sql_type, _) = inner.resolve(column)?;
                Ok((sql_type, false))
            }
            DeclaredType::Unsupported(type_name) => Err(Error::Model(ModelError::UnsupportedType {
                type_name: type_name.clone(),
                column: column.to_string(),
            })),
            DeclaredType::Opaque(_) => Ok((None, true)),
        }
    }
}

impl From<ScalarKind> for DeclaredType {
    fn from(kind: ScalarKind) -> Self {
        DeclaredType::Scalar(kind)
    }
}

impl From<SqlType> for DeclaredType {
    fn from(sql_type: SqlType) -> Self {
        DeclaredType::Sql(sql_type)
    }
}

/// Rust types with a known field declaration.
pub trait Annotated {
    fn declared_type() -> DeclaredType;
}

macro_rules! annotated {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Annotated for $ty {
                fn declared_type() -> DeclaredType {
                    DeclaredType::Scalar(ScalarKind::$kind)
                }
            }
        )*
    };
}

annotated! {
    i16 => Integer,
    i32 => Integer,
    i64 => Integer,
    f32 => Float,
    f64 => Float,
    String => Text,
    bool => Boolean,
    Duration => Duration,
    serde_json::Value => Structured,
}

impl<T: Annotated> Annotated for Option<T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::optional(T::declared_type())
    }
}

impl<T> Annotated for Vec<T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::Scalar(ScalarKind::List)
    }
}

impl<T> Annotated for BTreeMap<String, T> {
    fn declared_type() -> DeclaredType {
        DeclaredType::Scalar(ScalarKind::Map)
    }
}

impl<T, S> Annotated for HashMap<String, T, S> {
    fn declared_type() -> DeclaredType {
        DeclaredType::Scalar(ScalarKind::Map)
    }
}

/// `BIGINT`, as a declared type or a type override.
pub fn int64() -> SqlType {
    SqlType::BigInt
}

/// `JSON`, as a declared type or a type override.
pub fn json() -> SqlType {
    SqlType::Json
}

/// `JSONB`, as a declared type or a type override.
pub fn jsonb() -> SqlType {
    SqlType::JsonB
}

/// Which column property a flag controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKey {
    Nullable,
    PrimaryKey,
    Autoincrement,
    Unique,
    Index,
}

/// A boolean column property. `!flag` yields the inverted flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnFlag {
    pub key: FlagKey,
    pub inverse: bool,
}

impl ColumnFlag {
    pub const fn new(key: FlagKey) -> Self {
        Self { key, inverse: false }
    }

    pub const fn value(self) -> bool {
        !self.inverse
    }
}

impl Not for ColumnFlag {
    type Output = ColumnFlag;

    fn not(self) -> ColumnFlag {
        ColumnFlag {
            key: self.key,
            inverse: !self.inverse,
        }
    }
}

pub const fn null() -> ColumnFlag {
    ColumnFlag::new(FlagKey::Nullable)
}

pub const fn pkey() -> ColumnFlag {
    ColumnFlag::new(FlagKey::PrimaryKey)
}

pub const fn autoincrement() -> ColumnFlag {
    ColumnFlag::new(FlagKey::Autoincrement)
}

pub const fn unique() -> ColumnFlag {
    ColumnFlag::new(FlagKey::Unique)
}

pub const fn index() -> ColumnFlag {
    ColumnFlag::new(FlagKey::Index)
}

/// Produces a fresh value each time an instance is constructed.
#[derive(Clone)]
pub struct DefaultFn(Arc<dyn Fn() -> Value + Send + Sync>);

impl DefaultFn {
    pub fn call(&self) -> Value {
        (self.0)()
    }
}

impl fmt::Debug for DefaultFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DefaultFn(..)")
    }
}

/// A field default.
#[derive(Debug, Clone)]
pub enum FieldDefault {
    /// A static value, used for new instances and as the server default.
    Value(Value),
    /// Generated at construction time, never a server default.
    Factory(DefaultFn),
    /// A raw SQL expression rendered as the server default, e.g. `CURRENT_TIMESTAMP`.
    Expr(String),
}

/// Server-side default as it appears in DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerDefault {
    /// Rendered as a quoted string literal.
    Literal(String),
    /// Rendered verbatim.
    Expr(String),
}

/// `table.column` target of a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

impl ForeignKey {
    pub fn parse(target: &str) -> Result<Self> {
        match target.split_once('.') {
            Some((table, column))
                if !table.is_empty() && !column.is_empty() && !column.contains('.') =>
            {
                Ok(Self {
                    table: table.to_string(),
                    column: column.to_string(),
                })
            }
            _ => Err(Error::Model(ModelError::InvalidForeignKey(target.to_string()))),
        }
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Construction parameters accumulated while applying modifiers.
#[derive(Debug, Clone, Default)]
pub struct ColumnArgs {
    pub nullable: Option<bool>,
    pub primary_key: bool,
    pub autoincrement: Option<bool>,
    pub unique: bool,
    pub index: bool,
    pub foreign_key: Option<ForeignKey>,
    pub server_default: Option<ServerDefault>,
    pub default: Option<FieldDefault>,
}

/// A modifier that shapes the column without changing its type.
#[derive(Debug, Clone)]
pub enum ColumnArgument {
    Flag(ColumnFlag),
    Default(FieldDefault),
    ForeignKey(String),
}

impl ColumnArgument {
    /// Apply to the construction parameters of a column of type `resolved`.
    pub fn apply(&self, args: &mut ColumnArgs, resolved: &SqlType) -> Result<()> {
        match self {
            ColumnArgument::Flag(flag) => {
                let value = flag.value();
                match flag.key {
                    FlagKey::Nullable => args.nullable = Some(value),
                    FlagKey::PrimaryKey => args.primary_key = value,
                    FlagKey::Autoincrement => args.autoincrement = Some(value),
                    FlagKey::Unique => args.unique = value,
                    FlagKey::Index => args.index = value,
                }
            }
            ColumnArgument::Default(default) => {
                args.server_default = match default {
                    FieldDefault::Value(Value::Null) | FieldDefault::Factory(_) => None,
                    FieldDefault::Value(value) if resolved.is_json() => Some(ServerDefault::Literal(
                        serde_json::to_string(&serde_json::Value::from(value.clone()))?,
                    )),
                    FieldDefault::Value(value) => {
                        Some(ServerDefault::Literal(value.to_default_string()))
                    }
                    FieldDefault::Expr(sql) => Some(ServerDefault::Expr(sql.clone())),
                };
                args.default = match default {
                    FieldDefault::Expr(_) => None,
                    other => Some(other.clone()),
                };
            }
            ColumnArgument::ForeignKey(target) => {
                args.foreign_key = Some(ForeignKey::parse(target)?);
            }
        }
        Ok(())
    }
}

/// Static default value.
pub fn default(value: impl Into<Value>) -> ColumnArgument {
    ColumnArgument::Default(FieldDefault::Value(value.into()))
}

/// Default produced by `factory` for every new instance.
pub fn default_fn<F, V>(factory: F) -> ColumnArgument
where
    F: Fn() -> V + Send + Sync + 'static,
    V: Into<Value>,
{
    ColumnArgument::Default(FieldDefault::Factory(DefaultFn(Arc::new(move || {
        factory().into()
    }))))
}

/// Server default given as raw SQL.
pub fn default_expr(sql: impl Into<String>) -> ColumnArgument {
    ColumnArgument::Default(FieldDefault::Expr(sql.into()))
}

/// Foreign key to `table.column`.
pub fn fkey(target: impl Into<String>) -> ColumnArgument {
    ColumnArgument::ForeignKey(target.into())
}

/// One entry of a field's modifier list.
#[derive(Debug, Clone)]
pub enum Modifier {
    /// Explicit type override.
    Type(SqlType),
    Argument(ColumnArgument),
    /// Anything else; rejected by [`translate`].
    Unknown { repr: String, type_name: String },
}

impl Modifier {
    /// Wrap an arbitrary value so the error can name it.
    pub fn unknown<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Modifier::Unknown {
            repr: format!("{value:?}"),
            type_name: std::any::type_name::<T>().to_string(),
        }
    }
}

impl From<SqlType> for Modifier {
    fn from(sql_type: SqlType) -> Self {
        Modifier::Type(sql_type)
    }
}

impl From<ScalarKind> for Modifier {
    fn from(kind: ScalarKind) -> Self {
        Modifier::Type(kind.sql_type())
    }
}

impl From<ColumnArgument> for Modifier {
    fn from(arg: ColumnArgument) -> Self {
        Modifier::Argument(arg)
    }
}

impl From<ColumnFlag> for Modifier {
    fn from(flag: ColumnFlag) -> Self {
        Modifier::Argument(ColumnArgument::Flag(flag))
    }
}

/// Zero, one or a tuple of modifiers.
pub trait IntoModifiers {
    fn into_modifiers(self) -> Vec<Modifier>;
}

impl IntoModifiers for () {
    fn into_modifiers(self) -> Vec<Modifier> {
        Vec::new()
    }
}

impl IntoModifiers for Vec<Modifier> {
    fn into_modifiers(self) -> Vec<Modifier> {
        self
    }
}

impl<M: Into<Modifier>> IntoModifiers for M {
    fn into_modifiers(self) -> Vec<Modifier> {
        vec![self.into()]
    }
}

macro_rules! tuple_modifiers {
    ($($name:ident),+) => {
        impl<$($name: Into<Modifier>),+> IntoModifiers for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_modifiers(self) -> Vec<Modifier> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

tuple_modifiers!(A, B);
tuple_modifiers!(A, B, C);
tuple_modifiers!(A, B, C, D);
tuple_modifiers!(A, B, C, D, E);

/// A fully resolved column. Immutable once built.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub unique: bool,
    pub index: bool,
    pub foreign_key: Option<ForeignKey>,
    pub server_default: Option<ServerDefault>,
    pub default: Option<FieldDefault>,
}

impl ColumnDef {
    /// A plain column with no flags, used for generated tables.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            index: false,
            foreign_key: None,
            server_default: None,
            default: None,
        }
    }

    /// Must the caller supply a value when constructing an instance?
    pub fn is_required(&self) -> bool {
        !self.nullable
            && !self.primary_key
            && !self.autoincrement
            && self.default.is_none()
            && self.server_default.is_none()
    }

    /// The shape handed to input validation.
    pub fn shape(&self) -> FieldShape {
        FieldShape::new(self.name.clone(), self.sql_type.clone())
            .nullable(self.nullable || self.primary_key)
            .required(self.is_required())
    }

    /// The value a freshly constructed instance starts with, if any.
    pub fn initial_value(&self) -> Option<Value> {
        match &self.default {
            Some(FieldDefault::Value(value)) => Some(value.clone()),
            Some(FieldDefault::Factory(factory)) => Some(factory.call()),
            Some(FieldDefault::Expr(_)) | None => None,
        }
    }

    /// Column reference for query building.
    pub fn expr(&self) -> Expr {
        Expr::col(self.name.clone())
    }

    /// Column definition clause for `CREATE TABLE`.
    ///
    /// `inline_pk` renders the primary key on the column itself.
    pub fn ddl(&self, dialect: Dialect, inline_pk: bool) -> String {
        let name = dialect.quote_identifier(&self.name);
        if inline_pk && self.autoincrement && self.sql_type.is_integer() {
            return match dialect {
                Dialect::Sqlite => format!("{name} INTEGER PRIMARY KEY AUTOINCREMENT"),
                Dialect::Postgres if self.sql_type == SqlType::BigInt => {
                    format!("{name} BIGSERIAL PRIMARY KEY")
                }
                Dialect::Postgres => format!("{name} SERIAL PRIMARY KEY"),
                Dialect::Mysql => {
                    format!("{name} {} PRIMARY KEY AUTO_INCREMENT", self.sql_type.sql_name())
                }
            };
        }

        // Only INTEGER PRIMARY KEY aliases the rowid in SQLite.
        let type_name = if dialect == Dialect::Sqlite && inline_pk && self.sql_type.is_integer() {
            "INTEGER".to_string()
        } else {
            self.sql_type.sql_name()
        };
        let mut sql = format!("{name} {type_name}");
        if inline_pk {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        match &self.server_default {
            Some(ServerDefault::Literal(text)) => {
                sql.push_str(&format!(" DEFAULT '{}'", text.replace('\'', "''")));
            }
            Some(ServerDefault::Expr(expr)) => sql.push_str(&format!(" DEFAULT ({expr})")),
            None => {}
        }
        if let Some(fk) = &self.foreign_key {
            sql.push_str(&format!(
                " REFERENCES {} ({})",
                dialect.quote_identifier(&fk.table),
                dialect.quote_identifier(&fk.column)
            ));
        }
        sql
    }
}

/// Translate a declared type and its modifiers into a column.
pub fn translate(name: &str, declared: &DeclaredType, modifiers: &[Modifier]) -> Result<ColumnDef> {
    let (mut sql_type, required) = declared.resolve(name)?;

    let mut overridden = false;
    let mut arguments = Vec::new();
    for modifier in modifiers {
        match modifier {
            Modifier::Type(override_type) => {
                if overridden {
                    return Err(Error::Model(ModelError::MultipleTypes(name.to_string())));
                }
                overridden = true;
                sql_type = Some(override_type.clone());
            }
            Modifier::Argument(arg) => arguments.push(arg),
            Modifier::Unknown { repr, type_name } => {
                return Err(Error::Model(ModelError::UnknownArgument {
                    repr: repr.clone(),
                    type_name: type_name.clone(),
                }));
            }
        }
    }
    let sql_type = sql_type.ok_or_else(|| Error::Model(ModelError::NoType(name.to_string())))?;

    let mut args = ColumnArgs::default();
    for arg in arguments {
        arg.apply(&mut args, &sql_type)?;
    }

    let nullable = args
        .nullable
        .unwrap_or(if args.primary_key { false } else { !required });
    let autoincrement = args
        .autoincrement
        .unwrap_or(args.primary_key && sql_type.is_integer());

    tracing::trace!(column = %name, sql_type = %sql_type.sql_name(), nullable, "Translated column");
    Ok(ColumnDef {
        name: name.to_string(),
        sql_type,
        nullable,
        primary_key: args.primary_key,
        autoincrement,
        unique: args.unique,
        index: args.index,
        foreign_key: args.foreign_key,
        server_default: args.server_default,
        default: args.default,
    })
}
