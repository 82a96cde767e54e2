//! Model classes and their instances.
//!
//! A [`Model`] is built once from a [`ModelDecl`](crate::ModelDecl) and
//! shared behind an `Arc`. Every [`Instance`] holds its model, its column
//! values, the set of columns changed since the last save, and whether it
//! corresponds to a stored row.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlfox_core::{
    ConnectionError, ConnectionErrorKind, Connection, Error, ExtraFields, FieldShape, FromValue,
    InstanceError, Result, Row, SqlType, TypeError, ValidateInput, ValidateOptions,
    ValidationErrorKind, Value, coerce, validate_input,
};
use sqlfox_query::Expr;

use crate::Database;
use crate::field::ColumnDef;
use crate::hash_list::Keyed;
use crate::relation::{IdCell, Relation, RelationSpec};
use crate::schema::{Synthesized, TableDef};

/// A model class.
pub struct Model<C: Connection> {
    name: String,
    is_abstract: bool,
    columns: Vec<ColumnDef>,
    shapes: Vec<FieldShape>,
    table: Option<TableDef>,
    relations: Vec<Arc<RelationSpec<C>>>,
    extra: ExtraFields,
    database: Weak<Database<C>>,
}

impl<C: Connection> fmt::Debug for Model<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("table", &self.table_name())
            .field("abstract", &self.is_abstract)
            .field(
                "columns",
                &self.columns.iter().map(|c| &c.name).collect::<Vec<_>>(),
            )
            .field(
                "relations",
                &self.relations.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<C: Connection> Model<C> {
    pub(crate) fn build(schema: Synthesized<C>, database: Weak<Database<C>>) -> Arc<Self> {
        let relations = schema
            .relations
            .into_iter()
            .map(|decl| Arc::new(RelationSpec::new(schema.name.clone(), decl)))
            .collect();
        let shapes = schema.columns.iter().map(ColumnDef::shape).collect();
        Arc::new(Self {
            name: schema.name,
            is_abstract: schema.is_abstract,
            columns: schema.columns,
            shapes,
            table: schema.table,
            relations,
            extra: schema.extra,
            database,
        })
    }

    /// Class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    pub fn table_name(&self) -> Option<&str> {
        self.table.as_ref().map(|t| t.name.as_str())
    }

    pub(crate) fn table_def(&self) -> Option<&TableDef> {
        self.table.as_ref()
    }

    /// The model's table. Abstract models have none.
    pub fn table(&self) -> Result<&TableDef> {
        self.table
            .as_ref()
            .ok_or(Error::Instance(InstanceError::AbstractInstantiation))
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Column definition by name.
    pub fn column(&self, name: &str) -> Result<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::Instance(InstanceError::NoSuchColumn(name.to_string())))
    }

    /// Column reference for filters: `user.c("username")?.eq("vanutp")`.
    pub fn c(&self, name: &str) -> Result<Expr> {
        Ok(self.column(name)?.expr())
    }

    pub fn primary_key(&self) -> Result<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .ok_or(Error::Instance(InstanceError::MissingPrimaryKey))
    }

    pub fn relations(&self) -> &[Arc<RelationSpec<C>>] {
        &self.relations
    }

    pub fn relation(&self, name: &str) -> Option<&Arc<RelationSpec<C>>> {
        self.relations.iter().find(|r| r.name() == name)
    }

    pub fn extra_policy(&self) -> ExtraFields {
        self.extra
    }

    /// The database this model was defined in.
    pub fn database(&self) -> Result<Arc<Database<C>>> {
        self.database.upgrade().ok_or_else(|| {
            Error::Connection(ConnectionError::new(
                ConnectionErrorKind::NotInitialized,
                format!("Model {} is not attached to a database", self.name),
            ))
        })
    }

    /// The initialized executor of this model's database.
    pub fn executor(&self) -> Result<Arc<C>> {
        self.database()?.db()
    }

    fn ensure_concrete(&self) -> Result<()> {
        if self.is_abstract {
            return Err(Error::Instance(InstanceError::AbstractInstantiation));
        }
        Ok(())
    }

    /// Validate `input` and build an unbound instance.
    ///
    /// Unset fields take their defaults. Undeclared names are rejected unless
    /// the model's extra-field policy says otherwise.
    pub fn create(self: &Arc<Self>, input: impl Into<ValidateInput>) -> Result<Instance<C>> {
        self.ensure_concrete()?;
        let options = ValidateOptions::new().extra(self.extra);
        let validated = validate_input(&self.shapes, input, options).map_err(|err| {
            let extra = err
                .errors
                .iter()
                .find(|e| e.kind == ValidationErrorKind::Extra)
                .map(|e| e.field.clone());
            match extra {
                Some(field) if self.relation(&field).is_some() => {
                    Error::Instance(InstanceError::RelationAssignment(field))
                }
                Some(field) => Error::Instance(InstanceError::InvalidColumn(field)),
                None => Error::Validation(err),
            }
        })?;

        let mut values = BTreeMap::new();
        let mut extra = BTreeMap::new();
        for (name, value) in validated.values {
            if self.has_column(&name) {
                values.insert(name, value);
            } else {
                extra.insert(name, value);
            }
        }
        for column in &self.columns {
            if values.contains_key(&column.name) {
                continue;
            }
            if let Some(value) = column.initial_value() {
                let value = coerce(&value, &column.sql_type, false).unwrap_or(value);
                values.insert(column.name.clone(), value);
            }
        }
        Ok(Instance::new(Arc::clone(self), values, extra, false))
    }

    /// Build an unbound instance without validation.
    pub fn construct<I, K, V>(self: &Arc<Self>, values: I) -> Result<Instance<C>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.ensure_concrete()?;
        let mut map = BTreeMap::new();
        for (name, value) in values {
            let name = name.into();
            if !self.has_column(&name) {
                return Err(Error::Instance(InstanceError::InvalidColumn(name)));
            }
            map.insert(name, value.into());
        }
        Ok(Instance::new(Arc::clone(self), map, BTreeMap::new(), false))
    }

    /// Materialize a stored row as a bound instance.
    pub fn from_row(self: &Arc<Self>, row: &Row) -> Result<Instance<C>> {
        self.ensure_concrete()?;
        let mut values = BTreeMap::new();
        for column in &self.columns {
            if let Some(value) = row.get_by_name(&column.name) {
                values.insert(column.name.clone(), decode(value.clone(), &column.sql_type));
            }
        }
        Ok(Instance::new(Arc::clone(self), values, BTreeMap::new(), true))
    }
}

/// Restore the semantic type of a value read back from storage.
fn decode(value: Value, sql_type: &SqlType) -> Value {
    match (sql_type, value) {
        (_, Value::Null) => Value::Null,
        (SqlType::Json | SqlType::JsonB, Value::Text(text)) => {
            serde_json::from_str(&text).map_or(Value::Text(text), Value::Json)
        }
        (SqlType::Boolean, v @ (Value::Int(_) | Value::BigInt(_))) => {
            Value::Bool(v.as_i64() != Some(0))
        }
        (SqlType::Interval, v @ (Value::Int(_) | Value::BigInt(_))) => {
            Value::Interval(v.as_i64().unwrap_or_default())
        }
        (SqlType::Time, v @ (Value::Int(_) | Value::BigInt(_))) => {
            Value::Time(v.as_i64().unwrap_or_default())
        }
        (SqlType::DateTime, v @ (Value::Int(_) | Value::BigInt(_))) => {
            Value::Timestamp(v.as_i64().unwrap_or_default())
        }
        (SqlType::Date, Value::Int(days)) => Value::Date(days),
        (SqlType::BigInt, Value::Int(v)) => Value::BigInt(i64::from(v)),
        (SqlType::Float, v @ (Value::Int(_) | Value::BigInt(_))) => {
            v.as_f64().map_or(v, Value::Double)
        }
        (sql_type, value) => coerce(&value, sql_type, false).unwrap_or(value),
    }
}

/// One row of a model, stored or not.
pub struct Instance<C: Connection> {
    pub(crate) model: Arc<Model<C>>,
    pub(crate) values: BTreeMap<String, Value>,
    pub(crate) extra: BTreeMap<String, Value>,
    pub(crate) modified: BTreeSet<String>,
    pub(crate) bound: bool,
    pub(crate) id: IdCell,
    pub(crate) relations: Vec<Relation<C>>,
}

impl<C: Connection> Instance<C> {
    fn new(
        model: Arc<Model<C>>,
        values: BTreeMap<String, Value>,
        extra: BTreeMap<String, Value>,
        bound: bool,
    ) -> Self {
        let id = IdCell::default();
        let relations = model
            .relations()
            .iter()
            .map(|spec| Relation::new(Arc::clone(spec), id.clone()))
            .collect();
        let instance = Self {
            model,
            values,
            extra,
            modified: BTreeSet::new(),
            bound,
            id,
            relations,
        };
        instance.sync_id();
        instance
    }

    pub(crate) fn sync_id(&self) {
        self.id.set(self.pk_value().and_then(Value::as_i64));
    }

    pub fn model(&self) -> &Arc<Model<C>> {
        &self.model
    }

    /// Is there a stored row for this instance?
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Columns changed since the last save.
    pub fn modified(&self) -> &BTreeSet<String> {
        &self.modified
    }

    pub fn pk_value(&self) -> Option<&Value> {
        let pk = self.model.primary_key().ok()?;
        self.values.get(&pk.name).filter(|v| !v.is_null())
    }

    /// Integer primary key, if set.
    pub fn id(&self) -> Option<i64> {
        self.id.get()
    }

    /// Current value of a declared (or allowed extra) field.
    ///
    /// Unset nullable fields read as `Null`.
    pub fn get(&self, name: &str) -> Result<Value> {
        if self.model.has_column(name) {
            return Ok(self.values.get(name).cloned().unwrap_or(Value::Null));
        }
        self.extra
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Instance(InstanceError::NoSuchColumn(name.to_string())))
    }

    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T> {
        T::from_value(&self.get(name)?)
    }

    /// Deserialize a field through its JSON representation.
    pub fn get_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(serde_json::Value::from(self.get(name)?))?)
    }

    /// Assign a field, marking it modified.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.model.relation(name).is_some() {
            return Err(Error::Instance(InstanceError::RelationAssignment(
                name.to_string(),
            )));
        }
        let column = self
            .model
            .column(name)
            .map_err(|_| Error::Instance(InstanceError::NoSuchColumn(name.to_string())))?;
        if column.primary_key && self.bound {
            return Err(Error::Instance(InstanceError::ImmutablePrimaryKey(
                name.to_string(),
            )));
        }
        let value = value.into();
        let coerced = coerce(&value, &column.sql_type, false).ok_or_else(|| {
            Error::Type(TypeError {
                expected: sql_type_label(&column.sql_type),
                actual: value.type_name().to_string(),
                column: Some(name.to_string()),
            })
        })?;
        let is_pk = column.primary_key;
        self.values.insert(name.to_string(), coerced);
        self.modified.insert(name.to_string());
        if is_pk {
            self.sync_id();
        }
        Ok(())
    }

    /// Store any serializable value in a JSON column.
    pub fn set_json<T: Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        self.set(name, Value::Json(serde_json::to_value(value)?))
    }

    /// Declared fields as a JSON object, in column order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for column in self.model.columns() {
            let value = self.values.get(&column.name).cloned().unwrap_or(Value::Null);
            map.insert(column.name.clone(), serde_json::Value::from(value));
        }
        for (name, value) in &self.extra {
            map.insert(name.clone(), serde_json::Value::from(value.clone()));
        }
        serde_json::Value::Object(map)
    }

    /// A relation by name.
    pub fn relation(&self, name: &str) -> Result<&Relation<C>> {
        self.relations
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| self.not_a_relation(name))
    }

    pub fn relation_mut(&mut self, name: &str) -> Result<&mut Relation<C>> {
        let err = self.not_a_relation(name);
        self.relations
            .iter_mut()
            .find(|r| r.name() == name)
            .ok_or(err)
    }

    pub fn relations(&self) -> &[Relation<C>] {
        &self.relations
    }

    fn not_a_relation(&self, name: &str) -> Error {
        Error::Instance(InstanceError::InvalidColumn(name.to_string()))
    }
}

fn sql_type_label(sql_type: &SqlType) -> &'static str {
    match sql_type {
        SqlType::Integer => "INTEGER",
        SqlType::BigInt => "BIGINT",
        SqlType::Float => "DOUBLE PRECISION",
        SqlType::Boolean => "BOOLEAN",
        SqlType::Text => "TEXT",
        SqlType::Blob => "BLOB",
        SqlType::Date => "DATE",
        SqlType::Time => "TIME",
        SqlType::DateTime => "TIMESTAMP",
        SqlType::Interval => "INTERVAL",
        SqlType::Json => "JSON",
        SqlType::JsonB => "JSONB",
        SqlType::Custom(name) => *name,
    }
}

impl<C: Connection> Clone for Instance<C> {
    fn clone(&self) -> Self {
        let id = IdCell::new(self.id.get());
        Self {
            model: Arc::clone(&self.model),
            values: self.values.clone(),
            extra: self.extra.clone(),
            modified: self.modified.clone(),
            bound: self.bound,
            relations: self
                .relations
                .iter()
                .map(|r| r.clone_for(id.clone()))
                .collect(),
            id,
        }
    }
}

impl<C: Connection> fmt::Debug for Instance<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(&self.model.name)
            .field("values", &self.values)
            .field("bound", &self.bound)
            .field("modified", &self.modified)
            .finish_non_exhaustive()
    }
}

/// Same model, and same primary key (or same values when unsaved).
impl<C: Connection> PartialEq for Instance<C> {
    fn eq(&self, other: &Self) -> bool {
        if !Arc::ptr_eq(&self.model, &other.model) {
            return false;
        }
        match (self.id(), other.id()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.values == other.values,
            _ => false,
        }
    }
}

impl<C: Connection> Keyed for Instance<C> {
    fn key(&self) -> Option<i64> {
        self.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DeclaredType, ScalarKind, default, default_fn, null, pkey};
    use crate::schema::{FieldDecl, ModelDecl};
    use crate::testing::MockConnection;
    use crate::RelationDecl;
    use sqlfox_core::ModelError;
    use std::sync::atomic::{AtomicI64, Ordering};

    type M = Arc<Model<MockConnection>>;

    fn user(db: &Arc<Database<MockConnection>>) -> M {
        db.define(
            ModelDecl::new("User")
                .field(FieldDecl::new::<i64>("id").with(pkey()))
                .field(FieldDecl::new::<String>("username"))
                .field(FieldDecl::new::<Option<i32>>("age"))
                .field(FieldDecl::new::<bool>("active").with(default(true)))
                .field(FieldDecl::new::<serde_json::Value>("meta").with(null()))
                .relation(RelationDecl::many_to_many("groups", "Group", "user_group")),
        )
        .unwrap()
    }

    #[test]
    fn create_applies_defaults_and_validation() {
        let db = Database::new("default");
        let user = user(&db);
        let u = user.create(serde_json::json!({"username": "vanutp"})).unwrap();
        assert_eq!(u.get("username").unwrap(), Value::Text("vanutp".into()));
        assert_eq!(u.get("active").unwrap(), Value::Bool(true));
        assert_eq!(u.get("age").unwrap(), Value::Null);
        assert!(!u.is_bound());
        assert!(u.id().is_none());

        let err = user.create(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn create_rejects_unknown_and_relation_names() {
        let db = Database::new("default");
        let user = user(&db);
        let err = user
            .create(serde_json::json!({"username": "a", "nope": 1}))
            .unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::InvalidColumn(ref n)) if n == "nope"));
        let err = user
            .create(serde_json::json!({"username": "a", "groups": []}))
            .unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::RelationAssignment(_))));
    }

    #[test]
    fn extra_policy_allow_keeps_values() {
        let db = Database::<MockConnection>::new("default");
        let model = db
            .define(
                ModelDecl::new("Loose")
                    .extra(ExtraFields::Allow)
                    .field(FieldDecl::new::<i64>("id").with(pkey())),
            )
            .unwrap();
        let inst = model.create(serde_json::json!({"note": "hi"})).unwrap();
        assert_eq!(inst.get("note").unwrap(), Value::Text("hi".into()));
        assert_eq!(inst.to_json()["note"], "hi");
    }

    #[test]
    fn factory_defaults_run_per_instance() {
        static NEXT: AtomicI64 = AtomicI64::new(1);
        let db = Database::<MockConnection>::new("default");
        let model = db
            .define(
                ModelDecl::new("Ticket")
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .field(
                        FieldDecl::new::<i64>("serial")
                            .with(default_fn(|| NEXT.fetch_add(1, Ordering::SeqCst))),
                    ),
            )
            .unwrap();
        let a = model.create(serde_json::json!({})).unwrap();
        let b = model.create(serde_json::json!({})).unwrap();
        assert_ne!(a.get("serial").unwrap(), b.get("serial").unwrap());
    }

    #[test]
    fn set_tracks_modifications_and_guards() {
        let db = Database::new("default");
        let user = user(&db);
        let mut u = user.create(serde_json::json!({"username": "a"})).unwrap();
        u.set("age", 30).unwrap();
        assert!(u.modified().contains("age"));

        let err = u.set("nope", 1).unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::NoSuchColumn(_))));
        let err = u.set("groups", 1).unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::RelationAssignment(_))));
        let err = u.set("age", "thirty").unwrap_err();
        assert!(matches!(err, Error::Type(_)));

        u.set("id", 7_i64).unwrap();
        assert_eq!(u.id(), Some(7));
    }

    #[test]
    fn bound_primary_key_is_immutable() {
        let db = Database::new("default");
        let user = user(&db);
        let row = Row::new(
            vec!["id".into(), "username".into(), "active".into(), "meta".into()],
            vec![
                Value::Int(3),
                Value::Text("x".into()),
                Value::Int(1),
                Value::Text("{\"k\":[1,2]}".into()),
            ],
        );
        let mut u = user.from_row(&row).unwrap();
        assert!(u.is_bound());
        assert_eq!(u.id(), Some(3));
        assert_eq!(u.get("active").unwrap(), Value::Bool(true));
        assert_eq!(u.get_json::<serde_json::Value>("meta").unwrap()["k"][1], 2);
        let err = u.set("id", 4_i64).unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::ImmutablePrimaryKey(_))));
    }

    #[test]
    fn json_fields_roundtrip_through_serde() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Prefs {
            theme: String,
        }
        let db = Database::new("default");
        let user = user(&db);
        let mut u = user.create(serde_json::json!({"username": "a"})).unwrap();
        u.set_json("meta", &Prefs { theme: "dark".into() }).unwrap();
        assert_eq!(
            u.get_json::<Prefs>("meta").unwrap(),
            Prefs { theme: "dark".into() }
        );
    }

    #[test]
    fn abstract_models_cannot_be_instantiated() {
        let db = Database::<MockConnection>::new("default");
        let base = db
            .define(
                ModelDecl::new("Base")
                    .abstract_model()
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .field(FieldDecl::typed("created", ScalarKind::DateTime).with(null())),
            )
            .unwrap();
        let err = base.create(serde_json::json!({})).unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::AbstractInstantiation)));

        let child = db
            .define(
                ModelDecl::new("Child")
                    .extends(&base)
                    .field(FieldDecl::new::<String>("name")),
            )
            .unwrap();
        let names: Vec<&str> = child.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "created", "name"]);
        assert_eq!(child.table_name(), Some("child"));
    }

    #[test]
    fn column_accessor() {
        let db = Database::new("default");
        let user = user(&db);
        assert_eq!(user.c("username").unwrap(), Expr::col("username"));
        assert!(matches!(
            user.c("nope"),
            Err(Error::Instance(InstanceError::NoSuchColumn(_)))
        ));
        assert!(user.column("age").unwrap().nullable);
        let opaque = FieldDecl::typed("p", DeclaredType::Opaque("Point".into()));
        let err = db
            .define(
                ModelDecl::new("Shape")
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .field(opaque),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::NoType(_))));
    }

    #[test]
    fn construct_skips_validation() {
        let db = Database::new("default");
        let user = user(&db);
        let u = user.construct([("age", 5)]).unwrap();
        assert_eq!(u.get("username").unwrap(), Value::Null);
        let err = user.construct([("bogus", 1)]).unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::InvalidColumn(_))));
    }

    #[test]
    fn equality_by_primary_key() {
        let db = Database::new("default");
        let user = user(&db);
        let row = |id: i64| Row::new(vec!["id".into()], vec![Value::BigInt(id)]);
        let a = user.from_row(&row(1)).unwrap();
        assert_eq!(a, user.from_row(&row(1)).unwrap());
        assert_ne!(a, user.from_row(&row(2)).unwrap());
        let clone = a.clone();
        assert_eq!(clone.id(), Some(1));
        assert!(clone.relation("groups").is_ok());
    }
}
