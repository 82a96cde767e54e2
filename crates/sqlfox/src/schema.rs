//! Model declarations and schema synthesis.
//!
//! A [`ModelDecl`] is the runtime description of a model "class": its name,
//! its fields, its relations and the models it extends. [`synthesize`]
//! validates the declaration and produces the column list and table that
//! the model will be built from.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use sqlfox_core::{Connection, Dialect, Error, ExtraFields, ModelError, Result};

use crate::field::{Annotated, ColumnDef, DeclaredType, IntoModifiers, Modifier, translate};
use crate::model::Model;
use crate::relation::RelationDecl;

static FIRST_CAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("(.)([A-Z][a-z]+)").unwrap_or_else(|e| unreachable!("valid pattern: {e}"))
});
static ALL_CAP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("([a-z0-9])([A-Z])").unwrap_or_else(|e| unreachable!("valid pattern: {e}"))
});

/// `UserProfile` → `user_profile`, `HTTPServer` → `http_server`.
pub fn camel_to_snake(name: &str) -> String {
    let partial = FIRST_CAP.replace_all(name, "${1}_${2}");
    ALL_CAP.replace_all(&partial, "${1}_${2}").to_lowercase()
}

/// One declared field: name, annotation and modifiers.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    name: String,
    annotation: Option<DeclaredType>,
    modifiers: Vec<Modifier>,
}

impl FieldDecl {
    /// Field annotated with a Rust type.
    pub fn new<T: Annotated>(name: impl Into<String>) -> Self {
        Self::typed(name, T::declared_type())
    }

    /// Field annotated with an explicit declared type.
    pub fn typed(name: impl Into<String>, declared: impl Into<DeclaredType>) -> Self {
        Self {
            name: name.into(),
            annotation: Some(declared.into()),
            modifiers: Vec::new(),
        }
    }

    /// A value-bearing attribute with no annotation. Rejected at synthesis.
    pub fn unannotated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotation: None,
            modifiers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, modifiers: impl IntoModifiers) -> Self {
        self.modifiers.extend(modifiers.into_modifiers());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Declaration of a model class.
pub struct ModelDecl<C: Connection> {
    pub(crate) name: String,
    pub(crate) table_name: Option<String>,
    pub(crate) is_abstract: bool,
    pub(crate) bases: Vec<Arc<Model<C>>>,
    pub(crate) fields: Vec<FieldDecl>,
    pub(crate) relations: Vec<RelationDecl<C>>,
    pub(crate) connection: Option<String>,
    pub(crate) extra: ExtraFields,
}

impl<C: Connection> ModelDecl<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_name: None,
            is_abstract: false,
            bases: Vec::new(),
            fields: Vec::new(),
            relations: Vec::new(),
            connection: None,
            extra: ExtraFields::default(),
        }
    }

    /// Override the derived snake_case table name.
    #[must_use]
    pub fn table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    /// Abstract models contribute columns to subclasses but own no table.
    #[must_use]
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Inherit the columns of `base`. Earlier bases win on name clashes.
    #[must_use]
    pub fn extends(mut self, base: &Arc<Model<C>>) -> Self {
        self.bases.push(Arc::clone(base));
        self
    }

    #[must_use]
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDecl<C>) -> Self {
        self.relations.push(relation);
        self
    }

    /// Name of the registered database this model lives in.
    #[must_use]
    pub fn connection(mut self, name: impl Into<String>) -> Self {
        self.connection = Some(name.into());
        self
    }

    /// Policy for undeclared names passed at construction.
    #[must_use]
    pub fn extra(mut self, policy: ExtraFields) -> Self {
        self.extra = policy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }
}

/// A table: name plus ordered columns.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// `CREATE TABLE` followed by one `CREATE INDEX` per indexed column.
    pub fn create_sql(&self, dialect: Dialect) -> Vec<String> {
        let table = dialect.quote_identifier(&self.name);
        let pk = self.primary_key();
        let inline = pk.len() == 1;

        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.ddl(dialect, inline && c.primary_key))
            .collect();
        if pk.len() > 1 {
            let names: Vec<String> = pk.iter().map(|c| dialect.quote_identifier(&c.name)).collect();
            defs.push(format!("PRIMARY KEY ({})", names.join(", ")));
        }

        let mut statements = vec![format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            defs.join(", ")
        )];
        for column in self.columns.iter().filter(|c| c.index) {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {table} ({})",
                dialect.quote_identifier(&format!("ix_{}_{}", self.name, column.name)),
                dialect.quote_identifier(&column.name)
            ));
        }
        statements
    }
}

/// Output of [`synthesize`].
pub struct Synthesized<C: Connection> {
    pub name: String,
    pub is_abstract: bool,
    pub columns: Vec<ColumnDef>,
    /// `None` for abstract models.
    pub table: Option<TableDef>,
    pub relations: Vec<RelationDecl<C>>,
    pub connection: Option<String>,
    pub extra: ExtraFields,
}

fn merge(columns: &mut Vec<ColumnDef>, column: ColumnDef) {
    match columns.iter_mut().find(|c| c.name == column.name) {
        Some(slot) => *slot = column,
        None => columns.push(column),
    }
}

/// Validate a declaration and build its columns and table.
pub fn synthesize<C: Connection>(decl: ModelDecl<C>) -> Result<Synthesized<C>> {
    let names = decl
        .fields
        .iter()
        .map(FieldDecl::name)
        .chain(decl.relations.iter().map(RelationDecl::name));
    for name in names {
        if name.starts_with("__") {
            return Err(Error::Model(ModelError::PrivateField(name.to_string())));
        }
    }
    if decl.is_abstract && !decl.relations.is_empty() {
        return Err(Error::Model(ModelError::AbstractModelRelation));
    }

    let mut columns = Vec::new();
    for base in decl.bases.iter().rev() {
        for column in base.columns() {
            merge(&mut columns, column.clone());
        }
    }
    for field in &decl.fields {
        let Some(annotation) = &field.annotation else {
            return Err(Error::Model(ModelError::UnannotatedField(field.name.clone())));
        };
        merge(&mut columns, translate(&field.name, annotation, &field.modifiers)?);
    }

    let pk: Vec<String> = columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if pk.len() > 1 {
        return Err(Error::Model(ModelError::MultiplePrimaryKeys(pk)));
    }
    if pk.is_empty() && !decl.is_abstract {
        return Err(Error::Model(ModelError::NoPrimaryKey));
    }

    let table = (!decl.is_abstract).then(|| {
        let name = decl
            .table_name
            .clone()
            .unwrap_or_else(|| camel_to_snake(&decl.name));
        TableDef::new(name, columns.clone())
    });

    tracing::debug!(
        model = %decl.name,
        table = ?table.as_ref().map(|t| t.name.as_str()),
        columns = columns.len(),
        "Synthesized model schema"
    );
    Ok(Synthesized {
        name: decl.name,
        is_abstract: decl.is_abstract,
        columns,
        table,
        relations: decl.relations,
        connection: decl.connection,
        extra: decl.extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{ScalarKind, default, index, null, pkey, unique};
    use crate::testing::MockConnection;

    type Decl = ModelDecl<MockConnection>;

    #[test]
    fn snake_case_table_names() {
        assert_eq!(camel_to_snake("User"), "user");
        assert_eq!(camel_to_snake("UserProfile"), "user_profile");
        assert_eq!(camel_to_snake("HTTPServer"), "http_server");
        assert_eq!(camel_to_snake("getHTTPResponseCode"), "get_http_response_code");
        assert_eq!(camel_to_snake("Model2Thing"), "model2_thing");
    }

    #[test]
    fn synthesizes_columns_and_table() {
        let decl = Decl::new("UserProfile")
            .field(FieldDecl::new::<i64>("id").with(pkey()))
            .field(FieldDecl::new::<Option<i32>>("age"))
            .field(FieldDecl::new::<String>("username").with(unique()));
        let out = synthesize(decl).unwrap();
        let table = out.table.unwrap();
        assert_eq!(table.name, "user_profile");
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "age", "username"]);
        assert!(table.column("age").unwrap().nullable);
        assert!(!table.column("username").unwrap().nullable);
    }

    #[test]
    fn explicit_table_name() {
        let decl = Decl::new("A")
            .table_name("a_items")
            .field(FieldDecl::new::<i64>("id").with(pkey()));
        assert_eq!(synthesize(decl).unwrap().table.unwrap().name, "a_items");
    }

    #[test]
    fn rejects_private_and_unannotated() {
        let decl = Decl::new("A")
            .field(FieldDecl::new::<i64>("id").with(pkey()))
            .field(FieldDecl::new::<i32>("__secret"));
        assert!(matches!(
            synthesize(decl),
            Err(Error::Model(ModelError::PrivateField(ref n))) if n == "__secret"
        ));

        let decl = Decl::new("A")
            .field(FieldDecl::new::<i64>("id").with(pkey()))
            .field(FieldDecl::unannotated("test"));
        assert!(matches!(
            synthesize(decl),
            Err(Error::Model(ModelError::UnannotatedField(ref n))) if n == "test"
        ));
    }

    #[test]
    fn primary_key_rules() {
        let decl = Decl::new("A").field(FieldDecl::new::<i32>("x"));
        assert!(matches!(synthesize(decl), Err(Error::Model(ModelError::NoPrimaryKey))));

        let decl = Decl::new("A")
            .field(FieldDecl::new::<i64>("a").with(pkey()))
            .field(FieldDecl::new::<i64>("b").with(pkey()));
        assert!(matches!(
            synthesize(decl),
            Err(Error::Model(ModelError::MultiplePrimaryKeys(ref pks))) if pks.len() == 2
        ));

        // Abstract models may leave the key to subclasses.
        let decl = Decl::new("Base")
            .abstract_model()
            .field(FieldDecl::new::<i32>("x"));
        let out = synthesize(decl).unwrap();
        assert!(out.is_abstract);
        assert!(out.table.is_none());
    }

    #[test]
    fn abstract_relations_rejected() {
        let decl = Decl::new("Base")
            .abstract_model()
            .relation(RelationDecl::many_to_many("tags", "Tag", "base_tag"));
        assert!(matches!(
            synthesize(decl),
            Err(Error::Model(ModelError::AbstractModelRelation))
        ));
    }

    #[test]
    fn create_sql_with_index_and_default() {
        let decl = Decl::new("Note")
            .field(FieldDecl::new::<i64>("id").with(pkey()))
            .field(FieldDecl::typed("at", ScalarKind::DateTime).with((index(), null())))
            .field(FieldDecl::new::<i32>("stars").with(default(0)));
        let table = synthesize(decl).unwrap().table.unwrap();
        let sql = table.create_sql(Dialect::Sqlite);
        assert_eq!(
            sql[0],
            "CREATE TABLE IF NOT EXISTS \"note\" (\"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"at\" TIMESTAMP, \"stars\" INTEGER NOT NULL DEFAULT '0')"
        );
        assert_eq!(
            sql[1],
            "CREATE INDEX IF NOT EXISTS \"ix_note_at\" ON \"note\" (\"at\")"
        );
    }

    #[test]
    fn composite_primary_key_clause() {
        let mut a = ColumnDef::new("a_id", sqlfox_core::SqlType::Integer);
        a.primary_key = true;
        let mut b = ColumnDef::new("b_id", sqlfox_core::SqlType::Integer);
        b.primary_key = true;
        let sql = TableDef::new("mid", vec![a, b]).create_sql(Dialect::Postgres);
        assert_eq!(
            sql[0],
            "CREATE TABLE IF NOT EXISTS \"mid\" (\"a_id\" INTEGER NOT NULL, \"b_id\" INTEGER NOT NULL, \
             PRIMARY KEY (\"a_id\", \"b_id\"))"
        );
    }
}
