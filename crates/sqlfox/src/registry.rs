//! Per-database schema registry.
//!
//! Holds every table and model declared against one database, memoizes
//! association tables by name, and resolves deferred relation targets.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use asupersync::{Cx, Outcome};
use sqlfox_core::{Connection, Error, InstanceError, ModelError, Result, SqlType};

use crate::field::{ColumnDef, ForeignKey};
use crate::model::Model;
use crate::schema::TableDef;

/// Column names of a resolved many-to-many junction table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationTable {
    pub name: String,
    /// References the owning side.
    pub this_column: String,
    /// References the target side.
    pub other_column: String,
}

struct Inner<C: Connection> {
    tables: Vec<TableDef>,
    models: Vec<Arc<Model<C>>>,
}

/// Table and model metadata for one database.
pub struct SchemaRegistry<C: Connection> {
    inner: Mutex<Inner<C>>,
}

impl<C: Connection> Default for SchemaRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> std::fmt::Debug for SchemaRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("SchemaRegistry")
            .field("tables", &inner.tables.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("models", &inner.models.len())
            .finish()
    }
}

impl<C: Connection> SchemaRegistry<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tables: Vec::new(),
                models: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a model and its table.
    pub fn register_model(&self, model: Arc<Model<C>>) -> Result<()> {
        let mut inner = self.lock();
        if let Some(table) = model.table_def() {
            if inner.tables.iter().any(|t| t.name == table.name) {
                return Err(Error::Model(ModelError::DuplicateTable(table.name.clone())));
            }
            inner.tables.push(table.clone());
        }
        tracing::debug!(model = %model.name(), "Registered model");
        inner.models.push(model);
        Ok(())
    }

    /// Look up a model by class name or table name.
    ///
    /// Dotted names are matched on their last segment.
    pub fn model(&self, name: &str) -> Option<Arc<Model<C>>> {
        let short = name.rsplit('.').next().unwrap_or(name);
        self.lock()
            .models
            .iter()
            .find(|m| m.name() == short || m.table_name() == Some(short))
            .cloned()
    }

    pub fn models(&self) -> Vec<Arc<Model<C>>> {
        self.lock().models.clone()
    }

    pub fn table(&self, name: &str) -> Option<TableDef> {
        self.lock().tables.iter().find(|t| t.name == name).cloned()
    }

    /// All tables in registration order.
    pub fn tables(&self) -> Vec<TableDef> {
        self.lock().tables.clone()
    }

    /// The junction table `name` linking `this` and `other`.
    ///
    /// Created on first request; later requests with the same name reuse it.
    pub fn association_table(
        &self,
        name: &str,
        this: &TableDef,
        other: &TableDef,
    ) -> Result<AssociationTable> {
        let association = AssociationTable {
            name: name.to_string(),
            this_column: format!("{}_id", this.name),
            other_column: format!("{}_id", other.name),
        };
        if association.this_column == association.other_column {
            return Err(Error::Model(ModelError::SelfReferentialAssociation(
                name.to_string(),
            )));
        }

        let mut inner = self.lock();
        if let Some(existing) = inner.tables.iter().find(|t| t.name == name) {
            let matches = existing.column(&association.this_column).is_some()
                && existing.column(&association.other_column).is_some();
            return if matches {
                Ok(association)
            } else {
                Err(Error::Model(ModelError::DuplicateTable(name.to_string())))
            };
        }

        let mut columns = Vec::with_capacity(2);
        for (column, side) in [(&association.this_column, this), (&association.other_column, other)] {
            let pk = side
                .primary_key()
                .first()
                .map(|c| c.name.clone())
                .ok_or(Error::Instance(InstanceError::MissingPrimaryKey))?;
            let mut def = ColumnDef::new(column.clone(), SqlType::Integer);
            def.primary_key = true;
            def.foreign_key = Some(ForeignKey {
                table: side.name.clone(),
                column: pk,
            });
            columns.push(def);
        }
        tracing::debug!(table = %name, "Created association table");
        inner.tables.push(TableDef::new(name, columns));
        Ok(association)
    }

    /// Relations not yet resolved.
    pub fn pending_relations(&self) -> usize {
        self.models()
            .iter()
            .flat_map(|m| m.relations())
            .filter(|r| !r.is_initialized())
            .count()
    }

    /// Resolve every pending relation. Safe to call repeatedly.
    pub fn finalize_relations(&self) -> Result<()> {
        for model in self.models() {
            for spec in model.relations() {
                if !spec.is_initialized() {
                    spec.initialize(self, &model)?;
                }
            }
        }
        Ok(())
    }

    /// Issue `CREATE TABLE IF NOT EXISTS` for every table, in order.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn create_all(&self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        for table in self.tables() {
            for sql in table.create_sql(conn.dialect()) {
                tracing::trace!(sql = %sql, "DDL");
                try_outcome!(conn.execute(cx, &sql, &[]).await);
            }
        }
        Outcome::Ok(())
    }

    /// Drop every table, in reverse order.
    #[tracing::instrument(level = "debug", skip(self, cx, conn))]
    pub async fn drop_all(&self, cx: &Cx, conn: &C) -> Outcome<(), Error> {
        for table in self.tables().iter().rev() {
            let sql = format!(
                "DROP TABLE IF EXISTS {}",
                conn.dialect().quote_identifier(&table.name)
            );
            tracing::trace!(sql = %sql, "DDL");
            try_outcome!(conn.execute(cx, &sql, &[]).await);
        }
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::pkey;
    use crate::schema::{FieldDecl, ModelDecl};
    use crate::testing::{MockConnection, block_on, unwrap_outcome};
    use crate::{Database, RelationDecl};

    fn table(name: &str) -> TableDef {
        let mut id = ColumnDef::new("id", SqlType::Integer);
        id.primary_key = true;
        TableDef::new(name, vec![id])
    }

    #[test]
    fn association_tables_are_memoized() {
        let registry = SchemaRegistry::<MockConnection>::new();
        let a = table("a");
        let b = table("b");
        let first = registry.association_table("a_b", &a, &b).unwrap();
        let second = registry.association_table("a_b", &b, &a).unwrap();
        assert_eq!(first.this_column, "a_id");
        assert_eq!(second.this_column, "b_id");
        assert_eq!(registry.tables().len(), 1);
        let mid = registry.table("a_b").unwrap();
        assert_eq!(mid.primary_key().len(), 2);
        assert_eq!(
            mid.column("b_id").unwrap().foreign_key.as_ref().map(ToString::to_string),
            Some("b.id".to_string())
        );
    }

    #[test]
    fn self_referential_association_rejected() {
        let registry = SchemaRegistry::<MockConnection>::new();
        let a = table("a");
        let err = registry.association_table("a_a", &a, &a).unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::SelfReferentialAssociation(_))));
    }

    #[test]
    fn association_name_clash_rejected() {
        let registry = SchemaRegistry::<MockConnection>::new();
        registry.association_table("mid", &table("a"), &table("b")).unwrap();
        let err = registry
            .association_table("mid", &table("c"), &table("d"))
            .unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::DuplicateTable(_))));
    }

    #[test]
    fn finalize_resolves_by_name_and_reports_unknown_targets() {
        let db = Database::<MockConnection>::new("default");
        let a = db
            .define(
                ModelDecl::new("A")
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .relation(RelationDecl::many_to_many("bs", "B", "a_b")),
            )
            .unwrap();
        assert_eq!(db.metadata().pending_relations(), 1);
        let err = db.finalize_relations().unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::UnresolvedTarget { .. })));

        db.define(ModelDecl::new("B").field(FieldDecl::new::<i64>("id").with(pkey())))
            .unwrap();
        db.finalize_relations().unwrap();
        assert_eq!(db.metadata().pending_relations(), 0);
        assert!(a.relation("bs").unwrap().is_initialized());
        assert!(db.metadata().table("a_b").is_some());
        // Idempotent.
        db.finalize_relations().unwrap();
    }

    #[test]
    fn duplicate_tables_rejected() {
        let db = Database::<MockConnection>::new("default");
        let decl = || ModelDecl::new("A").field(FieldDecl::new::<i64>("id").with(pkey()));
        db.define(decl()).unwrap();
        let err = db.define(decl()).unwrap_err();
        assert!(matches!(err, Error::Model(ModelError::DuplicateTable(ref t)) if t == "a"));
    }

    #[test]
    fn create_all_issues_ddl_in_order() {
        let registry = SchemaRegistry::<MockConnection>::new();
        registry.association_table("a_b", &table("a"), &table("b")).unwrap();
        let conn = MockConnection::new();
        block_on(|cx| async move {
            unwrap_outcome(registry.create_all(&cx, &conn).await);
            unwrap_outcome(registry.drop_all(&cx, &conn).await);
            let log = conn.statements();
            assert!(log[0].0.starts_with("CREATE TABLE IF NOT EXISTS \"a_b\""));
            assert_eq!(log[1].0, "DROP TABLE IF EXISTS \"a_b\"");
        });
    }
}
