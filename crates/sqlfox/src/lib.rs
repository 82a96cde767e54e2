//! sqlfox - declarative models and lazy relations over async SQL executors.
//!
//! A model is declared as data, synthesized once into a table, and then used
//! to build, persist and query instances:
//!
//! ```ignore
//! use sqlfox::prelude::*;
//!
//! let db = Database::new("default");
//! let user = db.define(
//!     ModelDecl::new("User")
//!         .field(FieldDecl::new::<i64>("id").with(pkey()))
//!         .field(FieldDecl::new::<String>("username"))
//!         .relation(RelationDecl::many_to_many("friends", "User", "friendships")),
//! )?;
//! db.finalize_relations()?;
//! db.init(SqliteConnection::open_memory()?)?;
//! db.create_all(&cx).await;
//!
//! let mut u = user.create(json!({"username": "vanutp"}))?;
//! u.save(&cx).await;
//! let again = user.get(&cx, u.id()).await;
//! ```
//!
//! - **Declaration**: [`ModelDecl`], [`FieldDecl`] and the [`field`] modifiers.
//! - **Runtime**: [`Model`] (class-level operations) and [`Instance`] (one row
//!   with dirty tracking).
//! - **Relations**: many-to-many and one-to-many [`Relation`]s with deferred
//!   flush and set algebra over [`HashList`].
//! - **Queries**: the immutable [`Query`] builder.
//! - **Connections**: [`Database`] handles and the [`Connections`] table.
//!
//! Every operation touching the database takes a `&Cx` and returns an
//! `Outcome`, so cancellation propagates unchanged.

/// Unwrap `Outcome::Ok` or return the other variants from the enclosing
/// async function.
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            ::asupersync::Outcome::Ok(value) => value,
            ::asupersync::Outcome::Err(e) => return ::asupersync::Outcome::Err(e),
            ::asupersync::Outcome::Cancelled(r) => return ::asupersync::Outcome::Cancelled(r),
            ::asupersync::Outcome::Panicked(p) => return ::asupersync::Outcome::Panicked(p),
        }
    };
}

/// `?` for a `Result` inside a function returning `Outcome`.
macro_rules! try_result {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return ::asupersync::Outcome::Err(e.into()),
        }
    };
}

pub mod connections;
mod crud;
pub mod field;
pub mod hash_list;
pub mod model;
pub mod query;
pub mod registry;
pub mod relation;
pub mod schema;
#[cfg(test)]
mod testing;

pub use sqlfox_core::{
    BuilderError, Connection, ConnectionConfig, ConnectionError, ConnectionErrorKind, Cx,
    Dialect, Error, ExtraFields, InstanceError, ModelError, Outcome, QueryError, RelationError,
    Result, Row, SqlType, TypeError, ValidationError, ValidationErrorKind, Value,
};
pub use sqlfox_query::{Delete, Expr, Insert, OrderBy, RawQuery, Select, Statement, Update};

pub use connections::{Connections, DEFAULT_CONNECTION, Database};
pub use field::{ColumnDef, DeclaredType, ScalarKind};
pub use hash_list::{HashList, Keyed};
pub use model::{Instance, Model};
pub use query::{BuiltQuery, OrderArgs, Query, QueryKind, WhereArgs};
pub use registry::{AssociationTable, SchemaRegistry};
pub use relation::{Relation, RelationDecl, RelationKind, RelationState, RelationTarget};
pub use schema::{FieldDecl, ModelDecl, TableDef};

/// Collapse fan-out results: the first non-`Ok` outcome in submission order,
/// otherwise every value.
pub(crate) fn collect_outcomes<T>(outcomes: Vec<Outcome<T, Error>>) -> Outcome<Vec<T>, Error> {
    let mut values = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        values.push(try_outcome!(outcome));
    }
    Outcome::Ok(values)
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use sqlfox::prelude::*;
/// ```
pub mod prelude {
    pub use crate::field::{
        autoincrement, default, default_expr, default_fn, fkey, index, int64, json, jsonb, null,
        pkey, unique,
    };
    pub use crate::{
        Connection, Connections, Cx, Database, Error, Expr, FieldDecl, HashList, Instance, Model,
        ModelDecl, OrderBy, Outcome, Query, RawQuery, Relation, RelationDecl, Result, Row, Value,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_outcomes_keeps_order() {
        let ok: Vec<Outcome<i32, Error>> = vec![Outcome::Ok(1), Outcome::Ok(2)];
        match collect_outcomes(ok) {
            Outcome::Ok(values) => assert_eq!(values, vec![1, 2]),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn collect_outcomes_surfaces_first_failure() {
        let mixed: Vec<Outcome<i32, Error>> = vec![
            Outcome::Ok(1),
            Outcome::Err(Error::Custom("first".into())),
            Outcome::Err(Error::Custom("second".into())),
        ];
        match collect_outcomes(mixed) {
            Outcome::Err(e) => assert_eq!(e.to_string(), "first"),
            _ => panic!("expected Err"),
        }
    }
}
