//! Persistence operations on models and instances.

use std::sync::Arc;

use asupersync::{Cx, Outcome};
use futures::future::join_all;
use sqlfox_core::{Connection, Error, InstanceError, Value, coerce};
use sqlfox_query::{Delete, Expr, Insert, OrderBy, RawQuery, Select, Update};

use crate::collect_outcomes;
use crate::model::{Instance, Model};

impl<C: Connection> Model<C> {
    /// First instance matching `filter`.
    pub async fn select(
        self: &Arc<Self>,
        cx: &Cx,
        filter: Expr,
    ) -> Outcome<Option<Instance<C>>, Error> {
        let query = try_result!(self.query().filter(filter));
        query.first(cx).await
    }

    /// Every instance matching `filter`, optionally ordered.
    pub async fn select_all(
        self: &Arc<Self>,
        cx: &Cx,
        filter: Option<Expr>,
        order_by: Option<OrderBy>,
    ) -> Outcome<Vec<Instance<C>>, Error> {
        let mut query = self.query();
        if let Some(filter) = filter {
            query = try_result!(query.filter(filter));
        }
        if let Some(order) = order_by {
            query = try_result!(query.order_by(order));
        }
        query.all(cx).await
    }

    /// Instances materialized from raw SQL with named parameters.
    pub async fn select_raw(
        self: &Arc<Self>,
        cx: &Cx,
        raw: RawQuery,
    ) -> Outcome<Vec<Instance<C>>, Error> {
        let mut query = try_result!(self.query().set_built_query(raw.sql()));
        if !raw.values().is_empty() {
            query = try_result!(query.values(raw.values().clone()));
        }
        query.all(cx).await
    }

    /// Whether any row matches `filter`.
    #[tracing::instrument(level = "debug", skip(self, cx, filter), fields(model = %self.name()))]
    pub async fn exists(self: &Arc<Self>, cx: &Cx, filter: Expr) -> Outcome<bool, Error> {
        let table = try_result!(self.table());
        let conn = try_result!(self.executor());
        let probe = Select::from(&table.name)
            .columns([Expr::raw("1")])
            .filter(filter)
            .limit(1);
        let row = try_outcome!(probe.fetch_one(cx, &*conn).await);
        Outcome::Ok(row.is_some())
    }

    /// Number of rows matching `filter` (all rows when `None`).
    #[tracing::instrument(level = "debug", skip(self, cx, filter), fields(model = %self.name()))]
    pub async fn count(self: &Arc<Self>, cx: &Cx, filter: Option<Expr>) -> Outcome<u64, Error> {
        let table = try_result!(self.table());
        let conn = try_result!(self.executor());
        let mut select = Select::count(&table.name);
        if let Some(filter) = filter {
            select = select.filter(filter);
        }
        let count = try_outcome!(select.fetch_scalar(cx, &*conn).await)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Outcome::Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Instance by primary key.
    pub async fn get(
        self: &Arc<Self>,
        cx: &Cx,
        id: impl Into<Value>,
    ) -> Outcome<Option<Instance<C>>, Error> {
        let pk = try_result!(self.primary_key());
        let query = try_result!(self.query().filter(pk.expr().eq(id.into())));
        query.first(cx).await
    }

    /// Delete every row matching `filter`. Returns rows affected.
    pub async fn delete(self: &Arc<Self>, cx: &Cx, filter: Expr) -> Outcome<u64, Error> {
        let query = try_result!(self.delete_query().filter(filter));
        query.execute(cx).await
    }
}

impl<C: Connection> Instance<C> {
    /// Insert when unbound, update changed columns when bound.
    ///
    /// A bound instance with no changes issues no statement.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(model = %self.model.name()))]
    pub async fn save(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.bound && self.modified.is_empty() {
            tracing::trace!("Nothing to save");
            return Outcome::Ok(());
        }
        let conn = try_result!(self.model.executor());
        let table = try_result!(self.model.table());
        let pk = try_result!(self.model.primary_key());

        if self.bound {
            let pk_value = try_result!(
                self.pk_value()
                    .cloned()
                    .ok_or(Error::Instance(InstanceError::MissingPrimaryKey))
            );
            let mut update = Update::table(&table.name);
            for name in &self.modified {
                let value = self.values.get(name).cloned().unwrap_or(Value::Null);
                update = update.set(name, value);
            }
            let update = update.filter(pk.expr().eq(pk_value));
            try_outcome!(update.execute(cx, &*conn).await);
            tracing::debug!(columns = self.modified.len(), "Updated row");
        } else {
            let mut insert = Insert::into(&table.name);
            for column in self.model.columns() {
                match self.values.get(&column.name) {
                    Some(Value::Null) if column.primary_key => {}
                    Some(value) => insert = insert.value(&column.name, value.clone()),
                    None => {}
                }
            }
            let insert = insert.returning(&pk.name);
            let id = try_outcome!(insert.execute(cx, &*conn).await);
            if self.pk_value().is_none() {
                let assigned = i32::try_from(id).map_or(Value::BigInt(id), Value::Int);
                let assigned = coerce(&assigned, &pk.sql_type, false).unwrap_or(assigned);
                self.values.insert(pk.name.clone(), assigned);
            }
            self.bound = true;
            self.sync_id();
            tracing::debug!(id, "Inserted row");
        }
        self.modified.clear();
        Outcome::Ok(())
    }

    /// Delete the stored row. The primary key is kept, so a later save
    /// re-inserts under the same key.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(model = %self.model.name()))]
    pub async fn delete(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if !self.bound {
            return Outcome::Err(Error::Instance(InstanceError::Unbound));
        }
        let conn = try_result!(self.model.executor());
        let table = try_result!(self.model.table());
        let pk = try_result!(self.model.primary_key());
        let pk_value = try_result!(
            self.pk_value()
                .cloned()
                .ok_or(Error::Instance(InstanceError::MissingPrimaryKey))
        );
        let delete = Delete::from(&table.name).filter(pk.expr().eq(pk_value));
        try_outcome!(delete.execute(cx, &*conn).await);
        self.bound = false;
        Outcome::Ok(())
    }

    /// Fetch the named relations concurrently.
    pub async fn fetch_related(&mut self, cx: &Cx, names: &[&str]) -> Outcome<(), Error> {
        for name in names {
            if self.model.relation(name).is_none() {
                return Outcome::Err(Error::Instance(InstanceError::InvalidColumn(
                    (*name).to_string(),
                )));
            }
        }
        let fetches = self
            .relations
            .iter_mut()
            .filter(|r| names.iter().any(|n| *n == r.name()))
            .map(|r| r.fetch(cx));
        let outcomes = join_all(fetches).await;
        try_outcome!(collect_outcomes(outcomes));
        Outcome::Ok(())
    }
}
