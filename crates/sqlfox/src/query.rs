//! Immutable query builder bound to a model.
//!
//! Every chainable call returns a fresh copy, leaving the receiver untouched:
//!
//! ```ignore
//! let adults = user.query().filter(user.c("age")?.ge(18))?;
//! let oldest = adults.order_by(("age", -1))?.first(&cx).await;
//! let named = adults.filter([("username", "vanutp")])?.all(&cx).await;
//! ```
//!
//! A query can instead carry a pre-built statement or raw SQL via
//! [`Query::set_built_query`]; after that only [`Query::values`] may change it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use asupersync::{Cx, Outcome};
use sqlfox_core::{BuilderError, Connection, Dialect, Error, InstanceError, Result, Value};
use sqlfox_query::{
    Delete, Expr, Insert, OrderBy, RawQuery, Select, Statement, StatementKind, Update,
};

use crate::model::{Instance, Model};

/// What a query does when run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Delete,
}

impl QueryKind {
    const fn statement_kind(self) -> StatementKind {
        match self {
            QueryKind::Select => StatementKind::Select,
            QueryKind::Delete => StatementKind::Delete,
        }
    }

    pub const fn name(self) -> &'static str {
        self.statement_kind().name()
    }
}

/// A query supplied whole instead of assembled from parts.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltQuery {
    Statement(Statement),
    /// Raw SQL with named `:param` placeholders bound from [`Query::values`].
    Raw(String),
}

impl From<Statement> for BuiltQuery {
    fn from(statement: Statement) -> Self {
        BuiltQuery::Statement(statement)
    }
}

impl From<Select> for BuiltQuery {
    fn from(select: Select) -> Self {
        BuiltQuery::Statement(select.into())
    }
}

impl From<Delete> for BuiltQuery {
    fn from(delete: Delete) -> Self {
        BuiltQuery::Statement(delete.into())
    }
}

impl From<Insert> for BuiltQuery {
    fn from(insert: Insert) -> Self {
        BuiltQuery::Statement(insert.into())
    }
}

impl From<Update> for BuiltQuery {
    fn from(update: Update) -> Self {
        BuiltQuery::Statement(update.into())
    }
}

impl From<&str> for BuiltQuery {
    fn from(sql: &str) -> Self {
        BuiltQuery::Raw(sql.to_string())
    }
}

impl From<String> for BuiltQuery {
    fn from(sql: String) -> Self {
        BuiltQuery::Raw(sql)
    }
}

/// Arguments of [`Query::filter`]: expressions or `column = value` pairs.
#[derive(Debug, Clone, Default)]
pub struct WhereArgs {
    exprs: Vec<Expr>,
    equals: Vec<(String, Value)>,
}

impl WhereArgs {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn expr(mut self, expr: Expr) -> Self {
        self.exprs.push(expr);
        self
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((column.into(), value.into()));
        self
    }
}

impl From<Expr> for WhereArgs {
    fn from(expr: Expr) -> Self {
        Self::new().expr(expr)
    }
}

impl From<Vec<Expr>> for WhereArgs {
    fn from(exprs: Vec<Expr>) -> Self {
        Self {
            exprs,
            equals: Vec::new(),
        }
    }
}

impl<const N: usize> From<[Expr; N]> for WhereArgs {
    fn from(exprs: [Expr; N]) -> Self {
        Self::from(Vec::from(exprs))
    }
}

impl From<Vec<(String, Value)>> for WhereArgs {
    fn from(equals: Vec<(String, Value)>) -> Self {
        Self {
            exprs: Vec::new(),
            equals,
        }
    }
}

impl<V: Into<Value>, const N: usize> From<[(&str, V); N]> for WhereArgs {
    fn from(pairs: [(&str, V); N]) -> Self {
        pairs
            .into_iter()
            .fold(Self::new(), |args, (column, value)| args.eq(column, value))
    }
}

/// Arguments of [`Query::order_by`]: terms or `column → ±1` pairs.
#[derive(Debug, Clone, Default)]
pub struct OrderArgs {
    terms: Vec<OrderBy>,
    keys: Vec<(String, i32)>,
}

impl OrderArgs {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn term(mut self, order: OrderBy) -> Self {
        self.terms.push(order);
        self
    }

    /// `1` ascending, `-1` descending.
    #[must_use]
    pub fn key(mut self, column: impl Into<String>, direction: i32) -> Self {
        self.keys.push((column.into(), direction));
        self
    }
}

impl From<OrderBy> for OrderArgs {
    fn from(order: OrderBy) -> Self {
        Self::new().term(order)
    }
}

impl From<Vec<OrderBy>> for OrderArgs {
    fn from(terms: Vec<OrderBy>) -> Self {
        Self {
            terms,
            keys: Vec::new(),
        }
    }
}

impl From<(&str, i32)> for OrderArgs {
    fn from((column, direction): (&str, i32)) -> Self {
        Self::new().key(column, direction)
    }
}

impl<const N: usize> From<[(&str, i32); N]> for OrderArgs {
    fn from(pairs: [(&str, i32); N]) -> Self {
        pairs
            .into_iter()
            .fold(Self::new(), |args, (column, direction)| args.key(column, direction))
    }
}

fn check_arguments(exprs: usize, keywords: usize) -> Result<()> {
    match (exprs, keywords) {
        (0, 0) => Err(Error::Builder(BuilderError::Arguments(
            "No arguments provided".to_string(),
        ))),
        (0, _) | (_, 0) => Ok(()),
        _ => Err(Error::Builder(BuilderError::Arguments(
            "Positional and keyword arguments cannot be used together".to_string(),
        ))),
    }
}

/// A select or delete query over one model.
pub struct Query<C: Connection> {
    model: Arc<Model<C>>,
    kind: QueryKind,
    filters: Vec<Expr>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
    built: Option<BuiltQuery>,
    values: Option<BTreeMap<String, Value>>,
}

impl<C: Connection> Clone for Query<C> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            kind: self.kind,
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
            built: self.built.clone(),
            values: self.values.clone(),
        }
    }
}

impl<C: Connection> fmt::Debug for Query<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("model", &self.model.name())
            .field("kind", &self.kind)
            .field("filters", &self.filters)
            .field("order_by", &self.order_by)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .field("built", &self.built)
            .field("values", &self.values)
            .finish()
    }
}

impl<C: Connection> Model<C> {
    /// An empty select query.
    pub fn query(self: &Arc<Self>) -> Query<C> {
        Query::new(Arc::clone(self), QueryKind::Select)
    }

    /// An empty delete query.
    pub fn delete_query(self: &Arc<Self>) -> Query<C> {
        Query::new(Arc::clone(self), QueryKind::Delete)
    }
}

impl<C: Connection> Query<C> {
    pub fn new(model: Arc<Model<C>>, kind: QueryKind) -> Self {
        Self {
            model,
            kind,
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
            built: None,
            values: None,
        }
    }

    pub fn model(&self) -> &Arc<Model<C>> {
        &self.model
    }

    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    fn mutate(&self, apply: impl FnOnce(&mut Self) -> Result<()>) -> Result<Self> {
        if self.built.is_some() {
            return Err(Error::Builder(BuilderError::QueryBuilt));
        }
        let mut next = self.clone();
        apply(&mut next)?;
        Ok(next)
    }

    fn checked_column(&self, name: &str) -> Result<Expr> {
        if self.model.has_column(name) {
            Ok(Expr::col(name))
        } else {
            Err(Error::Instance(InstanceError::InvalidColumn(name.to_string())))
        }
    }

    /// Add conditions, ANDed with existing ones. Also known as `where`.
    #[doc(alias = "where")]
    pub fn filter(&self, args: impl Into<WhereArgs>) -> Result<Self> {
        let args = args.into();
        check_arguments(args.exprs.len(), args.equals.len())?;
        self.mutate(|q| {
            q.filters.extend(args.exprs);
            for (column, value) in args.equals {
                let column = q.checked_column(&column)?;
                q.filters.push(column.eq(value));
            }
            Ok(())
        })
    }

    pub fn order_by(&self, args: impl Into<OrderArgs>) -> Result<Self> {
        let args = args.into();
        check_arguments(args.terms.len(), args.keys.len())?;
        self.mutate(|q| {
            q.order_by.extend(args.terms);
            for (column, direction) in args.keys {
                let column = q.checked_column(&column)?;
                let term = match direction {
                    1 => OrderBy::asc(column),
                    -1 => OrderBy::desc(column),
                    other => return Err(Error::Builder(BuilderError::InvalidOrder(other))),
                };
                q.order_by.push(term);
            }
            Ok(())
        })
    }

    pub fn limit(&self, limit: u64) -> Result<Self> {
        self.mutate(|q| {
            q.limit = Some(limit);
            Ok(())
        })
    }

    pub fn offset(&self, offset: u64) -> Result<Self> {
        self.mutate(|q| {
            q.offset = Some(offset);
            Ok(())
        })
    }

    /// Named values for raw SQL. Allowed after a query is built.
    pub fn values<I, K, V>(&self, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let values: BTreeMap<String, Value> = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if values.is_empty() {
            return Err(Error::Builder(BuilderError::Arguments(
                "No values provided".to_string(),
            )));
        }
        let mut next = self.clone();
        next.values.get_or_insert_with(BTreeMap::new).extend(values);
        Ok(next)
    }

    /// Replace the assembled query with a pre-built statement or raw SQL.
    pub fn set_built_query(&self, query: impl Into<BuiltQuery>) -> Result<Self> {
        let query = query.into();
        if let BuiltQuery::Statement(statement) = &query {
            if statement.kind() != self.kind.statement_kind() {
                return Err(Error::Builder(BuilderError::InvalidQueryType {
                    got: statement.kind().name().to_string(),
                    expected: Some(self.kind.name().to_string()),
                }));
            }
        }
        self.mutate(|q| {
            q.built = Some(query);
            Ok(())
        })
    }

    /// Compile for `dialect`.
    pub fn to_sql(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        self.compile(dialect, self.limit)
    }

    fn compile(&self, dialect: Dialect, limit: Option<u64>) -> Result<(String, Vec<Value>)> {
        match &self.built {
            Some(BuiltQuery::Statement(statement)) => return Ok(statement.build(dialect)),
            Some(BuiltQuery::Raw(sql)) => {
                let mut raw = RawQuery::new(sql.as_str());
                if let Some(values) = &self.values {
                    raw = raw.bind_all(values);
                }
                return raw.build(dialect);
            }
            None => {}
        }

        let table = &self.model.table()?.name;
        match self.kind {
            QueryKind::Select => {
                let mut select = Select::from(table);
                for filter in &self.filters {
                    select = select.filter(filter.clone());
                }
                for order in &self.order_by {
                    select = select.order_by(order.clone());
                }
                if let Some(limit) = limit {
                    select = select.limit(limit);
                }
                if let Some(offset) = self.offset {
                    select = select.offset(offset);
                }
                Ok(select.build(dialect))
            }
            QueryKind::Delete => {
                let mut delete = Delete::from(table);
                for filter in &self.filters {
                    delete = delete.filter(filter.clone());
                }
                Ok(delete.build(dialect))
            }
        }
    }

    fn expect_kind(&self, expected: QueryKind) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(Error::Builder(BuilderError::InvalidQueryType {
                got: self.kind.name().to_string(),
                expected: Some(expected.name().to_string()),
            }))
        }
    }

    /// First matching instance.
    ///
    /// Adds `LIMIT 1` unless the query already has it or is pre-built.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(model = %self.model.name()))]
    pub async fn first(&self, cx: &Cx) -> Outcome<Option<Instance<C>>, Error> {
        try_result!(self.expect_kind(QueryKind::Select));
        let conn = try_result!(self.model.executor());
        let limit = if self.built.is_none() { Some(1) } else { self.limit };
        let (sql, params) = try_result!(self.compile(conn.dialect(), limit));
        tracing::trace!(sql = %sql, "first");
        let row = try_outcome!(conn.query_one(cx, &sql, &params).await);
        match row {
            Some(row) => Outcome::Ok(Some(try_result!(self.model.from_row(&row)))),
            None => Outcome::Ok(None),
        }
    }

    /// Every matching instance.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(model = %self.model.name()))]
    pub async fn all(&self, cx: &Cx) -> Outcome<Vec<Instance<C>>, Error> {
        try_result!(self.expect_kind(QueryKind::Select));
        let conn = try_result!(self.model.executor());
        let (sql, params) = try_result!(self.to_sql(conn.dialect()));
        tracing::trace!(sql = %sql, "all");
        let rows = try_outcome!(conn.query(cx, &sql, &params).await);
        let instances = try_result!(
            rows.iter()
                .map(|row| self.model.from_row(row))
                .collect::<Result<Vec<_>>>()
        );
        tracing::debug!(count = instances.len(), "Loaded instances");
        Outcome::Ok(instances)
    }

    /// Run a delete query. Returns rows affected.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(model = %self.model.name()))]
    pub async fn execute(&self, cx: &Cx) -> Outcome<u64, Error> {
        try_result!(self.expect_kind(QueryKind::Delete));
        let conn = try_result!(self.model.executor());
        let (sql, params) = try_result!(self.to_sql(conn.dialect()));
        tracing::trace!(sql = %sql, "execute");
        conn.execute(cx, &sql, &params).await
    }
}
