//! Statement builders for SELECT, INSERT, UPDATE and DELETE.
//!
//! Each builder is an owned value that compiles to `(sql, params)` for a
//! dialect. The `fetch_*`/`execute` helpers compile for the connection's own
//! dialect and run the statement.

use crate::clause::{Limit, Offset, OrderBy, Where};
use crate::expr::Expr;
use asupersync::{Cx, Outcome};
use sqlfox_core::{Connection, Dialect, Row, Value};

/// The four statement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl StatementKind {
    pub const fn name(self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
        }
    }
}

/// Any compiled-on-demand statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        match self {
            Statement::Select(_) => StatementKind::Select,
            Statement::Insert(_) => StatementKind::Insert,
            Statement::Update(_) => StatementKind::Update,
            Statement::Delete(_) => StatementKind::Delete,
        }
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        match self {
            Statement::Select(s) => s.build(dialect),
            Statement::Insert(s) => s.build(dialect),
            Statement::Update(s) => s.build(dialect),
            Statement::Delete(s) => s.build(dialect),
        }
    }
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Insert> for Statement {
    fn from(s: Insert) -> Self {
        Statement::Insert(s)
    }
}

impl From<Update> for Statement {
    fn from(s: Update) -> Self {
        Statement::Update(s)
    }
}

impl From<Delete> for Statement {
    fn from(s: Delete) -> Self {
        Statement::Delete(s)
    }
}

fn push_filter(existing: Option<Where>, expr: Expr) -> Option<Where> {
    Some(match existing {
        Some(w) => w.and(expr),
        None => Where::new(expr),
    })
}

/// SELECT statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    columns: Vec<Expr>,
    where_clause: Option<Where>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
}

impl Select {
    /// `SELECT * FROM table`
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Replace the projection.
    pub fn columns<I: IntoIterator<Item = Expr>>(mut self, columns: I) -> Self {
        self.columns = columns.into_iter().collect();
        self
    }

    /// `SELECT COUNT(*) FROM table`
    pub fn count(table: impl Into<String>) -> Self {
        Self::from(table).columns([Expr::CountStar])
    }

    /// Add a WHERE condition, ANDed with any existing ones.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = push_filter(self.where_clause, expr);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(Limit(limit));
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(Offset(offset));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn where_clause(&self) -> Option<&Where> {
        self.where_clause.as_ref()
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit.map(|l| l.0)
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.build_into(dialect, &mut params);
        (sql, params)
    }

    /// Compile into a shared parameter vector (used for subqueries).
    pub fn build_into(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| c.build(dialect, params))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "SELECT {projection} FROM {}",
            dialect.quote_identifier(&self.table)
        );
        if let Some(w) = self.where_clause.as_ref().filter(|w| !w.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(&w.build(dialect, params));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<_> = self.order_by.iter().map(|o| o.build(dialect, params)).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(Limit(n)), _) => sql.push_str(&format!(" LIMIT {n}")),
            // SQLite and MySQL reject OFFSET without LIMIT.
            (None, Some(_)) if dialect != Dialect::Postgres => sql.push_str(" LIMIT -1"),
            _ => {}
        }
        if let Some(Offset(n)) = self.offset {
            sql.push_str(&format!(" OFFSET {n}"));
        }
        sql
    }

    /// Run and return every row.
    pub async fn fetch_all<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Vec<Row>, sqlfox_core::Error> {
        let (sql, params) = self.build(conn.dialect());
        tracing::trace!(sql = %sql, "select");
        conn.query(cx, &sql, &params).await
    }

    /// Run and return the first row, if any.
    pub async fn fetch_one<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Option<Row>, sqlfox_core::Error> {
        let (sql, params) = self.build(conn.dialect());
        tracing::trace!(sql = %sql, "select one");
        conn.query_one(cx, &sql, &params).await
    }

    /// Run and return the first column of the first row.
    pub async fn fetch_scalar<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<Option<Value>, sqlfox_core::Error> {
        let (sql, params) = self.build(conn.dialect());
        tracing::trace!(sql = %sql, "select scalar");
        conn.query_scalar(cx, &sql, &params).await
    }
}

/// INSERT statement builder for a single row.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    table: String,
    columns: Vec<String>,
    values: Vec<Value>,
    returning: Option<String>,
}

impl Insert {
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            values: Vec::new(),
            returning: None,
        }
    }

    /// Append one column/value pair.
    pub fn value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push(column.into());
        self.values.push(value.into());
        self
    }

    /// Column whose value the executor should hand back (PostgreSQL only).
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let table = dialect.quote_identifier(&self.table);
        let mut sql = if self.columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<_> = self
                .columns
                .iter()
                .map(|c| dialect.quote_identifier(c))
                .collect();
            let placeholders: Vec<_> = (1..=self.values.len())
                .map(|i| dialect.placeholder(i))
                .collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        if let Some(col) = self.returning.as_ref().filter(|_| dialect == Dialect::Postgres) {
            sql.push_str(&format!(" RETURNING {}", dialect.quote_identifier(col)));
        }
        (sql, self.values.clone())
    }

    /// Run and return the storage-assigned row id.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<i64, sqlfox_core::Error> {
        let (sql, params) = self.build(conn.dialect());
        tracing::trace!(sql = %sql, "insert");
        conn.insert(cx, &sql, &params).await
    }
}

/// UPDATE statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    table: String,
    sets: Vec<(String, Value)>,
    where_clause: Option<Where>,
}

impl Update {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            sets: Vec::new(),
            where_clause: None,
        }
    }

    /// Append one `column = value` assignment.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sets.push((column.into(), value.into()));
        self
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = push_filter(self.where_clause, expr);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut set_clauses = Vec::with_capacity(self.sets.len());
        for (name, value) in &self.sets {
            params.push(value.clone());
            set_clauses.push(format!(
                "{} = {}",
                dialect.quote_identifier(name),
                dialect.placeholder(params.len())
            ));
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.table),
            set_clauses.join(", ")
        );
        if let Some(w) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(&w.build(dialect, &mut params));
        }
        (sql, params)
    }

    /// Run and return rows affected.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<u64, sqlfox_core::Error> {
        let (sql, params) = self.build(conn.dialect());
        tracing::trace!(sql = %sql, "update");
        conn.execute(cx, &sql, &params).await
    }
}

/// DELETE statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    table: String,
    where_clause: Option<Where>,
}

impl Delete {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
        }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = push_filter(self.where_clause, expr);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn build(&self, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", dialect.quote_identifier(&self.table));
        if let Some(w) = self.where_clause.as_ref().filter(|w| !w.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(&w.build(dialect, &mut params));
        }
        (sql, params)
    }

    /// Run and return rows affected.
    pub async fn execute<C: Connection>(
        &self,
        cx: &Cx,
        conn: &C,
    ) -> Outcome<u64, sqlfox_core::Error> {
        let (sql, params) = self.build(conn.dialect());
        tracing::trace!(sql = %sql, "delete");
        conn.execute(cx, &sql, &params).await
    }
}
