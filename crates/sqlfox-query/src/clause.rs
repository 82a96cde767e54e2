//! SQL clause types (WHERE, ORDER BY, LIMIT, OFFSET)

use crate::expr::Expr;
use sqlfox_core::{Dialect, Value};

/// WHERE clause: a conjunction of conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Where {
    conditions: Vec<Expr>,
}

impl Where {
    /// Create a new WHERE clause with the given expression.
    pub fn new(expr: Expr) -> Self {
        Self {
            conditions: vec![expr],
        }
    }

    /// Add an AND condition.
    pub fn and(mut self, expr: Expr) -> Self {
        self.conditions.push(expr);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Expr] {
        &self.conditions
    }

    /// Compile the condition list, without the `WHERE` keyword.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        self.conditions
            .iter()
            .map(|c| c.build(dialect, params))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    expr: Expr,
    direction: OrderDirection,
}

impl OrderBy {
    /// Create an ascending order by clause.
    pub fn asc(expr: impl Into<OrderTarget>) -> Self {
        Self {
            expr: expr.into().0,
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order by clause.
    pub fn desc(expr: impl Into<OrderTarget>) -> Self {
        Self {
            expr: expr.into().0,
            direction: OrderDirection::Desc,
        }
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }

    /// Generate SQL for this term.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        let dir = match self.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        format!("{} {dir}", self.expr.build(dialect, params))
    }
}

/// Something that can be ordered on: a column name or an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTarget(Expr);

impl From<&str> for OrderTarget {
    fn from(name: &str) -> Self {
        OrderTarget(Expr::col(name))
    }
}

impl From<String> for OrderTarget {
    fn from(name: String) -> Self {
        OrderTarget(Expr::col(name))
    }
}

impl From<Expr> for OrderTarget {
    fn from(expr: Expr) -> Self {
        OrderTarget(expr)
    }
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(pub u64);

/// OFFSET clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(pub u64);
