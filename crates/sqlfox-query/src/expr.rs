//! SQL expressions for query building.
//!
//! Expressions are plain data: they are composed by the ORM and compiled for
//! a [`Dialect`] only when a statement is built, with every literal turned
//! into a positional parameter.

use crate::statement::Select;
use sqlfox_core::{Dialect, Value};

/// A SQL expression usable in WHERE and ORDER BY positions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference with optional table qualifier
    Column {
        /// Optional table name or alias
        table: Option<String>,
        /// Column name
        name: String,
    },

    /// Literal value, always bound as a parameter
    Literal(Value),

    /// Binary operation (e.g., a = b, a AND b)
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// NOT expr
    Not(Box<Expr>),

    /// IS NULL / IS NOT NULL
    IsNull { expr: Box<Expr>, negated: bool },

    /// IN expression
    In {
        expr: Box<Expr>,
        values: Vec<Expr>,
        negated: bool,
    },

    /// Raw SQL fragment (escape hatch)
    Raw(String),

    /// Parenthesized expression
    Paren(Box<Expr>),

    /// Special aggregate: COUNT(*)
    CountStar,

    /// EXISTS (subquery)
    Exists(Box<Select>),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
    /// Logical AND
    And,
    /// Logical OR
    Or,
}

impl BinaryOp {
    /// Get the SQL representation of this operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

impl Expr {
    /// Create a column reference expression.
    pub fn col(name: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            name: name.into(),
        }
    }

    /// Create a qualified column reference (table.column).
    pub fn qualified(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            name: column.into(),
        }
    }

    /// Create a literal value expression.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Create a raw SQL expression (escape hatch).
    pub fn raw(sql: impl Into<String>) -> Self {
        Expr::Raw(sql.into())
    }

    /// EXISTS over a subquery.
    pub fn exists(select: Select) -> Self {
        Expr::Exists(Box::new(select))
    }

    fn binary(self, op: BinaryOp, other: Expr) -> Self {
        Expr::Binary {
            left: Box::new(self),
            op,
            right: Box::new(other),
        }
    }

    /// Equal to. Comparing against a NULL literal yields `IS NULL`.
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        match other.into() {
            Expr::Literal(Value::Null) => self.is_null(),
            other => self.binary(BinaryOp::Eq, other),
        }
    }

    /// Not equal to. Comparing against a NULL literal yields `IS NOT NULL`.
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        match other.into() {
            Expr::Literal(Value::Null) => self.is_not_null(),
            other => self.binary(BinaryOp::Ne, other),
        }
    }

    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Lt, other.into())
    }

    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Le, other.into())
    }

    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Gt, other.into())
    }

    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::Ge, other.into())
    }

    /// Logical AND
    pub fn and(self, other: impl Into<Expr>) -> Self {
        self.binary(BinaryOp::And, other.into())
    }

    /// Logical OR
    pub fn or(self, other: impl Into<Expr>) -> Self {
        Expr::Paren(Box::new(self.binary(BinaryOp::Or, other.into())))
    }

    /// Logical NOT
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// IN (values...)
    pub fn in_list<I, V>(self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Expr>,
    {
        Expr::In {
            expr: Box::new(self),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    /// Compile this expression, appending bound values to `params`.
    ///
    /// Placeholders are numbered from the current length of `params`, so one
    /// vector threaded through a whole statement yields consistent indices.
    pub fn build(&self, dialect: Dialect, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Column { table, name } => {
                if let Some(t) = table {
                    format!(
                        "{}.{}",
                        dialect.quote_identifier(t),
                        dialect.quote_identifier(name)
                    )
                } else {
                    dialect.quote_identifier(name)
                }
            }

            Expr::Literal(value) => {
                params.push(value.clone());
                dialect.placeholder(params.len())
            }

            Expr::Binary { left, op, right } => {
                let left_sql = left.build(dialect, params);
                let right_sql = right.build(dialect, params);
                format!("{left_sql} {} {right_sql}", op.as_str())
            }

            Expr::Not(expr) => format!("NOT {}", expr.build(dialect, params)),

            Expr::IsNull { expr, negated } => {
                let expr_sql = expr.build(dialect, params);
                let not_str = if *negated { " NOT" } else { "" };
                format!("{expr_sql} IS{not_str} NULL")
            }

            Expr::In {
                expr,
                values,
                negated,
            } => {
                let expr_sql = expr.build(dialect, params);
                if values.is_empty() {
                    // IN () is not valid SQL; an empty list matches nothing.
                    return if *negated { "1 = 1" } else { "1 = 0" }.to_string();
                }
                let value_sqls: Vec<_> = values.iter().map(|v| v.build(dialect, params)).collect();
                let not_str = if *negated { "NOT " } else { "" };
                format!("{expr_sql} {not_str}IN ({})", value_sqls.join(", "))
            }

            Expr::Raw(sql) => sql.clone(),

            Expr::Paren(expr) => format!("({})", expr.build(dialect, params)),

            Expr::CountStar => "COUNT(*)".to_string(),

            Expr::Exists(select) => format!("EXISTS ({})", select.build_into(dialect, params)),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<i32> for Expr {
    fn from(v: i32) -> Self {
        Expr::Literal(Value::Int(v))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Literal(Value::BigInt(v))
    }
}

impl From<bool> for Expr {
    fn from(v: bool) -> Self {
        Expr::Literal(Value::Bool(v))
    }
}

impl From<&str> for Expr {
    fn from(v: &str) -> Self {
        Expr::Literal(Value::Text(v.to_string()))
    }
}

impl From<String> for Expr {
    fn from(v: String) -> Self {
        Expr::Literal(Value::Text(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(expr: &Expr, dialect: Dialect) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = expr.build(dialect, &mut params);
        (sql, params)
    }

    #[test]
    fn comparison_binds_parameters() {
        let expr = Expr::col("age").ge(18).and(Expr::col("name").eq("ann"));
        let (sql, params) = build(&expr, Dialect::Sqlite);
        assert_eq!(sql, "\"age\" >= ?1 AND \"name\" = ?2");
        assert_eq!(params, vec![Value::Int(18), Value::Text("ann".into())]);
    }

    #[test]
    fn null_comparison_becomes_is_null() {
        let (sql, params) = build(&Expr::col("parent_id").eq(Value::Null), Dialect::Postgres);
        assert_eq!(sql, "\"parent_id\" IS NULL");
        assert!(params.is_empty());
        let (sql, _) = build(&Expr::col("parent_id").ne(Value::Null), Dialect::Postgres);
        assert_eq!(sql, "\"parent_id\" IS NOT NULL");
    }

    #[test]
    fn or_is_parenthesized() {
        let expr = Expr::col("a").eq(1).or(Expr::col("b").eq(2)).and(Expr::col("c").eq(3));
        let (sql, _) = build(&expr, Dialect::Postgres);
        assert_eq!(sql, "(\"a\" = $1 OR \"b\" = $2) AND \"c\" = $3");
    }

    #[test]
    fn in_list_and_empty_list() {
        let (sql, params) = build(&Expr::qualified("t", "id").in_list([1_i64, 2]), Dialect::Sqlite);
        assert_eq!(sql, "\"t\".\"id\" IN (?1, ?2)");
        assert_eq!(params.len(), 2);
        let empty: Vec<i64> = Vec::new();
        let (sql, _) = build(&Expr::col("id").in_list(empty), Dialect::Sqlite);
        assert_eq!(sql, "1 = 0");
    }

    #[test]
    fn exists_threads_parameters() {
        let inner = Select::from("mid").filter(Expr::col("a_id").eq(5_i64));
        let expr = Expr::col("flag").eq(true).and(Expr::exists(inner));
        let (sql, params) = build(&expr, Dialect::Sqlite);
        assert_eq!(
            sql,
            "\"flag\" = ?1 AND EXISTS (SELECT * FROM \"mid\" WHERE \"a_id\" = ?2)"
        );
        assert_eq!(params, vec![Value::Bool(true), Value::BigInt(5)]);
    }
}
