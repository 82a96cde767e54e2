//! SQL expression and statement builders for sqlfox.
//!
//! `sqlfox-query` is the **statement construction layer**. The ORM composes
//! `Expr` trees and statement builders as plain data; they are compiled to SQL
//! text plus positional parameters only when handed to a `Connection`, using
//! the connection's own `Dialect`.
//!
//! - **Expressions**: `Expr` for WHERE and ORDER BY terms, including `EXISTS`
//!   subqueries and `COUNT(*)`.
//! - **Statements**: `Select`, `Insert`, `Update`, `Delete`.
//! - **Raw SQL**: `RawQuery` rewrites named `:param` placeholders.

pub mod clause;
pub mod expr;
pub mod raw;
pub mod statement;

pub use clause::{Limit, Offset, OrderBy, OrderDirection, OrderTarget, Where};
pub use expr::{BinaryOp, Expr};
pub use raw::RawQuery;
pub use statement::{Delete, Insert, Select, Statement, StatementKind, Update};

use asupersync::{Cx, Outcome};
use sqlfox_core::{Connection, Row, Value};

/// Raw SQL query execution, bypassing the builders.
pub async fn raw_query<C: Connection>(
    cx: &Cx,
    conn: &C,
    sql: &str,
    params: &[Value],
) -> Outcome<Vec<Row>, sqlfox_core::Error> {
    conn.query(cx, sql, params).await
}

/// Raw SQL statement execution.
pub async fn raw_execute<C: Connection>(
    cx: &Cx,
    conn: &C,
    sql: &str,
    params: &[Value],
) -> Outcome<u64, sqlfox_core::Error> {
    conn.execute(cx, sql, params).await
}
