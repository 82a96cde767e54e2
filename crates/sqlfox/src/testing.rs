//! Scripted in-memory executor for unit tests.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use sqlfox_core::{Connection, Dialect, Error, Row, Value};

#[derive(Debug, Default)]
struct Script {
    log: Vec<(String, Vec<Value>)>,
    rows: VecDeque<Vec<Row>>,
    insert_ids: VecDeque<i64>,
}

/// Records every statement and answers queries from a queue.
///
/// Queries with nothing queued return no rows; inserts with nothing queued
/// return id 1; other statements report one affected row.
#[derive(Debug, Default)]
pub(crate) struct MockConnection {
    script: Mutex<Script>,
}

impl MockConnection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push_rows(&self, rows: Vec<Row>) {
        self.script().rows.push_back(rows);
    }

    pub(crate) fn push_insert_id(&self, id: i64) {
        self.script().insert_ids.push_back(id);
    }

    pub(crate) fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.script().log.clone()
    }

    fn record(&self, sql: &str, params: &[Value]) -> Vec<Row> {
        let mut script = self.script();
        script.log.push((sql.to_string(), params.to_vec()));
        script.rows.pop_front().unwrap_or_default()
    }
}

impl Connection for MockConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        let rows = self.record(sql, params);
        async move { Outcome::Ok(rows) }
    }

    fn query_one(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Option<Row>, Error>> + Send {
        let row = self.record(sql, params).into_iter().next();
        async move { Outcome::Ok(row) }
    }

    fn execute(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        self.record(sql, params);
        async { Outcome::Ok(1) }
    }

    fn insert(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<i64, Error>> + Send {
        self.record(sql, params);
        let id = self.script().insert_ids.pop_front().unwrap_or(1);
        async move { Outcome::Ok(id) }
    }
}

/// One-column row holding an integer, as returned by `COUNT(*)`.
pub(crate) fn scalar_row(n: i64) -> Row {
    Row::new(vec!["count".into()], vec![Value::BigInt(n)])
}

/// One single-column row per id.
pub(crate) fn id_rows(column: &str, ids: &[i64]) -> Vec<Row> {
    ids.iter()
        .map(|&id| Row::new(vec![column.to_string()], vec![Value::BigInt(id)]))
        .collect()
}

pub(crate) fn block_on<F, Fut>(f: F)
where
    F: FnOnce(Cx) -> Fut,
    Fut: Future<Output = ()>,
{
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f(Cx::for_testing()));
}

pub(crate) fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

pub(crate) fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}
