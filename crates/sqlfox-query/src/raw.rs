//! Raw SQL with named `:param` placeholders.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use sqlfox_core::{BuilderError, Dialect, Error, Result, Value};

// `::` (casts) and word-prefixed colons are matched first so they are left alone.
static NAMED_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"::|\w:\w+|:([A-Za-z_][A-Za-z0-9_]*)").unwrap_or_else(|e| {
        unreachable!("named parameter pattern is valid: {e}")
    })
});

/// A literal SQL string plus named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuery {
    sql: String,
    values: BTreeMap<String, Value>,
}

impl RawQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Bind a named value, replacing any earlier binding of the same name.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Bind every entry of `values`.
    pub fn bind_all(mut self, values: &BTreeMap<String, Value>) -> Self {
        self.values
            .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Names referenced by the SQL text, in order of first appearance.
    pub fn param_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for caps in NAMED_PARAM.captures_iter(&self.sql) {
            if let Some(name) = caps.get(1) {
                if !names.iter().any(|n| n == name.as_str()) {
                    names.push(name.as_str().to_string());
                }
            }
        }
        names
    }

    /// Rewrite named placeholders to the dialect's positional form.
    ///
    /// Every occurrence gets its own parameter, so repeated names work for
    /// dialects with anonymous `?` placeholders too. Values bound but not
    /// referenced are ignored.
    pub fn build(&self, dialect: Dialect) -> Result<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let mut sql = String::with_capacity(self.sql.len());
        let mut last = 0;
        for caps in NAMED_PARAM.captures_iter(&self.sql) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = self.values.get(name.as_str()).ok_or_else(|| {
                Error::Builder(BuilderError::Arguments(format!(
                    "A value is required for bind parameter '{}'",
                    name.as_str()
                )))
            })?;
            sql.push_str(&self.sql[last..whole.start()]);
            params.push(value.clone());
            sql.push_str(&dialect.placeholder(params.len()));
            last = whole.end();
        }
        sql.push_str(&self.sql[last..]);
        Ok((sql, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_params() {
        let raw = RawQuery::new("SELECT * FROM user WHERE username = :name AND id > :id")
            .bind("name", "vanutp")
            .bind("id", 3_i64);
        let (sql, params) = raw.build(Dialect::Sqlite).unwrap();
        assert_eq!(sql, "SELECT * FROM user WHERE username = ?1 AND id > ?2");
        assert_eq!(params, vec![Value::Text("vanutp".into()), Value::BigInt(3)]);
        assert_eq!(raw.param_names(), vec!["name", "id"]);
    }

    #[test]
    fn leaves_casts_and_time_literals() {
        let raw = RawQuery::new("SELECT :v::text, '12:30' AS t").bind("v", 1);
        let (sql, params) = raw.build(Dialect::Postgres).unwrap();
        assert_eq!(sql, "SELECT $1::text, '12:30' AS t");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn repeated_names_get_one_slot_each() {
        let raw = RawQuery::new("SELECT :a, :a").bind("a", true);
        let (sql, params) = raw.build(Dialect::Mysql).unwrap();
        assert_eq!(sql, "SELECT ?, ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = RawQuery::new("SELECT :nope").build(Dialect::Sqlite).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
