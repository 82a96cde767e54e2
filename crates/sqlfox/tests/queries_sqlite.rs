use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use serde_json::json;

use sqlfox::prelude::*;
use sqlfox::{BuilderError, ConnectionErrorKind, DEFAULT_CONNECTION, Delete, Dialect, Select};
use sqlfox_sqlite::SqliteConnection;

type M = Arc<Model<SqliteConnection>>;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn names(rows: &[Instance<SqliteConnection>]) -> Vec<String> {
    rows.iter()
        .map(|u| u.get_as::<String>("username").unwrap())
        .collect()
}

fn user_decl() -> ModelDecl<SqliteConnection> {
    ModelDecl::new("User")
        .field(FieldDecl::new::<i64>("id").with(pkey()))
        .field(FieldDecl::new::<String>("username").with(index()))
        .field(FieldDecl::new::<i32>("age").with(default(0)))
}

async fn seeded(cx: &Cx, connections: &Connections<SqliteConnection>) -> M {
    let user = connections.define(user_decl()).expect("define User");
    connections
        .init(
            DEFAULT_CONNECTION,
            SqliteConnection::open_memory().expect("open sqlite memory db"),
        )
        .expect("init default");
    let db = connections.database(DEFAULT_CONNECTION).unwrap();
    unwrap_outcome(db.connect(cx).await);
    unwrap_outcome(db.create_all(cx).await);
    for (name, age) in [("ann", 31), ("bob", 17), ("cid", 44), ("dee", 17)] {
        let mut u = user.create(json!({"username": name, "age": age})).unwrap();
        unwrap_outcome(u.save(cx).await);
    }
    user
}

#[test]
fn sqlite_query_builder_chains_immutably() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connections = Connections::new();
        let user = seeded(&cx, &connections).await;

        let everyone = user.query();
        let minors = everyone.filter([("age", 17)]).unwrap();
        assert_eq!(unwrap_outcome(everyone.all(&cx).await).len(), 4);
        assert_eq!(unwrap_outcome(minors.all(&cx).await).len(), 2);

        let by_age = everyone.order_by([("age", -1), ("username", 1)]).unwrap();
        assert_eq!(
            names(&unwrap_outcome(by_age.all(&cx).await)),
            vec!["cid", "ann", "bob", "dee"]
        );
        let page = by_age.limit(2).unwrap().offset(1).unwrap();
        assert_eq!(names(&unwrap_outcome(page.all(&cx).await)), vec!["ann", "bob"]);

        let oldest = unwrap_outcome(by_age.first(&cx).await).unwrap();
        assert_eq!(oldest.get_as::<String>("username").unwrap(), "cid");
        let nobody = everyone.filter(user.c("age").unwrap().gt(100)).unwrap();
        assert!(unwrap_outcome(nobody.first(&cx).await).is_none());

        let removed = unwrap_outcome(
            user.delete_query()
                .filter([("age", 17)])
                .unwrap()
                .execute(&cx)
                .await,
        );
        assert_eq!(removed, 2);
        assert_eq!(unwrap_outcome(everyone.all(&cx).await).len(), 2);
    });
}

#[test]
fn sqlite_prebuilt_queries() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connections = Connections::new();
        let user = seeded(&cx, &connections).await;

        let raw = user
            .query()
            .set_built_query("SELECT * FROM \"user\" WHERE age > :min ORDER BY age")
            .unwrap()
            .values([("min", 20)])
            .unwrap();
        assert_eq!(names(&unwrap_outcome(raw.all(&cx).await)), vec!["ann", "cid"]);
        let err = raw.filter([("age", 1)]).unwrap_err();
        assert!(matches!(err, Error::Builder(BuilderError::QueryBuilt)));

        let statement = Select::from("user").filter(Expr::col("username").eq("bob"));
        let built = user.query().set_built_query(statement).unwrap();
        let bob = unwrap_outcome(built.first(&cx).await).unwrap();
        assert_eq!(bob.get_as::<i32>("age").unwrap(), 17);

        let err = user
            .query()
            .set_built_query(Delete::from("user"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid query type 'delete', expected 'select'");

        let wipe = user
            .delete_query()
            .set_built_query(Delete::from("user").filter(Expr::col("age").lt(18)))
            .unwrap();
        assert_eq!(unwrap_outcome(wipe.execute(&cx).await), 2);
    });
}

#[test]
fn query_sql_is_dialect_specific() {
    let connections = Connections::<SqliteConnection>::new();
    let user = connections.define(user_decl()).unwrap();
    let q = user
        .query()
        .filter(user.c("age").unwrap().ge(18))
        .unwrap()
        .order_by(OrderBy::asc("username"))
        .unwrap();
    let (sqlite, _) = q.to_sql(Dialect::Sqlite).unwrap();
    let (postgres, params) = q.to_sql(Dialect::Postgres).unwrap();
    assert_eq!(
        sqlite,
        "SELECT * FROM \"user\" WHERE \"age\" >= ?1 ORDER BY \"username\" ASC"
    );
    assert_eq!(
        postgres,
        "SELECT * FROM \"user\" WHERE \"age\" >= $1 ORDER BY \"username\" ASC"
    );
    assert_eq!(params, vec![Value::Int(18)]);
}

#[test]
fn connection_registry_lifecycle() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let connections = Connections::<SqliteConnection>::new();
        let kind = |err: Error| match err {
            Error::Connection(e) => e.kind,
            other => panic!("expected connection error, got {other:?}"),
        };

        assert_eq!(
            kind(connections.db(DEFAULT_CONNECTION).unwrap_err()),
            ConnectionErrorKind::NotInitialized
        );
        assert_eq!(
            kind(connections.metadata(DEFAULT_CONNECTION).unwrap_err()),
            ConnectionErrorKind::NotInitialized
        );

        let user = connections.define(user_decl()).unwrap();
        let err = match user.count(&cx, None).await {
            Outcome::Err(e) => e,
            _ => panic!("count must fail before init"),
        };
        assert_eq!(kind(err), ConnectionErrorKind::NotInitialized);

        connections
            .init(DEFAULT_CONNECTION, SqliteConnection::open_memory().unwrap())
            .unwrap();
        assert_eq!(
            kind(
                connections
                    .init(DEFAULT_CONNECTION, SqliteConnection::open_memory().unwrap())
                    .unwrap_err()
            ),
            ConnectionErrorKind::AlreadyInitialized
        );

        unwrap_outcome(connections.connect_all(&cx).await);
        let metadata = connections.metadata(DEFAULT_CONNECTION).unwrap();
        assert!(metadata.model("User").is_some());
        assert!(metadata.model("app.models.User").is_some());

        let db = connections.database(DEFAULT_CONNECTION).unwrap();
        unwrap_outcome(db.create_all(&cx).await);
        assert_eq!(unwrap_outcome(user.count(&cx, None).await), 0);
        unwrap_outcome(db.drop_all(&cx).await);
        unwrap_outcome(connections.disconnect_all(&cx).await);
    });
}
