use std::sync::Arc;

use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};
use serde_json::json;

use sqlfox::prelude::*;
use sqlfox::{InstanceError, ModelError, ValidationErrorKind};
use sqlfox_sqlite::SqliteConnection;

type Db = Arc<Database<SqliteConnection>>;
type M = Arc<Model<SqliteConnection>>;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn expect_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        other => panic!("expected an error, got {other:?}"),
    }
}

fn define_user(db: &Db) -> M {
    db.define(
        ModelDecl::new("User")
            .field(FieldDecl::new::<i64>("id").with(pkey()))
            .field(FieldDecl::new::<String>("username"))
            .field(FieldDecl::new::<Option<i32>>("age"))
            .field(FieldDecl::new::<i32>("balance").with(default(100))),
    )
    .expect("define User")
}

fn open(db: &Db) {
    db.init(SqliteConnection::open_memory().expect("open sqlite memory db"))
        .expect("init database");
}

#[test]
fn sqlite_save_then_get_round_trips() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db: Db = Database::new("default");
        let user = define_user(&db);
        open(&db);
        unwrap_outcome(db.create_all(&cx).await);

        let mut u = user.create(json!({"username": "vanutp"})).expect("valid user");
        assert!(!u.is_bound());
        unwrap_outcome(u.save(&cx).await);
        let id = u.id().expect("assigned id");
        assert!(id > 0);
        assert!(u.is_bound());

        let loaded = unwrap_outcome(user.get(&cx, id).await).expect("stored row");
        assert!(loaded.is_bound());
        assert_eq!(loaded.get_as::<String>("username").unwrap(), "vanutp");
        assert_eq!(loaded.get_as::<i32>("balance").unwrap(), 100);
        assert_eq!(loaded.get("age").unwrap(), Value::Null);
        assert_eq!(loaded, u);

        // Saving a clean instance writes nothing new.
        unwrap_outcome(u.save(&cx).await);
        assert_eq!(unwrap_outcome(user.count(&cx, None).await), 1);

        assert!(unwrap_outcome(user.get(&cx, 999_i64).await).is_none());
    });
}

#[test]
fn sqlite_updates_only_after_changes() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db: Db = Database::new("default");
        let user = define_user(&db);
        open(&db);
        unwrap_outcome(db.create_all(&cx).await);

        let mut u = user.create(json!({"username": "a", "age": 20})).unwrap();
        unwrap_outcome(u.save(&cx).await);

        u.set("age", 30).unwrap();
        assert!(u.modified().contains("age"));
        unwrap_outcome(u.save(&cx).await);
        assert!(u.modified().is_empty());

        let err = u.set("id", 5_i64).unwrap_err();
        assert!(matches!(err, Error::Instance(InstanceError::ImmutablePrimaryKey(_))));

        let reloaded = unwrap_outcome(user.get(&cx, u.id().unwrap()).await).unwrap();
        assert_eq!(reloaded.get_as::<i32>("age").unwrap(), 30);
        assert_eq!(reloaded.get_as::<String>("username").unwrap(), "a");
    });
}

#[test]
fn sqlite_explicit_primary_key_survives_insert() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db: Db = Database::new("default");
        let user = define_user(&db);
        open(&db);
        unwrap_outcome(db.create_all(&cx).await);

        let mut u = user.create(json!({"username": "x"})).unwrap();
        u.set("id", 42_i64).unwrap();
        unwrap_outcome(u.save(&cx).await);
        assert_eq!(u.id(), Some(42));
        assert!(unwrap_outcome(user.get(&cx, 42_i64).await).is_some());
    });
}

#[test]
fn sqlite_delete_unbinds_and_resave_reinserts() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db: Db = Database::new("default");
        let user = define_user(&db);
        open(&db);
        unwrap_outcome(db.create_all(&cx).await);

        let mut fresh = user.create(json!({"username": "ghost"})).unwrap();
        let err = expect_err(fresh.delete(&cx).await);
        assert!(matches!(err, Error::Instance(InstanceError::Unbound)));

        unwrap_outcome(fresh.save(&cx).await);
        let id = fresh.id().unwrap();
        unwrap_outcome(fresh.delete(&cx).await);
        assert!(!fresh.is_bound());
        assert_eq!(fresh.id(), Some(id));
        assert!(unwrap_outcome(user.get(&cx, id).await).is_none());

        unwrap_outcome(fresh.save(&cx).await);
        let filter = user.c("id").unwrap().eq(id);
        assert!(unwrap_outcome(user.exists(&cx, filter).await));
    });
}

#[test]
fn sqlite_class_level_helpers() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();

    rt.block_on(async {
        let db: Db = Database::new("default");
        let user = define_user(&db);
        open(&db);
        unwrap_outcome(db.create_all(&cx).await);

        for (name, age) in [("ann", 15), ("bob", 25), ("cid", 35)] {
            let mut u = user.create(json!({"username": name, "age": age})).unwrap();
            unwrap_outcome(u.save(&cx).await);
        }
        let age = user.c("age").unwrap();

        let adult = unwrap_outcome(user.select(&cx, age.clone().ge(18)).await).unwrap();
        assert_eq!(adult.get_as::<String>("username").unwrap(), "bob");

        let ordered = unwrap_outcome(
            user.select_all(&cx, None, Some(OrderBy::desc("age")))
                .await,
        );
        let names: Vec<String> = ordered
            .iter()
            .map(|u| u.get_as::<String>("username").unwrap())
            .collect();
        assert_eq!(names, vec!["cid", "bob", "ann"]);

        let raw = RawQuery::new("SELECT * FROM \"user\" WHERE username = :name").bind("name", "ann");
        let found = unwrap_outcome(user.select_raw(&cx, raw).await);
        assert_eq!(found.len(), 1);
        assert!(found[0].is_bound());

        assert_eq!(unwrap_outcome(user.count(&cx, Some(age.clone().gt(20))).await), 2);
        assert_eq!(unwrap_outcome(user.delete(&cx, age.gt(20)).await), 2);
        assert_eq!(unwrap_outcome(user.count(&cx, None).await), 1);
    });
}

#[test]
fn construction_validates_input() {
    let db: Db = Database::new("default");
    let user = define_user(&db);

    match user.create(json!({})).unwrap_err() {
        Error::Validation(err) => {
            assert!(
                err.errors
                    .iter()
                    .any(|e| e.field == "username" && e.kind == ValidationErrorKind::Required)
            );
            assert!(err.errors.iter().all(|e| e.field != "age"));
        }
        other => panic!("expected validation error, got {other:?}"),
    }

    let err = user.create(json!({"username": "a", "nope": 1})).unwrap_err();
    assert!(matches!(err, Error::Instance(InstanceError::InvalidColumn(ref c)) if c == "nope"));

    let u = user.create(json!({"username": "a"})).unwrap();
    assert_eq!(u.get_as::<i32>("balance").unwrap(), 100);
    assert!(matches!(
        u.get("missing").unwrap_err(),
        Error::Instance(InstanceError::NoSuchColumn(_))
    ));
}

#[test]
fn malformed_models_are_rejected() {
    let db: Db = Database::new("default");
    let id = || FieldDecl::new::<i64>("id").with(pkey());

    let err = db
        .define(ModelDecl::new("A").field(id()).field(FieldDecl::new::<i32>("__secret")))
        .unwrap_err();
    assert!(matches!(err, Error::Model(ModelError::PrivateField(_))));

    let err = db
        .define(ModelDecl::new("B").field(FieldDecl::new::<String>("name")))
        .unwrap_err();
    assert!(matches!(err, Error::Model(ModelError::NoPrimaryKey)));

    let err = db
        .define(
            ModelDecl::new("C")
                .field(id())
                .field(FieldDecl::new::<i64>("other").with(pkey())),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Model(ModelError::MultiplePrimaryKeys(_))));

    let err = db
        .define(ModelDecl::new("D").field(id()).field(FieldDecl::unannotated("loose")))
        .unwrap_err();
    assert!(matches!(err, Error::Model(ModelError::UnannotatedField(_))));

    let err = db
        .define(
            ModelDecl::new("E")
                .abstract_model()
                .relation(RelationDecl::many_to_many("tags", "Tag", "e_tags")),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Model(ModelError::AbstractModelRelation)));

    let err = db
        .define(
            ModelDecl::new("F")
                .field(id())
                .field(FieldDecl::new::<i64>("blob").with((int64(), json()))),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Model(ModelError::MultipleTypes(_))));
}

#[test]
fn abstract_bases_contribute_columns() {
    let db: Db = Database::new("default");
    let base = db
        .define(
            ModelDecl::new("Base")
                .abstract_model()
                .field(FieldDecl::new::<i64>("id").with(pkey()))
                .field(FieldDecl::new::<Option<String>>("note")),
        )
        .unwrap();
    let err = base.create(json!({})).unwrap_err();
    assert!(matches!(err, Error::Instance(InstanceError::AbstractInstantiation)));

    let child = db
        .define(
            ModelDecl::new("ChildRecord")
                .extends(&base)
                .field(FieldDecl::new::<String>("name")),
        )
        .unwrap();
    assert_eq!(child.table_name(), Some("child_record"));
    let names: Vec<&str> = child.columns().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "note", "name"]);
    assert!(db.metadata().table("child_record").is_some());
}
