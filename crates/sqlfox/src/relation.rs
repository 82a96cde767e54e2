//! Many-to-many and one-to-many relations.
//!
//! A relation is declared once per model ([`RelationDecl`]), resolved once
//! per registry ([`RelationSpec`]), and materialized once per instance
//! ([`Relation`]). The per-instance side keeps a local cache of fetched
//! objects plus a map of pending changes that [`Relation::save`] flushes.
//!
//! Membership changes are local until saved:
//!
//! ```ignore
//! let tags = post.relation_mut("tags")?;
//! tags.add(&rust)?;
//! tags.delete(&sql)?.save(&cx).await;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use asupersync::{Cx, Outcome};
use futures::future::join_all;
use sqlfox_core::{Connection, Error, InstanceError, ModelError, RelationError, Result, Value};
use sqlfox_query::{Delete, Expr, Insert, OrderBy, Select, Statement, Update};

use crate::hash_list::{AsKey, HashList};
use crate::model::{Instance, Model};
use crate::registry::{AssociationTable, SchemaRegistry};
use crate::collect_outcomes;

/// How a relation is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// Through a junction table named `via`.
    ManyToMany { via: String },
    /// Through a foreign-key column `fkey` on the target table.
    OneToMany { fkey: String },
}

/// The other side of a relation, by name until finalized.
pub enum RelationTarget<C: Connection> {
    Name(String),
    Model(Weak<Model<C>>),
}

impl<C: Connection> Clone for RelationTarget<C> {
    fn clone(&self) -> Self {
        match self {
            RelationTarget::Name(name) => RelationTarget::Name(name.clone()),
            RelationTarget::Model(model) => RelationTarget::Model(Weak::clone(model)),
        }
    }
}

impl<C: Connection> fmt::Debug for RelationTarget<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationTarget::Name(name) => f.debug_tuple("Name").field(name).finish(),
            RelationTarget::Model(model) => f
                .debug_tuple("Model")
                .field(&model.upgrade().map(|m| m.name().to_string()))
                .finish(),
        }
    }
}

impl<C: Connection> fmt::Display for RelationTarget<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationTarget::Name(name) => f.write_str(name),
            RelationTarget::Model(model) => match model.upgrade() {
                Some(model) => f.write_str(model.name()),
                None => f.write_str("<dropped>"),
            },
        }
    }
}

impl<C: Connection> From<&str> for RelationTarget<C> {
    fn from(name: &str) -> Self {
        RelationTarget::Name(name.to_string())
    }
}

impl<C: Connection> From<String> for RelationTarget<C> {
    fn from(name: String) -> Self {
        RelationTarget::Name(name)
    }
}

impl<C: Connection> From<&Arc<Model<C>>> for RelationTarget<C> {
    fn from(model: &Arc<Model<C>>) -> Self {
        RelationTarget::Model(Arc::downgrade(model))
    }
}

/// A relation as declared on a model.
pub struct RelationDecl<C: Connection> {
    name: String,
    kind: RelationKind,
    target: RelationTarget<C>,
}

impl<C: Connection> RelationDecl<C> {
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<RelationTarget<C>>,
        via: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::ManyToMany { via: via.into() },
            target: target.into(),
        }
    }

    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<RelationTarget<C>>,
        fkey: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::OneToMany { fkey: fkey.into() },
            target: target.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &RelationKind {
        &self.kind
    }

    pub fn target(&self) -> &RelationTarget<C> {
        &self.target
    }
}

impl<C: Connection> fmt::Debug for RelationDecl<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("target", &self.target)
            .finish()
    }
}

/// Resolved storage of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    ManyToMany(AssociationTable),
    OneToMany { fkey: String },
}

struct Resolved<C: Connection> {
    target: Weak<Model<C>>,
    link: Link,
}

/// A relation declaration bound to its owning model.
pub struct RelationSpec<C: Connection> {
    owner: String,
    decl: RelationDecl<C>,
    resolved: OnceLock<Resolved<C>>,
}

impl<C: Connection> fmt::Debug for RelationSpec<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationSpec")
            .field("owner", &self.owner)
            .field("decl", &self.decl)
            .field("link", &self.resolved.get().map(|r| &r.link))
            .finish()
    }
}

impl<C: Connection> RelationSpec<C> {
    pub(crate) fn new(owner: impl Into<String>, decl: RelationDecl<C>) -> Self {
        Self {
            owner: owner.into(),
            decl,
            resolved: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn decl(&self) -> &RelationDecl<C> {
        &self.decl
    }

    pub fn is_initialized(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Resolve the target and the storage link.
    pub(crate) fn initialize(&self, registry: &SchemaRegistry<C>, owner: &Model<C>) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let unresolved = || {
            Error::Model(ModelError::UnresolvedTarget {
                relation: format!("{}.{}", self.owner, self.decl.name),
                target: self.decl.target.to_string(),
            })
        };
        let target = match &self.decl.target {
            RelationTarget::Name(name) => registry.model(name),
            RelationTarget::Model(model) => model.upgrade(),
        }
        .ok_or_else(unresolved)?;
        let target_table = target.table_def().ok_or_else(unresolved)?;

        let link = match &self.decl.kind {
            RelationKind::ManyToMany { via } => {
                let owner_table = owner.table()?;
                Link::ManyToMany(registry.association_table(via, owner_table, target_table)?)
            }
            RelationKind::OneToMany { fkey } => {
                if target_table.column(fkey).is_none() {
                    return Err(Error::Model(ModelError::InvalidForeignKey(format!(
                        "{}.{fkey}",
                        target_table.name
                    ))));
                }
                Link::OneToMany { fkey: fkey.clone() }
            }
        };
        tracing::debug!(
            relation = %self.decl.name,
            owner = %self.owner,
            target = %target.name(),
            "Resolved relation"
        );
        // A concurrent finalize may have won; both computed the same link.
        let _ = self.resolved.set(Resolved {
            target: Arc::downgrade(&target),
            link,
        });
        Ok(())
    }

    fn resolved(&self) -> Result<&Resolved<C>> {
        self.resolved
            .get()
            .ok_or_else(|| Error::Relation(RelationError::Uninitialized(self.decl.name.clone())))
    }

    pub fn target(&self) -> Result<Arc<Model<C>>> {
        self.resolved()?
            .target
            .upgrade()
            .ok_or_else(|| Error::Relation(RelationError::Uninitialized(self.decl.name.clone())))
    }

    pub fn link(&self) -> Result<&Link> {
        Ok(&self.resolved()?.link)
    }
}

/// Primary key of the owning instance, shared with its relations.
#[derive(Debug, Clone, Default)]
pub(crate) struct IdCell(Arc<Mutex<Option<i64>>>);

impl IdCell {
    pub(crate) fn new(id: Option<i64>) -> Self {
        Self(Arc::new(Mutex::new(id)))
    }

    pub(crate) fn get(&self) -> Option<i64> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set(&self, id: Option<i64>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }
}

/// Lifecycle of a per-instance relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationState {
    /// The declaration has not been resolved yet.
    Uninitialized,
    /// Resolved, but the owner has no primary key.
    Initialized,
    /// The owner is persisted; nothing fetched yet.
    Bound,
    /// The local collection is loaded.
    Fetched,
}

/// A relation attached to one instance.
pub struct Relation<C: Connection> {
    spec: Arc<RelationSpec<C>>,
    owner: IdCell,
    objects: Option<HashList<Instance<C>>>,
    modified: BTreeMap<i64, bool>,
}

impl<C: Connection> fmt::Debug for Relation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.spec.name())
            .field("state", &self.state())
            .field("objects", &self.objects.as_ref().map(HashList::keys))
            .field("modified", &self.modified)
            .finish()
    }
}

/// Returned by [`Relation::add`] and [`Relation::delete`] to flush immediately.
pub struct DeferredSave<'a, C: Connection> {
    relation: &'a mut Relation<C>,
}

impl<C: Connection> DeferredSave<'_, C> {
    /// Flush every pending change of the relation.
    pub async fn save(self, cx: &Cx) -> Outcome<(), Error> {
        self.relation.save(cx).await
    }
}

impl<C: Connection> Relation<C> {
    pub(crate) fn new(spec: Arc<RelationSpec<C>>, owner: IdCell) -> Self {
        Self {
            spec,
            owner,
            objects: None,
            modified: BTreeMap::new(),
        }
    }

    /// Copy of this relation owned by another instance.
    pub(crate) fn clone_for(&self, owner: IdCell) -> Self {
        Self {
            spec: Arc::clone(&self.spec),
            owner,
            objects: self.objects.clone(),
            modified: self.modified.clone(),
        }
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &Arc<RelationSpec<C>> {
        &self.spec
    }

    pub fn state(&self) -> RelationState {
        if !self.spec.is_initialized() {
            RelationState::Uninitialized
        } else if self.objects.is_some() {
            RelationState::Fetched
        } else if self.owner.get().is_some() {
            RelationState::Bound
        } else {
            RelationState::Initialized
        }
    }

    pub fn target(&self) -> Result<Arc<Model<C>>> {
        self.spec.target()
    }

    /// Pending changes: target id → `true` to add, `false` to remove.
    pub fn pending(&self) -> &BTreeMap<i64, bool> {
        &self.modified
    }

    fn owner_id(&self) -> Result<i64> {
        self.owner.get().ok_or(Error::Instance(InstanceError::Unbound))
    }

    fn objects(&self) -> Result<&HashList<Instance<C>>> {
        self.spec.resolved()?;
        self.objects
            .as_ref()
            .ok_or_else(|| Error::Relation(RelationError::NotFetched(self.name().to_string())))
    }

    fn check_target(&self, object: &Instance<C>) -> Result<i64> {
        let target = self.target()?;
        if !Arc::ptr_eq(&target, object.model()) {
            return Err(Error::Relation(RelationError::TargetMismatch {
                expected: target.name().to_string(),
                got: object.model().name().to_string(),
            }));
        }
        self.owner_id()?;
        object.id().ok_or(Error::Instance(InstanceError::Unbound))
    }

    /// Queue `object` for linking and add it to the local collection.
    pub fn add(&mut self, object: &Instance<C>) -> Result<DeferredSave<'_, C>> {
        let id = self.check_target(object)?;
        if let Some(objects) = &mut self.objects {
            objects.push(object.clone());
        }
        self.modified.insert(id, true);
        Ok(DeferredSave { relation: self })
    }

    /// Queue `object` for unlinking and drop it from the local collection.
    ///
    /// Deleting an object that is not in the local collection only queues
    /// the unlink, like adding one that is already there.
    pub fn delete(&mut self, object: &Instance<C>) -> Result<DeferredSave<'_, C>> {
        let id = self.check_target(object)?;
        if let Some(objects) = &mut self.objects {
            if objects.contains(id) {
                objects.remove(id)?;
            }
        }
        self.modified.insert(id, false);
        Ok(DeferredSave { relation: self })
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.objects()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.objects()?.is_empty())
    }

    /// Membership by id or by instance.
    pub fn contains<K: AsKey>(&self, key: K) -> Result<bool> {
        Ok(self.objects()?.contains(key))
    }

    /// Object at `position` in fetch order.
    pub fn get(&self, position: usize) -> Result<Option<&Instance<C>>> {
        Ok(self.objects()?.get(position))
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<&Instance<C>>> {
        Ok(self.objects()?.get_by_key(id))
    }

    pub fn iter(&self) -> Result<std::slice::Iter<'_, Instance<C>>> {
        Ok(self.objects()?.iter())
    }

    pub fn ids(&self) -> Result<Vec<i64>> {
        Ok(self.objects()?.keys())
    }

    /// Objects present in both relations, in `self`'s order.
    pub fn intersection(&self, other: &Relation<C>) -> Result<HashList<Instance<C>>> {
        self.check_compatible(other)?;
        Ok(self.objects()?.intersection(other.objects()?))
    }

    /// Objects present in either relation.
    pub fn union(&self, other: &Relation<C>) -> Result<HashList<Instance<C>>> {
        self.check_compatible(other)?;
        Ok(self.objects()?.union(other.objects()?))
    }

    fn check_compatible(&self, other: &Relation<C>) -> Result<()> {
        let (mine, theirs) = (self.target()?, other.target()?);
        if Arc::ptr_eq(&mine, &theirs) {
            Ok(())
        } else {
            Err(Error::Relation(RelationError::TargetMismatch {
                expected: mine.name().to_string(),
                got: theirs.name().to_string(),
            }))
        }
    }

    /// Ids of the related rows currently stored.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(relation = %self.name()))]
    pub async fn fetch_ids(&self, cx: &Cx) -> Outcome<Vec<i64>, Error> {
        let owner = try_result!(self.owner_id());
        let target = try_result!(self.target());
        let conn = try_result!(target.executor());
        let select = match try_result!(self.spec.link()) {
            Link::ManyToMany(mid) => Select::from(&mid.name)
                .columns([Expr::col(&mid.other_column)])
                .filter(Expr::col(&mid.this_column).eq(owner))
                .order_by(OrderBy::asc(mid.other_column.as_str())),
            Link::OneToMany { fkey } => {
                let table = try_result!(target.table());
                let pk = try_result!(target.primary_key());
                Select::from(&table.name)
                    .columns([pk.expr()])
                    .filter(Expr::col(fkey).eq(owner))
                    .order_by(OrderBy::asc(pk.name.as_str()))
            }
        };
        let rows = try_outcome!(select.fetch_all(cx, &*conn).await);
        Outcome::Ok(
            rows.iter()
                .filter_map(|row| row.get(0).and_then(Value::as_i64))
                .collect(),
        )
    }

    /// Load every related object into the local collection.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(relation = %self.name()))]
    pub async fn fetch(&mut self, cx: &Cx) -> Outcome<(), Error> {
        let ids = try_outcome!(self.fetch_ids(cx).await);
        let target = try_result!(self.target());
        let loads = join_all(ids.iter().map(|&id| target.get(cx, id))).await;
        let loaded = try_outcome!(collect_outcomes(loads));

        let mut objects = HashList::new();
        for (id, instance) in ids.iter().zip(loaded) {
            match instance {
                Some(instance) => {
                    objects.push(instance);
                }
                None => tracing::warn!(id, "Related row disappeared during fetch"),
            }
        }
        tracing::debug!(count = objects.len(), "Fetched relation");
        self.objects = Some(objects);
        Outcome::Ok(())
    }

    /// Flush pending changes concurrently.
    ///
    /// Additions already present and removals already absent are skipped.
    /// Pending changes are kept unless every flush succeeds.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(relation = %self.name()))]
    pub async fn save(&mut self, cx: &Cx) -> Outcome<(), Error> {
        if self.modified.is_empty() {
            return Outcome::Ok(());
        }
        let owner = try_result!(self.owner_id());
        let target = try_result!(self.target());
        let link = try_result!(self.spec.link());
        let conn = try_result!(target.executor());

        let flushes = self
            .modified
            .iter()
            .map(|(&id, &add)| flush_one(cx, &*conn, link, &target, owner, id, add));
        let outcomes = join_all(flushes).await;
        try_outcome!(collect_outcomes(outcomes));

        tracing::debug!(count = self.modified.len(), "Flushed relation");
        self.modified.clear();
        Outcome::Ok(())
    }

    /// Number of related rows, counted by the database.
    #[tracing::instrument(level = "debug", skip(self, cx), fields(relation = %self.name()))]
    pub async fn count(&self, cx: &Cx) -> Outcome<u64, Error> {
        let owner = try_result!(self.owner_id());
        let target = try_result!(self.target());
        let conn = try_result!(target.executor());
        let select = match try_result!(self.spec.link()) {
            Link::ManyToMany(mid) => {
                Select::count(&mid.name).filter(Expr::col(&mid.this_column).eq(owner))
            }
            Link::OneToMany { fkey } => {
                let table = try_result!(target.table());
                Select::count(&table.name).filter(Expr::col(fkey).eq(owner))
            }
        };
        let count = try_outcome!(select.fetch_scalar(cx, &*conn).await)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        Outcome::Ok(u64::try_from(count).unwrap_or(0))
    }
}

async fn flush_one<C: Connection>(
    cx: &Cx,
    conn: &C,
    link: &Link,
    target: &Model<C>,
    owner: i64,
    id: i64,
    add: bool,
) -> Outcome<(), Error> {
    let (probe, change): (Select, Statement) = match link {
        Link::ManyToMany(mid) => {
            let this = Expr::col(&mid.this_column).eq(owner);
            let other = Expr::col(&mid.other_column).eq(id);
            let probe = Select::count(&mid.name)
                .filter(this.clone())
                .filter(other.clone());
            let change = if add {
                Insert::into(&mid.name)
                    .value(&mid.this_column, owner)
                    .value(&mid.other_column, id)
                    .into()
            } else {
                Delete::from(&mid.name).filter(this).filter(other).into()
            };
            (probe, change)
        }
        Link::OneToMany { fkey } => {
            let table = try_result!(target.table());
            let pk = try_result!(target.primary_key());
            let is_target = pk.expr().eq(id);
            let is_owned = Expr::col(fkey).eq(owner);
            let probe = Select::count(&table.name)
                .filter(is_target.clone())
                .filter(is_owned.clone());
            let change = if add {
                Update::table(&table.name)
                    .set(fkey, owner)
                    .filter(is_target)
                    .into()
            } else {
                Update::table(&table.name)
                    .set(fkey, Value::Null)
                    .filter(is_target)
                    .filter(is_owned)
                    .into()
            };
            (probe, change)
        }
    };

    let present = try_outcome!(probe.fetch_scalar(cx, conn).await)
        .and_then(|v| v.as_i64())
        .is_some_and(|n| n > 0);
    if present == add {
        return Outcome::Ok(());
    }
    let (sql, params) = change.build(conn.dialect());
    tracing::trace!(sql = %sql, id, add, "Flushing relation change");
    try_outcome!(conn.execute(cx, &sql, &params).await);
    Outcome::Ok(())
}

impl<C: Connection> BitAnd for &Relation<C> {
    type Output = Result<HashList<Instance<C>>>;

    fn bitand(self, other: Self) -> Self::Output {
        self.intersection(other)
    }
}

impl<C: Connection> BitOr for &Relation<C> {
    type Output = Result<HashList<Instance<C>>>;

    fn bitor(self, other: Self) -> Self::Output {
        self.union(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::pkey;
    use crate::schema::{FieldDecl, ModelDecl};
    use crate::testing::{MockConnection, block_on, id_rows, scalar_row, unwrap_outcome};
    use crate::Database;
    use sqlfox_core::Row;

    fn setup() -> (Arc<Database<MockConnection>>, Arc<Model<MockConnection>>, Arc<Model<MockConnection>>) {
        let db = Database::new("default");
        let a = db
            .define(
                ModelDecl::new("A")
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .relation(RelationDecl::many_to_many("bs", "B", "a_b")),
            )
            .unwrap();
        let b = db
            .define(
                ModelDecl::new("B")
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .relation(RelationDecl::one_to_many("cs", "C", "b_id")),
            )
            .unwrap();
        db.define(
            ModelDecl::new("C")
                .field(FieldDecl::new::<i64>("id").with(pkey()))
                .field(FieldDecl::new::<Option<i64>>("b_id")),
        )
        .unwrap();
        db.init(MockConnection::new()).unwrap();
        (db, a, b)
    }

    fn bound(model: &Arc<Model<MockConnection>>, id: i64) -> Instance<MockConnection> {
        model
            .from_row(&Row::new(vec!["id".into()], vec![Value::BigInt(id)]))
            .unwrap()
    }

    #[test]
    fn uninitialized_relation() {
        let db = Database::<MockConnection>::new("default");
        let a = db
            .define(
                ModelDecl::new("A")
                    .field(FieldDecl::new::<i64>("id").with(pkey()))
                    .relation(RelationDecl::many_to_many("bs", "B", "a_b")),
            )
            .unwrap();
        let inst = bound(&a, 1);
        let rel = inst.relation("bs").unwrap();
        assert_eq!(rel.state(), RelationState::Uninitialized);
        assert!(matches!(
            rel.len(),
            Err(Error::Relation(RelationError::Uninitialized(_)))
        ));
    }

    #[test]
    fn states_and_not_fetched() {
        let (db, a, _) = setup();
        db.finalize_relations().unwrap();
        let fresh = a.create(serde_json::json!({})).unwrap();
        assert_eq!(fresh.relation("bs").unwrap().state(), RelationState::Initialized);
        let inst = bound(&a, 1);
        let rel = inst.relation("bs").unwrap();
        assert_eq!(rel.state(), RelationState::Bound);
        assert!(matches!(
            rel.contains(1),
            Err(Error::Relation(RelationError::NotFetched(_)))
        ));
    }

    #[test]
    fn add_checks_target_model() {
        let (db, a, b) = setup();
        db.finalize_relations().unwrap();
        let mut inst = bound(&a, 1);
        let other_a = bound(&a, 2);
        let err = inst.relation_mut("bs").unwrap().add(&other_a).err().unwrap();
        assert!(matches!(
            err,
            Error::Relation(RelationError::TargetMismatch { ref expected, ref got })
                if expected == "B" && got == "A"
        ));
        let b1 = bound(&b, 1);
        inst.relation_mut("bs").unwrap().add(&b1).unwrap();
        assert_eq!(inst.relation("bs").unwrap().pending().get(&1), Some(&true));
    }

    #[test]
    fn unsaved_owner_cannot_link() {
        let (db, a, b) = setup();
        db.finalize_relations().unwrap();
        let mut draft = a.create(serde_json::json!({})).unwrap();
        let b1 = bound(&b, 1);
        let rel = draft.relation_mut("bs").unwrap();
        let err = rel.add(&b1).err().unwrap();
        assert!(matches!(err, Error::Instance(InstanceError::Unbound)));
        let err = rel.delete(&b1).err().unwrap();
        assert!(matches!(err, Error::Instance(InstanceError::Unbound)));
        assert!(rel.pending().is_empty());
    }

    #[test]
    fn save_skips_links_already_present() {
        let (db, a, b) = setup();
        db.finalize_relations().unwrap();
        let conn = db.db().unwrap();
        let mut inst = bound(&a, 1);
        let (b1, b2) = (bound(&b, 1), bound(&b, 2));
        {
            let rel = inst.relation_mut("bs").unwrap();
            rel.add(&b1).unwrap();
            rel.add(&b2).unwrap();
        }
        // b1 already linked, b2 not.
        conn.push_rows(vec![scalar_row(1)]);
        conn.push_rows(vec![scalar_row(0)]);
        block_on(|cx| async move {
            unwrap_outcome(inst.relation_mut("bs").unwrap().save(&cx).await);
            assert!(inst.relation("bs").unwrap().pending().is_empty());
            let inserts: Vec<_> = conn
                .statements()
                .into_iter()
                .filter(|(sql, _)| sql.starts_with("INSERT"))
                .collect();
            assert_eq!(inserts.len(), 1);
            assert_eq!(inserts[0].0, "INSERT INTO \"a_b\" (\"a_id\", \"b_id\") VALUES (?1, ?2)");
            assert_eq!(inserts[0].1, vec![Value::BigInt(1), Value::BigInt(2)]);
        });
    }

    #[test]
    fn fetch_then_local_membership() {
        let (db, a, _) = setup();
        db.finalize_relations().unwrap();
        let conn = db.db().unwrap();
        let mut inst = bound(&a, 1);
        conn.push_rows(id_rows("b_id", &[2, 3]));
        conn.push_rows(id_rows("id", &[2]));
        conn.push_rows(id_rows("id", &[3]));
        block_on(|cx| async move {
            let rel = inst.relation_mut("bs").unwrap();
            unwrap_outcome(rel.fetch(&cx).await);
            assert_eq!(rel.state(), RelationState::Fetched);
            assert_eq!(rel.ids().unwrap(), vec![2, 3]);
            assert!(rel.contains(3).unwrap());
            let missing = bound(&rel.target().unwrap(), 9);
            rel.delete(&missing).unwrap();
            rel.delete(&missing).unwrap();
            assert_eq!(rel.ids().unwrap(), vec![2, 3]);
            assert_eq!(rel.pending().get(&9), Some(&false));
            let three = bound(&rel.target().unwrap(), 3);
            rel.delete(&three).unwrap();
            rel.delete(&three).unwrap();
            assert_eq!(rel.ids().unwrap(), vec![2]);
        });
    }

    #[test]
    fn one_to_many_flush_updates_foreign_key() {
        let (db, _, b) = setup();
        db.finalize_relations().unwrap();
        let conn = db.db().unwrap();
        let c = db.metadata().model("C").unwrap();
        let mut owner = bound(&b, 5);
        let child = bound(&c, 7);
        conn.push_rows(vec![scalar_row(0)]);
        block_on(|cx| async move {
            let save = owner.relation_mut("cs").unwrap().add(&child).unwrap();
            unwrap_outcome(save.save(&cx).await);
            let last = conn.statements().pop().unwrap();
            assert_eq!(last.0, "UPDATE \"c\" SET \"b_id\" = ?1 WHERE \"id\" = ?2");
            assert_eq!(last.1, vec![Value::BigInt(5), Value::BigInt(7)]);
        });
    }

    #[test]
    fn set_algebra_requires_same_target() {
        let (db, a, b) = setup();
        db.finalize_relations().unwrap();
        let a1 = bound(&a, 1);
        let b1 = bound(&b, 1);
        let err = (a1.relation("bs").unwrap() & b1.relation("cs").unwrap()).unwrap_err();
        assert!(matches!(err, Error::Relation(RelationError::TargetMismatch { .. })));
    }
}
