//! Named database handles.
//!
//! A [`Database`] pairs one executor with the schema registry of the models
//! declared against it. Its lifecycle is explicit:
//!
//! ```ignore
//! let db = Database::new("default");
//! let user = db.define(ModelDecl::new("User").field(...))?;
//! db.init(SqliteConnection::open_memory()?)?;
//! db.connect(&cx).await;
//! db.create_all(&cx).await;
//! // ...
//! db.disconnect(&cx).await;
//! ```
//!
//! Models may be defined before the executor exists; only statements need it.
//! [`Connections`] is a caller-owned table of several such handles.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use asupersync::{Cx, Outcome};
use futures::future::join_all;
use sqlfox_core::{
    Connection, ConnectionConfig, ConnectionError, ConnectionErrorKind, Error, Result,
};

use crate::collect_outcomes;
use crate::model::Model;
use crate::registry::SchemaRegistry;
use crate::schema::{ModelDecl, synthesize};

/// Name of the connection models use unless they pick another.
pub const DEFAULT_CONNECTION: &str = "default";

/// One executor and its schema metadata.
pub struct Database<C: Connection> {
    name: String,
    registry: Arc<SchemaRegistry<C>>,
    executor: RwLock<Option<Arc<C>>>,
    config: RwLock<Option<ConnectionConfig>>,
}

impl<C: Connection> fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Database<C> {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            registry: Arc::new(SchemaRegistry::new()),
            executor: RwLock::new(None),
            config: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Install the executor. Allowed once.
    pub fn init(&self, executor: C) -> Result<()> {
        let mut slot = self.executor.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::already_initialized(&self.name));
        }
        *slot = Some(Arc::new(executor));
        tracing::info!(connection = %self.name, "Database initialized");
        Ok(())
    }

    /// Build the executor from `config` and install it.
    pub fn init_with<F>(&self, config: ConnectionConfig, factory: F) -> Result<()>
    where
        F: FnOnce(&ConnectionConfig) -> Result<C>,
    {
        if self.is_initialized() {
            return Err(Error::already_initialized(&self.name));
        }
        let executor = factory(&config)?;
        self.init(executor)?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The config passed to [`Database::init_with`], if any.
    pub fn config(&self) -> Option<ConnectionConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The executor.
    ///
    /// # Errors
    ///
    /// Not-initialized connection error before [`Database::init`].
    pub fn db(&self) -> Result<Arc<C>> {
        self.executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| Error::not_initialized(&self.name))
    }

    /// Schema metadata. Available before initialization so models can be
    /// declared first.
    pub fn metadata(&self) -> &Arc<SchemaRegistry<C>> {
        &self.registry
    }

    /// Build a model from its declaration and register it here.
    ///
    /// A declaration bound to a different connection is rejected.
    pub fn define(self: &Arc<Self>, decl: ModelDecl<C>) -> Result<Arc<Model<C>>> {
        if let Some(other) = decl.connection_name().filter(|n| *n != self.name) {
            tracing::debug!(
                model = %decl.name(),
                requested = %other,
                connection = %self.name,
                "Model declared for another connection"
            );
            return Err(Error::Connection(ConnectionError::new(
                ConnectionErrorKind::Unknown,
                format!(
                    "Model {:?} belongs to connection {other:?}, not {:?}",
                    decl.name(),
                    self.name
                ),
            )));
        }
        let schema = synthesize(decl)?;
        let model = Model::build(schema, Arc::downgrade(self));
        self.registry.register_model(Arc::clone(&model))?;
        Ok(model)
    }

    /// Resolve relations declared by name. Call once every model is defined.
    pub fn finalize_relations(&self) -> Result<()> {
        self.registry.finalize_relations()
    }

    #[tracing::instrument(level = "debug", skip(self, cx), fields(connection = %self.name))]
    pub async fn connect(&self, cx: &Cx) -> Outcome<(), Error> {
        let conn = try_result!(self.db());
        try_outcome!(conn.connect(cx).await);
        tracing::info!("Connected");
        Outcome::Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, cx), fields(connection = %self.name))]
    pub async fn disconnect(&self, cx: &Cx) -> Outcome<(), Error> {
        let conn = try_result!(self.db());
        try_outcome!(conn.disconnect(cx).await);
        tracing::info!("Disconnected");
        Outcome::Ok(())
    }

    /// Finalize relations, then create every registered table.
    pub async fn create_all(&self, cx: &Cx) -> Outcome<(), Error> {
        try_result!(self.finalize_relations());
        let conn = try_result!(self.db());
        self.registry.create_all(cx, &*conn).await
    }

    pub async fn drop_all(&self, cx: &Cx) -> Outcome<(), Error> {
        let conn = try_result!(self.db());
        self.registry.drop_all(cx, &*conn).await
    }
}

/// Caller-owned table of named databases.
///
/// The [`DEFAULT_CONNECTION`] entry always exists; others are created on
/// first [`register`](Connections::register).
pub struct Connections<C: Connection> {
    databases: RwLock<BTreeMap<String, Arc<Database<C>>>>,
}

impl<C: Connection> Default for Connections<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> fmt::Debug for Connections<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connections")
            .field("names", &self.names())
            .finish()
    }
}

impl<C: Connection> Connections<C> {
    pub fn new() -> Self {
        let mut databases = BTreeMap::new();
        databases.insert(
            DEFAULT_CONNECTION.to_string(),
            Database::new(DEFAULT_CONNECTION),
        );
        Self {
            databases: RwLock::new(databases),
        }
    }

    /// The database named `name`, created if absent.
    pub fn register(&self, name: &str) -> Arc<Database<C>> {
        let mut databases = self.databases.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Database::new(name)),
        )
    }

    /// Install the executor of `name`.
    pub fn init(&self, name: &str, executor: C) -> Result<()> {
        self.register(name).init(executor)
    }

    /// The database named `name`, initialized or not.
    pub fn database(&self, name: &str) -> Result<Arc<Database<C>>> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_initialized(name))
    }

    /// The executor of `name`.
    pub fn db(&self, name: &str) -> Result<Arc<C>> {
        self.database(name)?.db()
    }

    /// Schema metadata of an initialized database.
    pub fn metadata(&self, name: &str) -> Result<Arc<SchemaRegistry<C>>> {
        let database = self.database(name)?;
        if !database.is_initialized() {
            return Err(Error::not_initialized(name));
        }
        Ok(Arc::clone(database.metadata()))
    }

    /// Define a model on the connection it names, or the default one.
    pub fn define(&self, decl: ModelDecl<C>) -> Result<Arc<Model<C>>> {
        let name = decl
            .connection_name()
            .unwrap_or(DEFAULT_CONNECTION)
            .to_string();
        self.register(&name).define(decl)
    }

    pub fn finalize_relations(&self) -> Result<()> {
        for database in self.all() {
            database.finalize_relations()?;
        }
        Ok(())
    }

    /// Connect every initialized database concurrently.
    pub async fn connect_all(&self, cx: &Cx) -> Outcome<(), Error> {
        let databases = self.initialized();
        let outcomes = join_all(databases.iter().map(|db| db.connect(cx))).await;
        try_outcome!(collect_outcomes(outcomes));
        Outcome::Ok(())
    }

    pub async fn disconnect_all(&self, cx: &Cx) -> Outcome<(), Error> {
        let databases = self.initialized();
        let outcomes = join_all(databases.iter().map(|db| db.disconnect(cx))).await;
        try_outcome!(collect_outcomes(outcomes));
        Outcome::Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn all(&self) -> Vec<Arc<Database<C>>> {
        self.databases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn initialized(&self) -> Vec<Arc<Database<C>>> {
        self.all()
            .into_iter()
            .filter(|db| db.is_initialized())
            .collect()
    }
}
