//! Connection registry.
//!
//! The registry maps aliases to [`ConnectionSettings`] and lazily builds one
//! [`Client`] and one [`Database`] per alias from them. Each alias owns a
//! slot whose handles are built at most once, so concurrent first access never
//! builds two clients for the same alias. Building one alias never blocks
//! lookups of another.
//!
//! ```rust,ignore
//! let registry = Arc::new(Registry::new());
//! veneer_mongodb::register_mongodb(&registry);
//!
//! registry.register("default", "app", "mongodb", doc! { "host": "localhost" });
//! let db = registry.get_database("default", false).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bson::Document;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{ConnectionSettings, VeneerConfig};
use crate::driver::ClientFactory;
use crate::error::{VeneerError, VeneerResult};
use crate::handle::{Client, Database};
use crate::mutator::{DocumentMutator, DocumentWrapper, MutatorFactory, builtin_mutators};

/// Named factories for clients, mutators and document wrappers.
#[derive(Default)]
struct Catalog {
    clients: HashMap<String, Arc<dyn ClientFactory>>,
    mutators: HashMap<String, MutatorFactory>,
    wrappers: HashMap<String, Arc<dyn DocumentWrapper>>,
}

/// Live handles of one alias, each built at most once.
#[derive(Default)]
struct Slot {
    client: OnceCell<Arc<Client>>,
    database: OnceCell<Arc<Database>>,
}

/// Registry of connection settings and the handles built from them.
pub struct Registry {
    settings: RwLock<HashMap<String, Arc<ConnectionSettings>>>,
    catalog: RwLock<Catalog>,
    handles: RwLock<HashMap<String, Arc<Slot>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create a registry knowing only the built-in mutators.
    pub fn new() -> Self {
        let mut catalog = Catalog::default();
        for (name, factory) in builtin_mutators() {
            catalog.mutators.insert(name.to_string(), factory);
        }

        Self {
            settings: RwLock::new(HashMap::new()),
            catalog: RwLock::new(catalog),
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Make a client factory available under `kind`.
    pub fn register_client_factory(
        &self,
        kind: impl Into<String>,
        factory: impl ClientFactory + 'static,
    ) {
        self.catalog
            .write()
            .clients
            .insert(kind.into(), Arc::new(factory));
    }

    /// Make a mutator factory available under `name`.
    pub fn register_mutator<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Document) -> VeneerResult<Arc<dyn DocumentMutator>> + Send + Sync + 'static,
    {
        self.catalog
            .write()
            .mutators
            .insert(name.into(), Arc::new(factory));
    }

    /// Make a document wrapper available under `name`.
    pub fn register_wrapper(
        &self,
        name: impl Into<String>,
        wrapper: impl DocumentWrapper + 'static,
    ) {
        self.catalog
            .write()
            .wrappers
            .insert(name.into(), Arc::new(wrapper));
    }

    /// Register connection settings for `alias`.
    ///
    /// Existing settings are replaced. Live handles are left untouched until
    /// the alias is disconnected.
    pub fn register(
        &self,
        alias: impl Into<String>,
        database: impl Into<String>,
        client_kind: impl Into<String>,
        options: Document,
    ) {
        let mut settings = ConnectionSettings::new(database);
        settings.client_kind = client_kind.into();
        settings.options = options;
        self.register_settings(alias, settings);
    }

    /// Register complete connection settings for `alias`.
    pub fn register_settings(&self, alias: impl Into<String>, settings: ConnectionSettings) {
        let alias = alias.into();
        debug!(
            alias = %alias,
            database = %settings.database,
            client = %settings.client_kind,
            "Registering connection"
        );
        self.settings.write().insert(alias, Arc::new(settings));
    }

    /// Register every connection of a configuration.
    pub fn configure(&self, config: &VeneerConfig) {
        for (alias, settings) in &config.connections {
            self.register_settings(alias.clone(), settings.clone());
        }
    }

    /// The settings registered for `alias`.
    pub fn settings(&self, alias: &str) -> Option<Arc<ConnectionSettings>> {
        self.settings.read().get(alias).cloned()
    }

    /// Registered aliases, sorted.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.settings.read().keys().cloned().collect();
        aliases.sort();
        aliases
    }

    /// Whether a client is currently live for `alias`.
    pub async fn is_connected(&self, alias: &str) -> bool {
        self.handles
            .read()
            .get(alias)
            .is_some_and(|slot| slot.client.initialized())
    }

    /// Get the client for `alias`, building it if needed.
    ///
    /// With `force_reconnect` any live handles are closed first.
    pub async fn get_client(&self, alias: &str, force_reconnect: bool) -> VeneerResult<Arc<Client>> {
        if force_reconnect {
            self.disconnect(alias).await;
        }
        let slot = self.slot(alias)?;
        self.client_in(&slot, alias).await
    }

    /// Get the database for `alias`, building the client and database if needed.
    ///
    /// Configured mutators are attached once, when the handle is built.
    pub async fn get_database(
        &self,
        alias: &str,
        force_reconnect: bool,
    ) -> VeneerResult<Arc<Database>> {
        if force_reconnect {
            self.disconnect(alias).await;
        }
        let slot = self.slot(alias)?;
        let database = slot
            .database
            .get_or_try_init(|| self.build_database(&slot, alias))
            .await?;
        Ok(Arc::clone(database))
    }

    /// Register `alias` unless it is already connected, then return its client.
    pub async fn connect(
        &self,
        database: impl Into<String>,
        alias: &str,
        client_kind: impl Into<String>,
        options: Document,
    ) -> VeneerResult<Arc<Client>> {
        if !self.is_connected(alias).await {
            self.register(alias, database, client_kind, options);
        }
        self.get_client(alias, false).await
    }

    /// Close and forget the handles of `alias`. Does nothing if none are live.
    ///
    /// The handles are detached before the client is closed, so other aliases
    /// and new lookups of `alias` never wait on the shutdown.
    pub async fn disconnect(&self, alias: &str) {
        let slot = self.handles.write().remove(alias);
        let Some(client) = slot.as_ref().and_then(|slot| slot.client.get()) else {
            return;
        };
        client.close().await;
        info!(alias = %alias, "Client disconnected");
    }

    /// The handle slot of `alias`, created on first use.
    fn slot(&self, alias: &str) -> VeneerResult<Arc<Slot>> {
        if let Some(slot) = self.handles.read().get(alias) {
            return Ok(Arc::clone(slot));
        }
        self.require_settings(alias)?;
        let mut handles = self.handles.write();
        Ok(Arc::clone(handles.entry(alias.to_string()).or_default()))
    }

    async fn client_in(&self, slot: &Slot, alias: &str) -> VeneerResult<Arc<Client>> {
        let client = slot
            .client
            .get_or_try_init(|| self.build_client(alias))
            .await?;
        Ok(Arc::clone(client))
    }

    async fn build_database(&self, slot: &Slot, alias: &str) -> VeneerResult<Arc<Database>> {
        let client = self.client_in(slot, alias).await?;
        let settings = self.require_settings(alias)?;
        let mutators = self.build_mutators(alias, &settings)?;

        let database = Arc::new(Database::new(
            alias,
            client.inner().database(&settings.database),
            mutators,
            client.wrapper(),
        ));
        debug!(
            alias = %alias,
            database = %settings.database,
            mutators = database.mutator_count(),
            "Database handle created"
        );
        Ok(database)
    }

    async fn build_client(&self, alias: &str) -> VeneerResult<Arc<Client>> {
        let settings = self.require_settings(alias)?;
        let (factory, wrapper) = {
            let catalog = self.catalog.read();
            let factory = catalog
                .clients
                .get(&settings.client_kind)
                .cloned()
                .ok_or_else(|| {
                    VeneerError::connection(
                        alias,
                        format!("unknown client kind '{}'", settings.client_kind),
                    )
                })?;
            let wrapper = match &settings.document_class {
                Some(name) => Some(catalog.wrappers.get(name).cloned().ok_or_else(|| {
                    VeneerError::connection(alias, format!("unknown document class '{}'", name))
                })?),
                None => None,
            };
            (factory, wrapper)
        };

        let inner = factory
            .connect(&settings.options)
            .await
            .map_err(|e| VeneerError::connection_caused_by(alias, "client construction failed", e))?;

        info!(
            alias = %alias,
            client = %settings.client_kind,
            "Client created"
        );
        Ok(Arc::new(Client::new(alias, inner, wrapper)))
    }

    fn require_settings(&self, alias: &str) -> VeneerResult<Arc<ConnectionSettings>> {
        self.settings(alias).ok_or_else(|| {
            VeneerError::connection(
                alias,
                format!("connection with alias \"{}\" has not been defined", alias),
            )
        })
    }

    fn build_mutators(
        &self,
        alias: &str,
        settings: &ConnectionSettings,
    ) -> VeneerResult<Vec<Arc<dyn DocumentMutator>>> {
        let catalog = self.catalog.read();
        settings
            .mutators
            .iter()
            .map(|m| {
                let factory = catalog.mutators.get(&m.name).ok_or_else(|| {
                    VeneerError::connection(alias, format!("unknown mutator '{}'", m.name))
                })?;
                (**factory)(&m.options).map_err(|e| {
                    VeneerError::connection_caused_by(
                        alias,
                        format!("cannot build mutator '{}'", m.name),
                        e,
                    )
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("aliases", &self.aliases())
            .finish()
    }
}
