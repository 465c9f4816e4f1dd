//! Client, database and collection handles handed out by the registry.

use std::sync::Arc;

use bson::{Bson, Document};
use futures::StreamExt;

use crate::driver::{DocumentStream, DriverClient, DriverCollection, DriverDatabase, UpdateOutcome};
use crate::error::VeneerResult;
use crate::mutator::{DocumentMutator, DocumentWrapper, Namespace};

/// A live client for one alias.
pub struct Client {
    alias: String,
    inner: Arc<dyn DriverClient>,
    wrapper: Option<Arc<dyn DocumentWrapper>>,
}

impl Client {
    pub(crate) fn new(
        alias: impl Into<String>,
        inner: Arc<dyn DriverClient>,
        wrapper: Option<Arc<dyn DocumentWrapper>>,
    ) -> Self {
        Self {
            alias: alias.into(),
            inner,
            wrapper,
        }
    }

    /// Alias this client was built for.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The underlying driver client.
    pub fn inner(&self) -> &Arc<dyn DriverClient> {
        &self.inner
    }

    pub(crate) fn wrapper(&self) -> Option<Arc<dyn DocumentWrapper>> {
        self.wrapper.clone()
    }

    pub(crate) async fn close(&self) {
        self.inner.close().await;
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("alias", &self.alias)
            .field("wrapped", &self.wrapper.is_some())
            .finish()
    }
}

/// A database handle with its post-connect mutators attached.
pub struct Database {
    alias: String,
    inner: Arc<dyn DriverDatabase>,
    mutators: Vec<Arc<dyn DocumentMutator>>,
    wrapper: Option<Arc<dyn DocumentWrapper>>,
}

impl Database {
    pub(crate) fn new(
        alias: impl Into<String>,
        inner: Arc<dyn DriverDatabase>,
        mutators: Vec<Arc<dyn DocumentMutator>>,
        wrapper: Option<Arc<dyn DocumentWrapper>>,
    ) -> Self {
        Self {
            alias: alias.into(),
            inner,
            mutators,
            wrapper,
        }
    }

    /// Alias this database belongs to.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Database name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Number of mutators attached to this handle.
    pub fn mutator_count(&self) -> usize {
        self.mutators.len()
    }

    /// Get a collection by name.
    pub fn collection(self: &Arc<Self>, name: &str) -> Collection {
        Collection {
            database: Arc::clone(self),
            inner: self.inner.collection(name),
        }
    }

    fn incoming(&self, collection: &str, mut document: Document) -> VeneerResult<Document> {
        let ns = Namespace {
            database: self.name(),
            collection,
        };
        for mutator in &self.mutators {
            document = mutator.incoming(document, ns)?;
        }
        Ok(document)
    }

    fn outgoing(&self, collection: &str, mut document: Document) -> VeneerResult<Document> {
        let ns = Namespace {
            database: self.name(),
            collection,
        };
        for mutator in self.mutators.iter().rev() {
            document = mutator.outgoing(document, ns)?;
        }
        match &self.wrapper {
            Some(wrapper) => wrapper.wrap(document),
            None => Ok(document),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("alias", &self.alias)
            .field("name", &self.name())
            .field("mutators", &self.mutators.len())
            .finish()
    }
}

/// A collection within a [`Database`], applying its mutators and wrapper.
#[derive(Clone)]
pub struct Collection {
    database: Arc<Database>,
    inner: Arc<dyn DriverCollection>,
}

impl Collection {
    /// Collection name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// The database this collection belongs to.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Insert one document, returning its `_id`.
    pub async fn insert_one(&self, document: Document) -> VeneerResult<Bson> {
        let document = self.database.incoming(self.name(), document)?;
        self.inner.insert_one(document).await
    }

    /// Update the first matching document.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> VeneerResult<Option<UpdateOutcome>> {
        self.inner.update_one(filter, update).await
    }

    /// Delete every matching document.
    pub async fn delete_many(&self, filter: Document) -> VeneerResult<Option<u64>> {
        self.inner.delete_many(filter).await
    }

    /// Find the first matching document.
    pub async fn find_one(&self, filter: Document) -> VeneerResult<Option<Document>> {
        match self.inner.find_one(filter).await? {
            Some(document) => self.database.outgoing(self.name(), document).map(Some),
            None => Ok(None),
        }
    }

    /// Find matching documents as a lazy stream.
    pub async fn find(
        &self,
        filter: Document,
        skip: u64,
        limit: Option<i64>,
    ) -> VeneerResult<DocumentStream> {
        let stream = self.inner.find(filter, skip, limit).await?;
        let database = Arc::clone(&self.database);
        let collection = self.name().to_string();
        Ok(stream
            .map(move |item| item.and_then(|doc| database.outgoing(&collection, doc)))
            .boxed())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("database", &self.database.name())
            .field("name", &self.name())
            .finish()
    }
}
