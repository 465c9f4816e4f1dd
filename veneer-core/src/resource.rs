//! Resources: static bindings of a collection to an aliased database.
//!
//! A resource forwards CRUD calls to the driver and takes care of the
//! repetitive parts: coercing ids, attaching shard labels, resolving the
//! collection through the registry and retrying on lost connections.
//! It does no type mapping; documents go in and come out as [`Document`]s.
//!
//! ```rust,ignore
//! const USERS: ResourceSpec = ResourceSpec::new("users")
//!     .alias("accounts")
//!     .retries(2)
//!     .delay(Duration::from_millis(10))
//!     .shard(ShardSpec::object_id("shard"));
//!
//! let users = Resource::new(USERS, registry.clone());
//! let id = users.insert(doc! { "name": "Alice" }).await?;
//! let user = users.find_one(id, None).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bson::{Bson, Document};
use futures::TryStreamExt;
use tracing::debug;

use crate::config::DEFAULT_ALIAS;
use crate::driver::DocumentStream;
use crate::error::{VeneerError, VeneerResult};
use crate::handle::Collection;
use crate::id::{ID_FIELD, IdGenerator, IdType, id_key, new_object_id};
use crate::query::{add_shard, coerce_all, make_in_spec, make_spec};
use crate::registry::Registry;
use crate::retry::{DEFAULT_DELAY, RetryPolicy};
use crate::shard::ShardSpec;
use crate::updater::{Updater, set_updater};

/// Page size used by [`Resource::find_page`].
pub const DEFAULT_LIMIT: i64 = 10;

/// The static description of a resource.
///
/// All setters are `const`, so a spec can be declared once as a constant.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSpec {
    collection: &'static str,
    alias: &'static str,
    id_type: IdType,
    id_generator: IdGenerator,
    retry: RetryPolicy,
    shard: Option<ShardSpec>,
}

impl ResourceSpec {
    /// A spec for `collection` on the default alias, with ObjectId ids and no retries.
    pub const fn new(collection: &'static str) -> Self {
        Self {
            collection,
            alias: DEFAULT_ALIAS,
            id_type: IdType::ObjectId,
            id_generator: new_object_id,
            retry: RetryPolicy::new(0, DEFAULT_DELAY),
            shard: None,
        }
    }

    /// Use the connection registered under `alias`.
    pub const fn alias(mut self, alias: &'static str) -> Self {
        self.alias = alias;
        self
    }

    /// Coerce ids to `id_type`.
    pub const fn id_type(mut self, id_type: IdType) -> Self {
        self.id_type = id_type;
        self
    }

    /// Generate ids for inserts without one using `generator`.
    pub const fn id_generator(mut self, generator: IdGenerator) -> Self {
        self.id_generator = generator;
        self
    }

    /// Retry this many times after a lost connection.
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retry.retries = retries;
        self
    }

    /// Backoff base between retries.
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.retry.delay = delay;
        self
    }

    /// Attach a shard label to every query and inserted document.
    pub const fn shard(mut self, shard: ShardSpec) -> Self {
        self.shard = Some(shard);
        self
    }

    /// Collection name.
    pub fn collection_name(&self) -> &'static str {
        self.collection
    }

    /// Connection alias.
    pub fn alias_name(&self) -> &'static str {
        self.alias
    }

    /// Retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }
}

/// A resource bound to a registry.
#[derive(Debug, Clone)]
pub struct Resource {
    spec: ResourceSpec,
    registry: Arc<Registry>,
}

impl Resource {
    /// Bind `spec` to `registry`.
    pub fn new(spec: ResourceSpec, registry: Arc<Registry>) -> Self {
        Self { spec, registry }
    }

    /// The resource's spec.
    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    /// Resolve the live collection through the registry.
    pub async fn collection(&self) -> VeneerResult<Collection> {
        let database = self.registry.get_database(self.spec.alias, false).await?;
        Ok(database.collection(self.spec.collection))
    }

    /// Insert a document under a freshly generated id, returning the id.
    pub async fn insert(&self, document: Document) -> VeneerResult<Bson> {
        self.insert_with(document, self.spec.id_generator).await
    }

    /// Insert a document under an id produced by `generator`.
    pub async fn insert_with<G>(&self, document: Document, generator: G) -> VeneerResult<Bson>
    where
        G: FnOnce() -> Bson,
    {
        self.insert_with_id(document, generator()).await
    }

    /// Insert a document under exactly `id`, returning it.
    pub async fn insert_with_id(
        &self,
        mut document: Document,
        id: impl Into<Bson>,
    ) -> VeneerResult<Bson> {
        let id = id.into();
        document.insert(ID_FIELD, id.clone());
        let document = add_shard(self.spec.shard.as_ref(), document);

        debug!(collection = %self.spec.collection, id = %id, "insert");
        self.call("insert", |collection| {
            let document = document.clone();
            async move { collection.insert_one(document).await }
        })
        .await?;
        Ok(id)
    }

    /// Update the document `id` (narrowed by `extra`) with `updater(update)`.
    ///
    /// Returns the number of matched documents, which is zero when nothing
    /// matched, or `None` when the write was not acknowledged.
    pub async fn update(
        &self,
        id: impl Into<Bson>,
        update: Document,
        extra: Option<Document>,
        updater: Updater,
    ) -> VeneerResult<Option<u64>> {
        let filter = self.make_spec(id.into(), extra)?;
        let update = updater(update);

        debug!(collection = %self.spec.collection, filter = %filter, "update");
        let outcome = self
            .call("update", |collection| {
                let (filter, update) = (filter.clone(), update.clone());
                async move { collection.update_one(filter, update).await }
            })
            .await?;
        Ok(outcome.map(|o| o.matched))
    }

    /// Set the fields of `partial` on the document `id`.
    pub async fn update_dict(
        &self,
        id: impl Into<Bson>,
        partial: Document,
        extra: Option<Document>,
    ) -> VeneerResult<Option<u64>> {
        self.update(id, partial, extra, set_updater).await
    }

    /// Remove every document matching `id` and `extra`, returning how many
    /// went, or `None` when the write was not acknowledged.
    ///
    /// Pass [`Bson::Null`] as `id` to remove by `extra` alone.
    pub async fn remove(
        &self,
        id: impl Into<Bson>,
        extra: Option<Document>,
    ) -> VeneerResult<Option<u64>> {
        let filter = self.make_spec(id.into(), extra)?;

        debug!(collection = %self.spec.collection, filter = %filter, "remove");
        self.call("remove", |collection| {
            let filter = filter.clone();
            async move { collection.delete_many(filter).await }
        })
        .await
    }

    /// Find the document `id` (narrowed by `extra`).
    pub async fn find_one(
        &self,
        id: impl Into<Bson>,
        extra: Option<Document>,
    ) -> VeneerResult<Option<Document>> {
        let filter = self.make_spec(id.into(), extra)?;

        debug!(collection = %self.spec.collection, filter = %filter, "find_one");
        self.call("find_one", |collection| {
            let filter = filter.clone();
            async move { collection.find_one(filter).await }
        })
        .await
    }

    /// Find a page of documents matching `filter`.
    pub async fn find(
        &self,
        filter: Document,
        skip: u64,
        limit: i64,
    ) -> VeneerResult<DocumentStream> {
        debug!(
            collection = %self.spec.collection,
            filter = %filter,
            skip = skip,
            limit = limit,
            "find"
        );
        self.call("find", |collection| {
            let filter = filter.clone();
            async move { collection.find(filter, skip, Some(limit)).await }
        })
        .await
    }

    /// Find the first [`DEFAULT_LIMIT`] documents matching `filter`.
    pub async fn find_page(&self, filter: Document) -> VeneerResult<DocumentStream> {
        self.find(filter, 0, DEFAULT_LIMIT).await
    }

    /// Find the documents whose id is one of `ids`, in no particular order.
    pub async fn find_in<I, T>(&self, ids: I) -> VeneerResult<DocumentStream>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bson>,
    {
        let filter = make_in_spec(self.spec.id_type, ids.into_iter().map(Into::into))?;
        self.find_all(filter).await
    }

    /// Fetch every document in `ids`, failing if any of them does not exist.
    pub async fn resolve<I, T>(&self, ids: I) -> VeneerResult<Vec<Document>>
    where
        I: IntoIterator<Item = T>,
        T: Into<Bson>,
    {
        let requested = dedup(coerce_all(
            self.spec.id_type,
            ids.into_iter().map(Into::into),
        )?);
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let filter = make_in_spec(self.spec.id_type, requested.iter().cloned())?;
        let documents: Vec<Document> = self.find_all(filter).await?.try_collect().await?;

        let found: HashSet<String> = documents
            .iter()
            .filter_map(|d| d.get(ID_FIELD))
            .map(id_key)
            .collect();
        if found.len() < requested.len() {
            let missing: Vec<Bson> = requested
                .into_iter()
                .filter(|id| !found.contains(&id_key(id)))
                .collect();
            if !missing.is_empty() {
                return Err(VeneerError::MissingIdentifiers(missing));
            }
        }
        Ok(documents)
    }

    async fn find_all(&self, filter: Document) -> VeneerResult<DocumentStream> {
        debug!(collection = %self.spec.collection, filter = %filter, "find_in");
        self.call("find_in", |collection| {
            let filter = filter.clone();
            async move { collection.find(filter, 0, None).await }
        })
        .await
    }

    fn make_spec(&self, id: Bson, extra: Option<Document>) -> VeneerResult<Document> {
        make_spec(self.spec.id_type, self.spec.shard.as_ref(), id, extra)
    }

    /// Resolve the collection and run `op` on it under the retry policy.
    async fn call<T, F, Fut>(&self, operation: &str, op: F) -> VeneerResult<T>
    where
        F: Fn(Collection) -> Fut,
        Fut: std::future::Future<Output = VeneerResult<T>>,
    {
        let op = &op;
        self.spec
            .retry
            .run(operation, move || async move {
                let collection = self.collection().await?;
                op(collection).await
            })
            .await
    }
}

/// Remove duplicates, keeping first occurrences in order.
fn dedup(ids: impl IntoIterator<Item = Bson>) -> Vec<Bson> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(id_key(id)))
        .collect()
}
