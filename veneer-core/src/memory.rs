//! An in-memory driver.
//!
//! Useful for tests and for running resources without a server. Data lives in
//! a [`MemoryStore`] shared by every client the factory builds, so it survives
//! disconnects the way a real server would.
//!
//! Supported query operators: equality, `$in`, `$nin`, `$ne`, `$gt`, `$gte`,
//! `$lt`, `$lte` and `$exists`. Supported update operators: `$set`, `$unset`
//! and `$inc`; an update without operators replaces the document.
//!
//! Client options: `host` and `port` are accepted and ignored. `w = 0` makes
//! writes unacknowledged. `connect_delay_ms` and `close_delay_ms` slow down
//! client construction and shutdown.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use futures::StreamExt;
use parking_lot::Mutex;

use crate::driver::{
    ClientFactory, DocumentStream, DriverClient, DriverCollection, DriverDatabase, UpdateOutcome,
};
use crate::error::{VeneerError, VeneerResult};
use crate::id::ID_FIELD;

/// Client kind the memory factory is usually registered under.
pub const MEMORY_CLIENT_KIND: &str = "memory";

const ALLOWED_OPTIONS: &[&str] = &["host", "port", "w", "connect_delay_ms", "close_delay_ms"];

/// Shared storage behind every memory client.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<(String, String), Vec<Document>>>,
    pending_failures: AtomicUsize,
    connects: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `n` collection operations fail with a reconnect error.
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, AtomicOrdering::SeqCst);
    }

    /// Number of clients built so far.
    pub fn connects(&self) -> usize {
        self.connects.load(AtomicOrdering::SeqCst)
    }

    /// Number of documents in a collection.
    pub fn count(&self, database: &str, collection: &str) -> usize {
        self.collections
            .lock()
            .get(&(database.to_string(), collection.to_string()))
            .map_or(0, Vec::len)
    }

    /// Drop every document of a database.
    pub fn drop_database(&self, database: &str) {
        self.collections.lock().retain(|(db, _), _| db != database);
    }

    fn take_failure(&self) -> VeneerResult<()> {
        let injected = self
            .pending_failures
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if injected {
            return Err(VeneerError::reconnect("connection reset by peer"));
        }
        Ok(())
    }

    fn with_collection<T>(
        &self,
        database: &str,
        collection: &str,
        f: impl FnOnce(&mut Vec<Document>) -> VeneerResult<T>,
    ) -> VeneerResult<T> {
        self.take_failure()?;
        let mut collections = self.collections.lock();
        let docs = collections
            .entry((database.to_string(), collection.to_string()))
            .or_default();
        f(docs)
    }
}

/// Builds [`MemoryClient`]s over one shared store.
#[derive(Debug, Clone)]
pub struct MemoryClientFactory {
    store: Arc<MemoryStore>,
}

impl MemoryClientFactory {
    /// Create a factory over `store`.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl ClientFactory for MemoryClientFactory {
    async fn connect(&self, options: &Document) -> VeneerResult<Arc<dyn DriverClient>> {
        if let Some(key) = options.keys().find(|k| !ALLOWED_OPTIONS.contains(&k.as_str())) {
            return Err(VeneerError::config(format!("unexpected option '{}'", key)));
        }
        let acknowledged = integer_option(options, "w")?.is_none_or(|w| w != 0);
        let close_delay = integer_option(options, "close_delay_ms")?.map(Duration::from_millis);
        if let Some(delay) = integer_option(options, "connect_delay_ms")? {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.store.connects.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(Arc::new(MemoryClient {
            store: Arc::clone(&self.store),
            state: Arc::new(ClientState {
                closed: AtomicBool::new(false),
                acknowledged,
            }),
            close_delay,
        }))
    }
}

fn integer_option(options: &Document, key: &str) -> VeneerResult<Option<u64>> {
    let value = match options.get(key) {
        None => return Ok(None),
        Some(Bson::Int32(n)) => u64::try_from(*n).ok(),
        Some(Bson::Int64(n)) => u64::try_from(*n).ok(),
        Some(_) => None,
    };
    value
        .map(Some)
        .ok_or_else(|| VeneerError::config(format!("option '{}' must be a non-negative integer", key)))
}

/// State shared by a client and every handle derived from it.
#[derive(Debug)]
struct ClientState {
    closed: AtomicBool,
    acknowledged: bool,
}

impl ClientState {
    fn check_open(&self) -> VeneerResult<()> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(VeneerError::driver("client has been closed"));
        }
        Ok(())
    }
}

/// A client over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryClient {
    store: Arc<MemoryStore>,
    state: Arc<ClientState>,
    close_delay: Option<Duration>,
}

#[async_trait]
impl DriverClient for MemoryClient {
    fn database(&self, name: &str) -> Arc<dyn DriverDatabase> {
        Arc::new(MemoryDatabase {
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            name: name.to_string(),
        })
    }

    /// Live streams are not waited for; they fail on their next item.
    async fn close(&self) {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.state.closed.store(true, AtomicOrdering::SeqCst);
    }
}

#[derive(Debug)]
struct MemoryDatabase {
    store: Arc<MemoryStore>,
    state: Arc<ClientState>,
    name: String,
}

impl DriverDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DriverCollection> {
        Arc::new(MemoryCollection {
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            database: self.name.clone(),
            name: name.to_string(),
        })
    }
}

#[derive(Debug)]
struct MemoryCollection {
    store: Arc<MemoryStore>,
    state: Arc<ClientState>,
    database: String,
    name: String,
}

impl MemoryCollection {
    fn with_docs<T>(&self, f: impl FnOnce(&mut Vec<Document>) -> VeneerResult<T>) -> VeneerResult<T> {
        self.state.check_open()?;
        self.store.with_collection(&self.database, &self.name, f)
    }
}

#[async_trait]
impl DriverCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, mut document: Document) -> VeneerResult<Bson> {
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_FIELD, id.clone());
                id
            }
        };
        self.with_docs(|docs| {
            if docs.iter().any(|d| d.get(ID_FIELD).is_some_and(|e| values_eq(e, &id))) {
                return Err(VeneerError::driver(format!(
                    "duplicate key error: {} {}",
                    ID_FIELD, id
                )));
            }
            docs.push(document);
            Ok(id)
        })
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> VeneerResult<Option<UpdateOutcome>> {
        let outcome = self.with_docs(|docs| {
            let mut outcome = UpdateOutcome::default();
            for doc in docs.iter_mut() {
                if matches(doc, &filter)? {
                    outcome.matched = 1;
                    let updated = apply_update(doc, &update)?;
                    if updated != *doc {
                        *doc = updated;
                        outcome.modified = 1;
                    }
                    break;
                }
            }
            Ok(outcome)
        })?;
        Ok(self.state.acknowledged.then_some(outcome))
    }

    async fn delete_many(&self, filter: Document) -> VeneerResult<Option<u64>> {
        let deleted = self.with_docs(|docs| {
            let before = docs.len();
            let mut error = None;
            docs.retain(|doc| match matches(doc, &filter) {
                Ok(hit) => !hit,
                Err(e) => {
                    error.get_or_insert(e);
                    true
                }
            });
            match error {
                Some(e) => Err(e),
                None => Ok((before - docs.len()) as u64),
            }
        })?;
        Ok(self.state.acknowledged.then_some(deleted))
    }

    async fn find_one(&self, filter: Document) -> VeneerResult<Option<Document>> {
        self.with_docs(|docs| {
            for doc in docs.iter() {
                if matches(doc, &filter)? {
                    return Ok(Some(doc.clone()));
                }
            }
            Ok(None)
        })
    }

    async fn find(
        &self,
        filter: Document,
        skip: u64,
        limit: Option<i64>,
    ) -> VeneerResult<DocumentStream> {
        let limit = match limit.map(i64::unsigned_abs) {
            None | Some(0) => usize::MAX,
            Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
        };
        let skip = usize::try_from(skip).unwrap_or(usize::MAX);

        let hits = self.with_docs(|docs| {
            let mut hits = Vec::new();
            for doc in docs.iter() {
                if matches(doc, &filter)? {
                    hits.push(doc.clone());
                }
            }
            Ok(hits)
        })?;

        let state = Arc::clone(&self.state);
        let page: Vec<Document> = hits.into_iter().skip(skip).take(limit).collect();
        Ok(futures::stream::iter(page)
            .map(move |doc| state.check_open().map(|()| doc))
            .boxed())
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            _ => return None,
        };
    }
    Some(current)
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(d) => Some(*d),
        _ => None,
    }
}

fn values_eq(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a, b) {
            (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
            (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
            (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn is_operator_doc(doc: &Document) -> bool {
    doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

fn matches(doc: &Document, filter: &Document) -> VeneerResult<bool> {
    for (field, condition) in filter {
        let value = lookup(doc, field);
        let hit = match condition {
            Bson::Document(ops) if is_operator_doc(ops) => {
                let mut all = true;
                for (op, operand) in ops {
                    all &= matches_operator(value, op, operand)?;
                }
                all
            }
            expected => value.is_some_and(|v| values_eq(v, expected)),
        };
        if !hit {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> VeneerResult<bool> {
    let in_list = |list: &Bson| -> VeneerResult<bool> {
        match list {
            Bson::Array(items) => Ok(value.is_some_and(|v| items.iter().any(|i| values_eq(v, i)))),
            other => Err(VeneerError::driver(format!("{} needs an array, got {}", op, other))),
        }
    };
    let ordered = |wanted: &[Ordering]| {
        value
            .and_then(|v| compare(v, operand))
            .is_some_and(|o| wanted.contains(&o))
    };

    match op {
        "$in" => in_list(operand),
        "$nin" => in_list(operand).map(|hit| !hit),
        "$ne" => Ok(!value.is_some_and(|v| values_eq(v, operand))),
        "$gt" => Ok(ordered(&[Ordering::Greater])),
        "$gte" => Ok(ordered(&[Ordering::Greater, Ordering::Equal])),
        "$lt" => Ok(ordered(&[Ordering::Less])),
        "$lte" => Ok(ordered(&[Ordering::Less, Ordering::Equal])),
        "$exists" => Ok(value.is_some() == operand.as_bool().unwrap_or(true)),
        other => Err(VeneerError::driver(format!("unknown operator {}", other))),
    }
}

fn apply_update(doc: &Document, update: &Document) -> VeneerResult<Document> {
    if !is_operator_doc(update) {
        let mut replacement = update.clone();
        if let Some(id) = doc.get(ID_FIELD) {
            replacement.insert(ID_FIELD, id.clone());
        }
        return Ok(replacement);
    }

    let mut updated = doc.clone();
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(VeneerError::driver(format!("{} needs a document", op)));
        };
        match op.as_str() {
            "$set" => {
                for (field, value) in fields {
                    updated.insert(field.clone(), value.clone());
                }
            }
            "$unset" => {
                for field in fields.keys() {
                    updated.remove(field);
                }
            }
            "$inc" => {
                for (field, delta) in fields {
                    let next = increment(updated.get(field), delta)?;
                    updated.insert(field.clone(), next);
                }
            }
            other => return Err(VeneerError::driver(format!("unknown update operator {}", other))),
        }
    }
    Ok(updated)
}

fn overflow() -> VeneerError {
    VeneerError::driver("integer overflow")
}

fn increment(current: Option<&Bson>, delta: &Bson) -> VeneerResult<Bson> {
    match (current, delta) {
        (None, d) if as_f64(d).is_some() => Ok(d.clone()),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => {
            a.checked_add(*b).map(Bson::Int32).ok_or_else(overflow)
        }
        (Some(Bson::Int64(a)), Bson::Int32(b)) => {
            a.checked_add(i64::from(*b)).map(Bson::Int64).ok_or_else(overflow)
        }
        (Some(Bson::Int32(a)), Bson::Int64(b)) => {
            i64::from(*a).checked_add(*b).map(Bson::Int64).ok_or_else(overflow)
        }
        (Some(Bson::Int64(a)), Bson::Int64(b)) => {
            a.checked_add(*b).map(Bson::Int64).ok_or_else(overflow)
        }
        (Some(a), b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Ok(Bson::Double(x + y)),
            _ => Err(VeneerError::driver(format!("cannot increment {} by {}", a, b))),
        },
        (None, d) => Err(VeneerError::driver(format!("cannot increment by {}", d))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use futures::TryStreamExt;

    async fn collection(store: &Arc<MemoryStore>) -> Arc<dyn DriverCollection> {
        let client = MemoryClientFactory::new(Arc::clone(store))
            .connect(&doc! {})
            .await
            .unwrap();
        client.database("db").collection("things")
    }

    #[tokio::test]
    async fn test_insert_and_find_one() {
        let store = MemoryStore::new();
        let things = collection(&store).await;

        let id = things.insert_one(doc! { "n": 1 }).await.unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let found = things.find_one(doc! { "_id": id.clone() }).await.unwrap();
        assert_eq!(found.unwrap().get_i32("n").unwrap(), 1);
        assert_eq!(store.count("db", "things"), 1);

        assert!(things.insert_one(doc! { "_id": id }).await.is_err());
    }

    #[tokio::test]
    async fn test_operators() {
        let store = MemoryStore::new();
        let things = collection(&store).await;
        for n in 1..=5 {
            things.insert_one(doc! { "_id": n, "n": n }).await.unwrap();
        }

        let hits: Vec<Document> = things
            .find(doc! { "n": { "$gte": 2, "$lt": 4 } }, 0, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits: Vec<Document> = things
            .find(doc! { "_id": { "$in": [1_i64, 5_i64] } }, 0, None)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);

        assert!(things.find_one(doc! { "n": { "$bogus": 1 } }).await.is_err());
    }

    #[tokio::test]
    async fn test_updates() {
        let store = MemoryStore::new();
        let things = collection(&store).await;
        things.insert_one(doc! { "_id": 1, "a": 1, "b": "x" }).await.unwrap();

        let outcome = things
            .update_one(doc! { "_id": 1 }, doc! { "$inc": { "a": 2 }, "$unset": { "b": "" } })
            .await
            .unwrap();
        assert_eq!(outcome, Some(UpdateOutcome { matched: 1, modified: 1 }));
        let doc = things.find_one(doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(doc, doc! { "_id": 1, "a": 3 });

        things
            .update_one(doc! { "_id": 1 }, doc! { "c": true })
            .await
            .unwrap();
        let doc = things.find_one(doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(doc, doc! { "c": true, "_id": 1 });

        let outcome = things
            .update_one(doc! { "_id": 2 }, doc! { "$set": { "a": 1 } })
            .await
            .unwrap();
        assert_eq!(outcome.map(|o| o.matched), Some(0));
    }

    #[tokio::test]
    async fn test_increment_overflow_is_an_error() {
        let store = MemoryStore::new();
        let things = collection(&store).await;
        things
            .insert_one(doc! { "_id": 1, "small": i32::MAX, "big": i64::MAX })
            .await
            .unwrap();

        let err = things
            .update_one(doc! { "_id": 1 }, doc! { "$inc": { "small": 1 } })
            .await
            .unwrap_err();
        assert!(!err.is_reconnect());
        assert!(things
            .update_one(doc! { "_id": 1 }, doc! { "$inc": { "big": 1_i64 } })
            .await
            .is_err());

        let doc = things.find_one(doc! { "_id": 1 }).await.unwrap().unwrap();
        assert_eq!(doc.get_i32("small").unwrap(), i32::MAX);
        assert_eq!(doc.get_i64("big").unwrap(), i64::MAX);
    }

    #[tokio::test]
    async fn test_unacknowledged_writes_report_no_counts() {
        let client = MemoryClientFactory::new(MemoryStore::new())
            .connect(&doc! { "w": 0 })
            .await
            .unwrap();
        let things = client.database("db").collection("things");
        things.insert_one(doc! { "_id": 1 }).await.unwrap();

        let outcome = things
            .update_one(doc! { "_id": 1 }, doc! { "$set": { "a": 1 } })
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(things.delete_many(doc! { "_id": 1 }).await.unwrap(), None);
        assert!(things.find_one(doc! { "_id": 1 }).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        let things = collection(&store).await;
        store.fail_next(1);

        let err = things.find_one(doc! {}).await.unwrap_err();
        assert!(err.is_reconnect());
        assert!(things.find_one(doc! {}).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejects_unknown_options() {
        let factory = MemoryClientFactory::new(MemoryStore::new());
        assert!(factory.connect(&doc! { "host": "localhost" }).await.is_ok());
        assert!(factory.connect(&doc! { "invalid_param": 1 }).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_client_refuses_calls() {
        let client = MemoryClientFactory::new(MemoryStore::new())
            .connect(&doc! {})
            .await
            .unwrap();
        let things = client.database("db").collection("things");
        client.close().await;
        assert!(things.find_one(doc! {}).await.is_err());
    }

    #[tokio::test]
    async fn test_close_does_not_wait_for_live_streams() {
        let client = MemoryClientFactory::new(MemoryStore::new())
            .connect(&doc! {})
            .await
            .unwrap();
        let things = client.database("db").collection("things");
        things.insert_one(doc! { "_id": 1 }).await.unwrap();
        things.insert_one(doc! { "_id": 2 }).await.unwrap();

        let mut stream = things.find(doc! {}, 0, None).await.unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        tokio::time::timeout(Duration::from_secs(1), client.close())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_rejects_malformed_delays() {
        let factory = MemoryClientFactory::new(MemoryStore::new());
        assert!(factory.connect(&doc! { "close_delay_ms": "soon" }).await.is_err());
        assert!(factory.connect(&doc! { "w": -1 }).await.is_err());
    }
}
