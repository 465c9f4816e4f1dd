//! Integration tests for the connection registry.
//!
//! These run against the in-memory driver, so no server is needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;

use veneer_core::memory::{MEMORY_CLIENT_KIND, MemoryClientFactory, MemoryStore};
use veneer_core::mutator::{DocumentMutator, NAMESPACE_INJECTOR, Namespace};
use veneer_core::prelude::*;

fn registry_with_store() -> (Arc<Registry>, Arc<MemoryStore>) {
    let store = MemoryStore::new();
    let registry = Arc::new(Registry::new());
    registry.register_client_factory(
        MEMORY_CLIENT_KIND,
        MemoryClientFactory::new(Arc::clone(&store)),
    );
    (registry, store)
}

/// Test that unknown aliases are refused
#[tokio::test]
async fn test_unregistered_alias_fails() {
    let (registry, _) = registry_with_store();

    let err = registry.get_client("nope", false).await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("has not been defined"));

    let err = registry.get_database("nope", false).await.unwrap_err();
    assert!(err.is_connection_error());
}

/// Test that handles are cached per alias
#[tokio::test]
async fn test_handles_are_cached() {
    let (registry, store) = registry_with_store();
    registry.register("test", "app", MEMORY_CLIENT_KIND, doc! {});

    let first = registry.get_client("test", false).await.unwrap();
    let second = registry.get_client("test", false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let db1 = registry.get_database("test", false).await.unwrap();
    let db2 = registry.get_database("test", false).await.unwrap();
    assert!(Arc::ptr_eq(&db1, &db2));
    assert_eq!(db1.name(), "app");
    assert_eq!(store.connects(), 1);
}

/// Test that disconnecting rebuilds fresh handles on next access
#[tokio::test]
async fn test_disconnect_rebuilds_handles() {
    let (registry, store) = registry_with_store();
    registry.register("test", "app", MEMORY_CLIENT_KIND, doc! {});

    let client = registry.get_client("test", false).await.unwrap();
    let database = registry.get_database("test", false).await.unwrap();

    registry.disconnect("test").await;
    assert!(!registry.is_connected("test").await);

    let new_client = registry.get_client("test", false).await.unwrap();
    let new_database = registry.get_database("test", false).await.unwrap();
    assert!(!Arc::ptr_eq(&client, &new_client));
    assert!(!Arc::ptr_eq(&database, &new_database));
    assert_eq!(store.connects(), 2);

    // Disconnecting twice is harmless.
    registry.disconnect("test").await;
    registry.disconnect("test").await;
    registry.disconnect("never-registered").await;
}

/// Test that force_reconnect tears down the live client
#[tokio::test]
async fn test_force_reconnect() {
    let (registry, store) = registry_with_store();
    registry.register("test", "app", MEMORY_CLIENT_KIND, doc! {});

    let db = registry.get_database("test", false).await.unwrap();
    let reconnected = registry.get_database("test", true).await.unwrap();
    assert!(!Arc::ptr_eq(&db, &reconnected));
    assert_eq!(store.connects(), 2);
}

/// Test that re-registering leaves live handles alone
#[tokio::test]
async fn test_register_does_not_tear_down() {
    let (registry, _) = registry_with_store();
    registry.register("test", "app", MEMORY_CLIENT_KIND, doc! {});
    let db = registry.get_database("test", false).await.unwrap();

    registry.register("test", "other", MEMORY_CLIENT_KIND, doc! {});
    let same = registry.get_database("test", false).await.unwrap();
    assert!(Arc::ptr_eq(&db, &same));
    assert_eq!(same.name(), "app");

    registry.disconnect("test").await;
    let rebuilt = registry.get_database("test", false).await.unwrap();
    assert_eq!(rebuilt.name(), "other");
}

/// Test that client construction failures become connection errors
#[tokio::test]
async fn test_invalid_client_options() {
    let (registry, _) = registry_with_store();
    registry.register(
        "invalid",
        "app",
        MEMORY_CLIENT_KIND,
        doc! { "host": "localhost", "invalid_param": "invalid" },
    );

    let err = registry.get_client("invalid", false).await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(std::error::Error::source(&err).is_some());
    assert!(!registry.is_connected("invalid").await);
}

/// Test that unknown client kinds are refused
#[tokio::test]
async fn test_unknown_client_kind() {
    let (registry, _) = registry_with_store();
    registry.register("test", "app", "carrier-pigeon", doc! {});

    let err = registry.get_client("test", false).await.unwrap_err();
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("carrier-pigeon"));
}

/// Test that connect registers and connects in one call
#[tokio::test]
async fn test_connect_shortcut() {
    let (registry, store) = registry_with_store();

    let client = registry
        .connect("app", "quick", MEMORY_CLIENT_KIND, doc! {})
        .await
        .unwrap();
    assert_eq!(client.alias(), "quick");
    assert_eq!(registry.settings("quick").unwrap().database, "app");

    let again = registry
        .connect("ignored", "quick", MEMORY_CLIENT_KIND, doc! {})
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&client, &again));
    assert_eq!(registry.settings("quick").unwrap().database, "app");
    assert_eq!(store.connects(), 1);
}

struct Counting;

impl DocumentMutator for Counting {
    fn incoming(&self, mut document: Document, _ns: Namespace<'_>) -> VeneerResult<Document> {
        document.insert("counted", true);
        Ok(document)
    }
}

/// Test that mutators are built once per database handle
#[tokio::test]
async fn test_mutators_applied_once() {
    let (registry, store) = registry_with_store();
    let built = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&built);
    registry.register_mutator("counting", move |_: &Document| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Counting) as Arc<dyn DocumentMutator>)
    });

    let settings = ConnectionSettings::builder()
        .database("app")
        .client_kind(MEMORY_CLIENT_KIND)
        .mutator("counting", doc! {})
        .mutator(NAMESPACE_INJECTOR, doc! {})
        .build()
        .unwrap();
    registry.register_settings("test", settings);

    let db = registry.get_database("test", false).await.unwrap();
    registry.get_database("test", false).await.unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(db.mutator_count(), 2);

    let things = db.collection("things");
    let id = things.insert_one(doc! { "n": 1 }).await.unwrap();
    let stored = things.find_one(doc! { "_id": id }).await.unwrap().unwrap();
    assert_eq!(stored.get_bool("counted").unwrap(), true);
    assert_eq!(stored.get_str("_ns").unwrap(), "app.things");
    assert_eq!(store.count("app", "things"), 1);

    registry.disconnect("test").await;
    registry.get_database("test", false).await.unwrap();
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

/// Test that an unknown mutator name fails the database handle
#[tokio::test]
async fn test_unknown_mutator() {
    let (registry, _) = registry_with_store();
    let settings = ConnectionSettings::builder()
        .database("app")
        .client_kind(MEMORY_CLIENT_KIND)
        .mutator("missing", doc! {})
        .build()
        .unwrap();
    registry.register_settings("test", settings);

    let err = registry.get_database("test", false).await.unwrap_err();
    assert!(err.is_connection_error());
}

/// Test that the document wrapper sees every returned document
#[tokio::test]
async fn test_document_wrapper() {
    let (registry, _) = registry_with_store();
    registry.register_wrapper("tagged", |mut doc: Document| -> VeneerResult<Document> {
        doc.insert("wrapped", true);
        Ok(doc)
    });
    let settings = ConnectionSettings::builder()
        .database("app")
        .client_kind(MEMORY_CLIENT_KIND)
        .document_class("tagged")
        .build()
        .unwrap();
    registry.register_settings("test", settings);

    let things = registry
        .get_database("test", false)
        .await
        .unwrap()
        .collection("things");
    let id = things.insert_one(doc! { "n": 1 }).await.unwrap();
    let found = things.find_one(doc! { "_id": id }).await.unwrap().unwrap();
    assert_eq!(found.get_bool("wrapped").unwrap(), true);
}

/// Test that registering from a configuration file works
#[tokio::test]
async fn test_configure_from_toml() {
    let (registry, _) = registry_with_store();
    let config = VeneerConfig::from_toml_str(
        r#"
        [connections.default]
        database = "app"
        client = "memory"

        [connections.reports]
        database = "reports"
        client = "memory"
        options = { host = "localhost" }
        "#,
    )
    .unwrap();
    registry.configure(&config);

    assert_eq!(registry.aliases(), vec!["default".to_string(), "reports".to_string()]);
    let db = registry.get_database("reports", false).await.unwrap();
    assert_eq!(db.name(), "reports");
}

/// Test that concurrent first access builds a single client
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_access() {
    let (registry, store) = registry_with_store();
    registry.register("test", "app", MEMORY_CLIENT_KIND, doc! {});

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_database("test", false).await.unwrap() })
        })
        .collect();

    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(store.connects(), 1);
}

/// Test that a slow connection on one alias does not hold up another
#[tokio::test(start_paused = true)]
async fn test_slow_connect_does_not_block_other_aliases() {
    let (registry, _) = registry_with_store();
    registry.register("slow", "app", MEMORY_CLIENT_KIND, doc! { "connect_delay_ms": 10_000 });
    registry.register("fast", "app", MEMORY_CLIENT_KIND, doc! {});

    let slow = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.get_client("slow", false).await.unwrap() })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!slow.is_finished());

    let fast = tokio::time::timeout(Duration::from_secs(1), registry.get_database("fast", false))
        .await
        .expect("fast alias waited on the slow one")
        .unwrap();
    assert_eq!(fast.alias(), "fast");

    assert_eq!(slow.await.unwrap().alias(), "slow");
}

/// Test that disconnecting does not wait for live streams
#[tokio::test]
async fn test_disconnect_with_live_stream() {
    let (registry, _) = registry_with_store();
    registry.register("test", "app", MEMORY_CLIENT_KIND, doc! {});

    let items = registry.get_database("test", false).await.unwrap().collection("items");
    items.insert_one(doc! { "_id": 1 }).await.unwrap();
    items.insert_one(doc! { "_id": 2 }).await.unwrap();
    let mut stream = items.find(doc! {}, 0, None).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());

    tokio::time::timeout(Duration::from_secs(5), registry.disconnect("test"))
        .await
        .expect("disconnect waited on a live stream");
    assert!(!registry.is_connected("test").await);
    assert!(stream.next().await.unwrap().is_err());
}

/// Test that a slow shutdown blocks neither other aliases nor a reconnect
#[tokio::test(start_paused = true)]
async fn test_slow_close_happens_outside_the_registry() {
    let (registry, store) = registry_with_store();
    registry.register("closing", "app", MEMORY_CLIENT_KIND, doc! { "close_delay_ms": 10_000 });
    registry.register("other", "app", MEMORY_CLIENT_KIND, doc! {});
    let old = registry.get_client("closing", false).await.unwrap();

    let closing = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.disconnect("closing").await })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(!closing.is_finished());

    tokio::time::timeout(Duration::from_secs(1), registry.get_database("other", false))
        .await
        .expect("other alias waited on a shutdown")
        .unwrap();
    let fresh = tokio::time::timeout(Duration::from_secs(1), registry.get_client("closing", false))
        .await
        .expect("reconnect waited on a shutdown")
        .unwrap();
    assert!(!Arc::ptr_eq(&old, &fresh));
    assert_eq!(store.connects(), 3);

    closing.await.unwrap();
}
