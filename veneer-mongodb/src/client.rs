//! Driver adapters over the official MongoDB client.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::{StreamExt, TryStreamExt};
use mongodb::options::{Acknowledgment, FindOptions};
use tracing::{debug, info};
use veneer_core::VeneerResult;
use veneer_core::driver::{
    ClientFactory, DocumentStream, DriverClient, DriverCollection, DriverDatabase, UpdateOutcome,
};

use crate::config::MongoConfig;
use crate::error::classify;

/// Builds [`MongoClient`]s from registered option documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoClientFactory;

#[async_trait]
impl ClientFactory for MongoClientFactory {
    async fn connect(&self, options: &Document) -> VeneerResult<Arc<dyn DriverClient>> {
        let config = MongoConfig::from_options(options)?;
        Ok(Arc::new(MongoClient::new(config).await?))
    }
}

/// A MongoDB client.
///
/// The driver pools connections internally; the client only opens them on
/// first use, so creating one never touches the network.
#[derive(Debug, Clone)]
pub struct MongoClient {
    client: mongodb::Client,
    config: Arc<MongoConfig>,
}

impl MongoClient {
    /// Create a new client from configuration.
    pub async fn new(config: MongoConfig) -> VeneerResult<Self> {
        let options = config.to_client_options().await?;
        let client = mongodb::Client::with_options(options).map_err(classify)?;

        info!(uri = %config.uri, "MongoDB client created");

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    /// Get the underlying MongoDB client.
    pub fn inner(&self) -> &mongodb::Client {
        &self.client
    }

    /// Get the configuration.
    pub fn config(&self) -> &MongoConfig {
        &self.config
    }

    /// Check if the server answers a ping.
    pub async fn is_healthy(&self) -> bool {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .is_ok()
    }
}

#[async_trait]
impl DriverClient for MongoClient {
    fn database(&self, name: &str) -> Arc<dyn DriverDatabase> {
        Arc::new(MongoDatabase {
            database: self.client.database(name),
        })
    }

    /// Open cursors are not waited for; they fail on their next batch.
    async fn close(&self) {
        debug!(uri = %self.config.uri, "Shutting down MongoDB client");
        self.client.clone().shutdown_immediate().await;
    }
}

/// A database on a [`MongoClient`].
#[derive(Debug, Clone)]
pub struct MongoDatabase {
    database: mongodb::Database,
}

impl DriverDatabase for MongoDatabase {
    fn name(&self) -> &str {
        self.database.name()
    }

    fn collection(&self, name: &str) -> Arc<dyn DriverCollection> {
        Arc::new(MongoCollection {
            collection: self.database.collection(name),
        })
    }
}

/// A collection of raw BSON documents.
#[derive(Debug, Clone)]
pub struct MongoCollection {
    collection: mongodb::Collection<Document>,
}

impl MongoCollection {
    /// Whether writes wait for the server. With `w: 0` the reported counts are meaningless.
    fn acknowledged(&self) -> bool {
        !matches!(
            self.collection.write_concern().and_then(|wc| wc.w.as_ref()),
            Some(Acknowledgment::Nodes(0))
        )
    }
}

#[async_trait]
impl DriverCollection for MongoCollection {
    fn name(&self) -> &str {
        self.collection.name()
    }

    async fn insert_one(&self, document: Document) -> VeneerResult<Bson> {
        let result = self
            .collection
            .insert_one(document, None)
            .await
            .map_err(classify)?;
        Ok(result.inserted_id)
    }

    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> VeneerResult<Option<UpdateOutcome>> {
        let result = self
            .collection
            .update_one(filter, update, None)
            .await
            .map_err(classify)?;
        Ok(self.acknowledged().then_some(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        }))
    }

    async fn delete_many(&self, filter: Document) -> VeneerResult<Option<u64>> {
        let result = self
            .collection
            .delete_many(filter, None)
            .await
            .map_err(classify)?;
        Ok(self.acknowledged().then_some(result.deleted_count))
    }

    async fn find_one(&self, filter: Document) -> VeneerResult<Option<Document>> {
        self.collection
            .find_one(filter, None)
            .await
            .map_err(classify)
    }

    async fn find(
        &self,
        filter: Document,
        skip: u64,
        limit: Option<i64>,
    ) -> VeneerResult<DocumentStream> {
        let mut options = FindOptions::default();
        options.skip = (skip > 0).then_some(skip);
        options.limit = limit.filter(|n| *n != 0);

        let cursor = self
            .collection
            .find(filter, options)
            .await
            .map_err(classify)?;
        Ok(cursor.map_err(classify).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_rejects_unknown_options() {
        let result = MongoClientFactory
            .connect(&doc! { "invalid_param": "invalid" })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_client_creation_is_lazy() {
        let client = MongoClientFactory
            .connect(&doc! { "host": "localhost", "server_selection_timeout_ms": 100 })
            .await
            .unwrap();

        let database = client.database("veneer");
        assert_eq!(database.name(), "veneer");
        assert_eq!(database.collection("items").name(), "items");
        client.close().await;
    }

    #[tokio::test]
    async fn test_write_concern_zero_is_unacknowledged() {
        let config = MongoConfig::from_options(&doc! { "w": 0 }).unwrap();
        let client = MongoClient::new(config).await.unwrap();
        let collection = MongoCollection {
            collection: client.inner().database("veneer").collection("items"),
        };
        assert!(!collection.acknowledged());

        let client = MongoClient::new(MongoConfig::default()).await.unwrap();
        let collection = MongoCollection {
            collection: client.inner().database("veneer").collection("items"),
        };
        assert!(collection.acknowledged());
    }
}
