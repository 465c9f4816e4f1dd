//! The boundary between veneer and a document database driver.
//!
//! A backend implements these traits for its client, database and collection
//! handles. Failures cross the boundary as [`VeneerError`](crate::VeneerError).
//! A lost connection that should be retried must be reported as
//! [`VeneerError::Reconnect`](crate::VeneerError::Reconnect).

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::stream::BoxStream;

use crate::error::VeneerResult;

/// A lazy, finite, forward-only sequence of documents.
pub type DocumentStream = BoxStream<'static, VeneerResult<Document>>;

/// Builds driver clients from free-form option documents.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Construct a client. Options are forwarded verbatim from registration.
    async fn connect(&self, options: &Document) -> VeneerResult<Arc<dyn DriverClient>>;
}

/// A live driver client owning the network connections.
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// Get a database handle by name.
    fn database(&self, name: &str) -> Arc<dyn DriverDatabase>;

    /// Close the client's connections.
    ///
    /// Must return promptly even while streams from this client are alive;
    /// those streams fail or end on their next poll.
    async fn close(&self);
}

/// A database handle within a client.
pub trait DriverDatabase: Send + Sync {
    /// Name of the database.
    fn name(&self) -> &str;

    /// Get a collection handle by name.
    fn collection(&self, name: &str) -> Arc<dyn DriverCollection>;
}

/// Outcome of an update, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateOutcome {
    /// Documents matched by the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
}

/// A collection handle.
#[async_trait]
pub trait DriverCollection: Send + Sync {
    /// Name of the collection.
    fn name(&self) -> &str;

    /// Insert one document, returning its `_id`.
    async fn insert_one(&self, document: Document) -> VeneerResult<Bson>;

    /// Update the first document matching `filter`.
    ///
    /// Returns `None` when the write was not acknowledged, so no counts exist.
    async fn update_one(
        &self,
        filter: Document,
        update: Document,
    ) -> VeneerResult<Option<UpdateOutcome>>;

    /// Delete every document matching `filter`, returning the count, or
    /// `None` when the write was not acknowledged.
    async fn delete_many(&self, filter: Document) -> VeneerResult<Option<u64>>;

    /// Find the first document matching `filter`.
    async fn find_one(&self, filter: Document) -> VeneerResult<Option<Document>>;

    /// Find documents matching `filter`. A `limit` of `None` returns all.
    async fn find(
        &self,
        filter: Document,
        skip: u64,
        limit: Option<i64>,
    ) -> VeneerResult<DocumentStream>;
}
