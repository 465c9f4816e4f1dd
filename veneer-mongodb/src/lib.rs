//! # veneer-mongodb
//!
//! MongoDB backend for the Veneer connection registry.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use veneer_core::prelude::*;
//!
//! let registry = Arc::new(Registry::new());
//! veneer_mongodb::register_mongodb(&registry);
//! registry.register(
//!     DEFAULT_ALIAS,
//!     "app",
//!     veneer_mongodb::MONGODB_CLIENT_KIND,
//!     doc! { "host": "localhost", "port": 27017 },
//! );
//!
//! let db = registry.get_database(DEFAULT_ALIAS, false).await?;
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::{MongoClient, MongoClientFactory, MongoCollection, MongoDatabase};
pub use config::{MongoConfig, MongoConfigBuilder, ReadPreference, WriteConcern};
pub use error::{classify, is_transient};

use veneer_core::Registry;

/// Client kind under which the MongoDB factory is registered.
pub const MONGODB_CLIENT_KIND: &str = veneer_core::config::DEFAULT_CLIENT_KIND;

/// Install the MongoDB client factory in `registry`.
pub fn register_mongodb(registry: &Registry) {
    registry.register_client_factory(MONGODB_CLIENT_KIND, MongoClientFactory);
}
