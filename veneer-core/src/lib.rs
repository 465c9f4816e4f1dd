//! # veneer-core
//!
//! Driver-agnostic core of Veneer, a thin layer over document database
//! drivers.
//!
//! This crate provides:
//! - A [`Registry`] of named connections with lazily built clients and databases
//! - [`Resource`]s binding a collection to an alias, with id coercion,
//!   shard labels and retry on lost connections
//! - The [`driver`] traits a backend implements
//! - An in-memory backend in [`memory`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use veneer_core::prelude::*;
//! use veneer_core::memory::{MemoryClientFactory, MemoryStore};
//!
//! const NOTES: ResourceSpec = ResourceSpec::new("notes").retries(2);
//!
//! let registry = Arc::new(Registry::new());
//! registry.register_client_factory("memory", MemoryClientFactory::new(MemoryStore::new()));
//! registry.register("default", "app", "memory", doc! {});
//!
//! let notes = Resource::new(NOTES, registry);
//! let id = notes.insert(doc! { "text": "hello" }).await?;
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod handle;
pub mod id;
pub mod logging;
pub mod memory;
pub mod mutator;
pub mod query;
pub mod registry;
pub mod resource;
pub mod retry;
pub mod shard;
pub mod updater;

pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use config::{ConnectionSettings, DEFAULT_ALIAS, MutatorSettings, VeneerConfig};
pub use error::{VeneerError, VeneerResult};
pub use handle::{Client, Collection, Database};
pub use id::IdType;
pub use registry::Registry;
pub use resource::{DEFAULT_LIMIT, Resource, ResourceSpec};
pub use retry::RetryPolicy;
pub use shard::{ShardSpec, base_encode, object_id_shard};
pub use updater::{raw_updater, set_updater};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{ConnectionSettings, DEFAULT_ALIAS, VeneerConfig};
    pub use crate::error::{VeneerError, VeneerResult};
    pub use crate::id::IdType;
    pub use crate::registry::Registry;
    pub use crate::resource::{Resource, ResourceSpec};
    pub use crate::shard::ShardSpec;
    pub use crate::updater::{raw_updater, set_updater};
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
