//! # Veneer
//!
//! A thin layer over document database drivers.
//!
//! Veneer provides:
//! - A registry of named connections, built lazily and cached per alias
//! - Resources binding a collection to a connection, with id coercion,
//!   shard labels and retry on lost connections
//! - Document mutators applied on the way in and out of a database
//! - A MongoDB backend (the `mongodb` feature, on by default)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use veneer::prelude::*;
//!
//! const USERS: ResourceSpec = ResourceSpec::new("users").retries(2);
//!
//! #[tokio::main]
//! async fn main() -> Result<(), VeneerError> {
//!     let registry = veneer::default_registry();
//!     registry.register(DEFAULT_ALIAS, "app", "mongodb", doc! { "host": "localhost" });
//!
//!     let users = Resource::new(USERS, registry);
//!     let id = users.insert(doc! { "name": "Alice" }).await?;
//!     let alice = users.find_one(id, None).await?;
//!
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::Arc;

pub use veneer_core::*;

/// The MongoDB backend.
#[cfg(feature = "mongodb")]
#[cfg_attr(docsrs, doc(cfg(feature = "mongodb")))]
pub mod mongodb {
    pub use veneer_mongodb::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use veneer_core::prelude::*;
}

/// A registry with every backend enabled in this build installed.
pub fn default_registry() -> Arc<Registry> {
    let registry = Registry::new();
    #[cfg(feature = "mongodb")]
    veneer_mongodb::register_mongodb(&registry);
    Arc::new(registry)
}

/// A [`default_registry`] with the connections of a configuration file.
pub fn registry_from_file(path: impl AsRef<std::path::Path>) -> VeneerResult<Arc<Registry>> {
    let config = VeneerConfig::from_file(path)?;
    let registry = default_registry();
    registry.configure(&config);
    Ok(registry)
}
