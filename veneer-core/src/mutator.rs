//! Post-connect document mutators and result wrappers.
//!
//! Mutators are attached to a database handle when it is first created and
//! see every document written to or read from it. They are configured by
//! name in the connection settings and built from a factory registered with
//! the [`Registry`](crate::Registry).

use std::sync::Arc;

use bson::{Bson, Document};
use bson::oid::ObjectId;

use crate::error::{VeneerError, VeneerResult};
use crate::id::ID_FIELD;

/// The database and collection a document is travelling through.
#[derive(Debug, Clone, Copy)]
pub struct Namespace<'a> {
    /// Database name.
    pub database: &'a str,
    /// Collection name.
    pub collection: &'a str,
}

impl std::fmt::Display for Namespace<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Transforms documents on their way in and out of a database.
pub trait DocumentMutator: Send + Sync {
    /// Applied to documents before they are inserted.
    fn incoming(&self, document: Document, _ns: Namespace<'_>) -> VeneerResult<Document> {
        Ok(document)
    }

    /// Applied to every document returned by a read.
    fn outgoing(&self, document: Document, _ns: Namespace<'_>) -> VeneerResult<Document> {
        Ok(document)
    }
}

/// Wraps every document returned by the driver.
pub trait DocumentWrapper: Send + Sync {
    /// Wrap one returned document.
    fn wrap(&self, document: Document) -> VeneerResult<Document>;
}

impl<F> DocumentWrapper for F
where
    F: Fn(Document) -> VeneerResult<Document> + Send + Sync,
{
    fn wrap(&self, document: Document) -> VeneerResult<Document> {
        self(document)
    }
}

/// Builds a mutator from the options given in the connection settings.
pub type MutatorFactory =
    Arc<dyn Fn(&Document) -> VeneerResult<Arc<dyn DocumentMutator>> + Send + Sync>;

/// Name of the built-in [`NamespaceInjector`].
pub const NAMESPACE_INJECTOR: &str = "namespace_injector";

/// Name of the built-in [`ObjectIdInjector`].
pub const OBJECT_ID_INJECTOR: &str = "object_id_injector";

/// Records `"<database>.<collection>"` on every written document.
///
/// Options: `field` (default `"_ns"`).
#[derive(Debug, Clone)]
pub struct NamespaceInjector {
    field: String,
}

impl NamespaceInjector {
    /// Create an injector writing to `field`.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    fn from_options(options: &Document) -> VeneerResult<Self> {
        match options.get("field") {
            None => Ok(Self::new("_ns")),
            Some(Bson::String(field)) => Ok(Self::new(field.as_str())),
            Some(other) => Err(VeneerError::config(format!(
                "{}: 'field' must be a string, got {}",
                NAMESPACE_INJECTOR, other
            ))),
        }
    }
}

impl DocumentMutator for NamespaceInjector {
    fn incoming(&self, mut document: Document, ns: Namespace<'_>) -> VeneerResult<Document> {
        document.insert(self.field.as_str(), ns.to_string());
        Ok(document)
    }
}

/// Gives documents written without an `_id` a fresh ObjectId.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectIdInjector;

impl DocumentMutator for ObjectIdInjector {
    fn incoming(&self, mut document: Document, _ns: Namespace<'_>) -> VeneerResult<Document> {
        if !document.contains_key(ID_FIELD) {
            document.insert(ID_FIELD, ObjectId::new());
        }
        Ok(document)
    }
}

/// The mutators every registry knows about.
pub fn builtin_mutators() -> Vec<(&'static str, MutatorFactory)> {
    vec![
        (
            NAMESPACE_INJECTOR,
            Arc::new(|options: &Document| -> VeneerResult<Arc<dyn DocumentMutator>> {
                Ok(Arc::new(NamespaceInjector::from_options(options)?))
            }) as MutatorFactory,
        ),
        (
            OBJECT_ID_INJECTOR,
            Arc::new(|_: &Document| -> VeneerResult<Arc<dyn DocumentMutator>> {
                Ok(Arc::new(ObjectIdInjector))
            }) as MutatorFactory,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    const NS: Namespace<'static> = Namespace {
        database: "app",
        collection: "users",
    };

    #[test]
    fn test_namespace_injector() {
        let doc = NamespaceInjector::new("_ns")
            .incoming(doc! { "name": "Alice" }, NS)
            .unwrap();
        assert_eq!(doc.get_str("_ns").unwrap(), "app.users");
    }

    #[test]
    fn test_namespace_injector_options() {
        let injector = NamespaceInjector::from_options(&doc! { "field": "ns" }).unwrap();
        let doc = injector.incoming(doc! {}, NS).unwrap();
        assert_eq!(doc.get_str("ns").unwrap(), "app.users");

        assert!(NamespaceInjector::from_options(&doc! { "field": 1 }).is_err());
    }

    #[test]
    fn test_object_id_injector_keeps_existing_id() {
        let doc = ObjectIdInjector.incoming(doc! { "_id": 5 }, NS).unwrap();
        assert_eq!(doc.get_i32("_id").unwrap(), 5);

        let doc = ObjectIdInjector.incoming(doc! {}, NS).unwrap();
        assert!(doc.get_object_id("_id").is_ok());
    }

    #[test]
    fn test_outgoing_defaults_to_identity() {
        let doc = ObjectIdInjector.outgoing(doc! { "a": 1 }, NS).unwrap();
        assert_eq!(doc, doc! { "a": 1 });
    }

    #[test]
    fn test_builtin_names() {
        let names: Vec<_> = builtin_mutators().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec![NAMESPACE_INJECTOR, OBJECT_ID_INJECTOR]);
    }
}
