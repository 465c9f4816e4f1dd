//! Connection settings and file-based configuration.
//!
//! Settings can be built in code with [`ConnectionSettings::builder`] or
//! loaded from TOML:
//!
//! ```toml
//! [connections.default]
//! database = "app"
//! client = "mongodb"
//! document_class = "tagged"
//!
//! [connections.default.options]
//! host = "localhost"
//! port = 27017
//!
//! [[connections.default.mutators]]
//! name = "namespace_injector"
//! options = { field = "_ns" }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use bson::Document;
use serde::{Deserialize, Serialize};

use crate::error::{VeneerError, VeneerResult};

/// Alias used when none is given.
pub const DEFAULT_ALIAS: &str = "default";

/// Client kind used when none is given.
pub const DEFAULT_CLIENT_KIND: &str = "mongodb";

/// A named mutator and the options used to build it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutatorSettings {
    /// Name the mutator factory is registered under.
    pub name: String,
    /// Options passed to the factory.
    #[serde(default)]
    pub options: Document,
}

impl MutatorSettings {
    /// Create mutator settings.
    pub fn new(name: impl Into<String>, options: Document) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

/// Everything needed to build the client and database for one alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Database name.
    pub database: String,
    /// Name of the client factory used to build the client.
    #[serde(default = "default_client_kind", rename = "client")]
    pub client_kind: String,
    /// Options forwarded verbatim to the client factory.
    #[serde(default)]
    pub options: Document,
    /// Mutators attached to the database handle, in order.
    #[serde(default)]
    pub mutators: Vec<MutatorSettings>,
    /// Name of the wrapper applied to returned documents.
    #[serde(default)]
    pub document_class: Option<String>,
}

fn default_client_kind() -> String {
    DEFAULT_CLIENT_KIND.to_string()
}

impl ConnectionSettings {
    /// Settings for `database` with the default client and no options.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            client_kind: default_client_kind(),
            options: Document::new(),
            mutators: Vec::new(),
            document_class: None,
        }
    }

    /// Create a builder for settings.
    pub fn builder() -> ConnectionSettingsBuilder {
        ConnectionSettingsBuilder::new()
    }
}

/// Builder for [`ConnectionSettings`].
#[derive(Debug, Default)]
pub struct ConnectionSettingsBuilder {
    database: Option<String>,
    client_kind: Option<String>,
    options: Document,
    mutators: Vec<MutatorSettings>,
    document_class: Option<String>,
}

impl ConnectionSettingsBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the client kind.
    pub fn client_kind(mut self, kind: impl Into<String>) -> Self {
        self.client_kind = Some(kind.into());
        self
    }

    /// Set a single client option.
    pub fn option(mut self, key: impl Into<String>, value: impl Into<bson::Bson>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Replace all client options.
    pub fn options(mut self, options: Document) -> Self {
        self.options = options;
        self
    }

    /// Append a post-connect mutator.
    pub fn mutator(mut self, name: impl Into<String>, options: Document) -> Self {
        self.mutators.push(MutatorSettings::new(name, options));
        self
    }

    /// Set the document wrapper.
    pub fn document_class(mut self, name: impl Into<String>) -> Self {
        self.document_class = Some(name.into());
        self
    }

    /// Build the settings.
    pub fn build(self) -> VeneerResult<ConnectionSettings> {
        let database = self
            .database
            .filter(|d| !d.is_empty())
            .ok_or_else(|| VeneerError::config("database name is required"))?;

        Ok(ConnectionSettings {
            database,
            client_kind: self.client_kind.unwrap_or_else(default_client_kind),
            options: self.options,
            mutators: self.mutators,
            document_class: self.document_class,
        })
    }
}

/// A set of connections keyed by alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VeneerConfig {
    /// Connection settings by alias.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionSettings>,
}

impl VeneerConfig {
    /// Parse a configuration from a TOML string.
    pub fn from_toml_str(source: &str) -> VeneerResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| VeneerError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> VeneerResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            VeneerError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    fn validate(&self) -> VeneerResult<()> {
        for (alias, settings) in &self.connections {
            if settings.database.is_empty() {
                return Err(VeneerError::config(format!(
                    "connection '{}' has an empty database name",
                    alias
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_settings_builder() {
        let settings = ConnectionSettings::builder()
            .database("app")
            .option("host", "localhost")
            .option("port", 27017)
            .mutator("namespace_injector", doc! {})
            .build()
            .unwrap();

        assert_eq!(settings.client_kind, "mongodb");
        assert_eq!(settings.options, doc! { "host": "localhost", "port": 27017 });
        assert_eq!(settings.mutators.len(), 1);
        assert_eq!(settings.document_class, None);
    }

    #[test]
    fn test_settings_builder_missing_database() {
        assert!(ConnectionSettings::builder().build().is_err());
        assert!(ConnectionSettings::builder().database("").build().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config = VeneerConfig::from_toml_str(
            r#"
            [connections.default]
            database = "app"

            [connections.default.options]
            host = "db.internal"
            port = 27018

            [connections.analytics]
            database = "events"
            client = "memory"
            document_class = "tagged"

            [[connections.analytics.mutators]]
            name = "namespace_injector"
            options = { field = "ns" }
            "#,
        )
        .unwrap();

        let default = &config.connections["default"];
        assert_eq!(default.client_kind, "mongodb");
        assert_eq!(default.options.get_str("host").unwrap(), "db.internal");
        assert_eq!(default.options.get_i64("port").unwrap(), 27018);

        let analytics = &config.connections["analytics"];
        assert_eq!(analytics.client_kind, "memory");
        assert_eq!(analytics.document_class.as_deref(), Some("tagged"));
        assert_eq!(
            analytics.mutators,
            vec![MutatorSettings::new("namespace_injector", doc! { "field": "ns" })]
        );
    }

    #[test]
    fn test_config_rejects_empty_database() {
        let result = VeneerConfig::from_toml_str(
            r#"
            [connections.default]
            database = ""
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_config_requires_database() {
        assert!(VeneerConfig::from_toml_str("[connections.default]\n").is_err());
    }
}
