//! Error types for registry and resource operations.

use bson::Bson;
use thiserror::Error;

/// Boxed error used to carry driver causes across the driver boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for veneer operations.
pub type VeneerResult<T> = Result<T, VeneerError>;

/// Errors that can occur while managing connections or running resource calls.
#[derive(Error, Debug)]
pub enum VeneerError {
    /// The alias is not registered, or the client could not be constructed.
    #[error("cannot connect to database {alias}: {message}")]
    Connection {
        /// Alias of the connection that failed.
        alias: String,
        /// Human readable description.
        message: String,
        /// Underlying cause, when the driver reported one.
        #[source]
        source: Option<BoxError>,
    },

    /// `resolve` found fewer documents than identifiers requested.
    #[error("missing identifiers: {}", display_ids(.0))]
    MissingIdentifiers(Vec<Bson>),

    /// The driver lost its connection and the call should be retried.
    #[error("transient connection failure: {0}")]
    Reconnect(#[source] BoxError),

    /// Any other driver failure, passed through untouched.
    #[error("driver error: {0}")]
    Driver(#[source] BoxError),

    /// An identifier could not be coerced to the configured type.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// The shard label could not be computed.
    #[error("shard error: {0}")]
    Shard(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Document serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn display_ids(ids: &[Bson]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl VeneerError {
    /// Create a connection error without an underlying cause.
    pub fn connection(alias: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            alias: alias.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping the cause reported by the driver.
    pub fn connection_caused_by(
        alias: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Connection {
            alias: alias.into(),
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a transient reconnect error.
    pub fn reconnect(source: impl Into<BoxError>) -> Self {
        Self::Reconnect(source.into())
    }

    /// Create a driver error.
    pub fn driver(source: impl Into<BoxError>) -> Self {
        Self::Driver(source.into())
    }

    /// Create an invalid identifier error.
    pub fn invalid_identifier(message: impl Into<String>) -> Self {
        Self::InvalidIdentifier(message.into())
    }

    /// Create a shard error.
    pub fn shard(message: impl Into<String>) -> Self {
        Self::Shard(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Check if this is a transient reconnect failure.
    pub fn is_reconnect(&self) -> bool {
        matches!(self, Self::Reconnect(_))
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Check if this is a missing identifiers error.
    pub fn is_missing_identifiers(&self) -> bool {
        matches!(self, Self::MissingIdentifiers(_))
    }

    /// The identifiers reported missing by `resolve`, if any.
    pub fn missing_identifiers(&self) -> Option<&[Bson]> {
        match self {
            Self::MissingIdentifiers(ids) => Some(ids),
            _ => None,
        }
    }
}

impl From<bson::oid::Error> for VeneerError {
    fn from(err: bson::oid::Error) -> Self {
        VeneerError::InvalidIdentifier(err.to_string())
    }
}

impl From<bson::ser::Error> for VeneerError {
    fn from(err: bson::ser::Error) -> Self {
        VeneerError::Serialization(err.to_string())
    }
}
