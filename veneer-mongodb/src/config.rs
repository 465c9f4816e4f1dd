//! MongoDB client configuration.
//!
//! Registered connections carry their client options as a plain document.
//! [`MongoConfig::from_options`] reads the keys it knows and rejects the
//! rest, so a typo fails the connection instead of being silently ignored.

use std::time::Duration;

use bson::{Bson, Document};
use mongodb::options::{
    Acknowledgment, ClientOptions, ReadPreference as DriverReadPreference, SelectionCriteria,
    WriteConcern as DriverWriteConcern,
};
use veneer_core::{VeneerError, VeneerResult};

/// Default server address.
pub const DEFAULT_URI: &str = "mongodb://localhost:27017";

/// Default server port, used when only `host` is given.
pub const DEFAULT_PORT: u16 = 27017;

/// MongoDB client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MongoConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Minimum connection pool size.
    pub min_pool_size: Option<u32>,
    /// Maximum connection pool size.
    pub max_pool_size: Option<u32>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// Read preference.
    pub read_preference: Option<ReadPreference>,
    /// Write concern.
    pub write_concern: Option<WriteConcern>,
    /// Retry writes.
    pub retry_writes: Option<bool>,
    /// Retry reads.
    pub retry_reads: Option<bool>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
}

/// MongoDB read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPreference {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadPreference {
    /// Parse a read preference name, in either camel or snake case.
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().replace('_', "").as_str() {
            "primary" => Some(Self::Primary),
            "primarypreferred" => Some(Self::PrimaryPreferred),
            "secondary" => Some(Self::Secondary),
            "secondarypreferred" => Some(Self::SecondaryPreferred),
            "nearest" => Some(Self::Nearest),
            _ => None,
        }
    }

    fn to_driver(self) -> DriverReadPreference {
        match self {
            Self::Primary => DriverReadPreference::Primary,
            Self::PrimaryPreferred => DriverReadPreference::PrimaryPreferred {
                options: Default::default(),
            },
            Self::Secondary => DriverReadPreference::Secondary {
                options: Default::default(),
            },
            Self::SecondaryPreferred => DriverReadPreference::SecondaryPreferred {
                options: Default::default(),
            },
            Self::Nearest => DriverReadPreference::Nearest {
                options: Default::default(),
            },
        }
    }
}

/// MongoDB write concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteConcern {
    /// Acknowledge writes from the specified number of nodes.
    W(u32),
    /// Acknowledge writes from majority of nodes.
    Majority,
    /// Custom tag set.
    Custom(String),
}

impl WriteConcern {
    fn to_driver(&self) -> DriverWriteConcern {
        let w = match self {
            Self::W(n) => Acknowledgment::Nodes(*n),
            Self::Majority => Acknowledgment::Majority,
            Self::Custom(tag) => Acknowledgment::Custom(tag.clone()),
        };
        DriverWriteConcern::builder().w(w).build()
    }
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            app_name: Some("veneer".to_string()),
            min_pool_size: None,
            max_pool_size: None,
            connect_timeout: None,
            server_selection_timeout: None,
            read_preference: None,
            write_concern: None,
            retry_writes: None,
            retry_reads: None,
            direct_connection: None,
        }
    }
}

impl MongoConfig {
    /// Create a configuration for a MongoDB URI.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Create a builder for configuration.
    pub fn builder() -> MongoConfigBuilder {
        MongoConfigBuilder::new()
    }

    /// Read a configuration from a registered option document.
    ///
    /// `host` may be a bare host name (combined with `port`) or a full
    /// `mongodb://` URI. Timeouts are given in milliseconds.
    pub fn from_options(options: &Document) -> VeneerResult<Self> {
        let mut builder = Self::builder();
        let mut host = None;
        let mut port = None;

        for (key, value) in options {
            builder = match key.as_str() {
                "uri" => builder.uri(string(key, value)?),
                "host" => {
                    host = Some(string(key, value)?);
                    builder
                }
                "port" => {
                    port = Some(
                        u16::try_from(integer(key, value)?)
                            .map_err(|_| invalid(key, value))?,
                    );
                    builder
                }
                "app_name" => builder.app_name(string(key, value)?),
                "min_pool_size" => builder.min_pool_size(small(key, value)?),
                "max_pool_size" => builder.max_pool_size(small(key, value)?),
                "connect_timeout_ms" => builder.connect_timeout(millis(key, value)?),
                "server_selection_timeout_ms" => {
                    builder.server_selection_timeout(millis(key, value)?)
                }
                "direct_connection" => builder.direct_connection(boolean(key, value)?),
                "retry_writes" => builder.retry_writes(boolean(key, value)?),
                "retry_reads" => builder.retry_reads(boolean(key, value)?),
                "read_preference" => {
                    let name = string(key, value)?;
                    builder.read_preference(
                        ReadPreference::parse(&name).ok_or_else(|| invalid(key, value))?,
                    )
                }
                "w" => builder.write_concern(match value {
                    Bson::String(s) if s == "majority" => WriteConcern::Majority,
                    Bson::String(s) => WriteConcern::Custom(s.clone()),
                    other => WriteConcern::W(small(key, other)?),
                }),
                unknown => {
                    return Err(VeneerError::config(format!(
                        "unexpected option '{}' for mongodb client",
                        unknown
                    )));
                }
            };
        }

        match (host, port) {
            (Some(host), _) if host.starts_with("mongodb://") || host.starts_with("mongodb+srv://") => {
                builder = builder.uri(host);
            }
            (Some(host), port) => {
                builder = builder.uri(format!(
                    "mongodb://{}:{}",
                    host,
                    port.unwrap_or(DEFAULT_PORT)
                ));
            }
            (None, Some(port)) => {
                builder = builder.uri(format!("mongodb://localhost:{}", port));
            }
            (None, None) => {}
        }

        Ok(builder.build())
    }

    /// Convert to MongoDB ClientOptions.
    pub async fn to_client_options(&self) -> VeneerResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| VeneerError::config(format!("failed to parse URI: {}", e)))?;

        if let Some(ref app_name) = self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(min_pool) = self.min_pool_size {
            options.min_pool_size = Some(min_pool);
        }
        if let Some(max_pool) = self.max_pool_size {
            options.max_pool_size = Some(max_pool);
        }
        if let Some(connect_timeout) = self.connect_timeout {
            options.connect_timeout = Some(connect_timeout);
        }
        if let Some(selection_timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(selection_timeout);
        }
        if let Some(read_pref) = self.read_preference {
            options.selection_criteria = Some(SelectionCriteria::ReadPreference(read_pref.to_driver()));
        }
        if let Some(ref wc) = self.write_concern {
            options.write_concern = Some(wc.to_driver());
        }
        if let Some(retry_writes) = self.retry_writes {
            options.retry_writes = Some(retry_writes);
        }
        if let Some(retry_reads) = self.retry_reads {
            options.retry_reads = Some(retry_reads);
        }
        if let Some(direct) = self.direct_connection {
            options.direct_connection = Some(direct);
        }

        Ok(options)
    }
}

fn invalid(key: &str, value: &Bson) -> VeneerError {
    VeneerError::config(format!("invalid value {} for option '{}'", value, key))
}

fn string(key: &str, value: &Bson) -> VeneerResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| invalid(key, value))
}

fn boolean(key: &str, value: &Bson) -> VeneerResult<bool> {
    value.as_bool().ok_or_else(|| invalid(key, value))
}

fn integer(key: &str, value: &Bson) -> VeneerResult<u64> {
    let n = match value {
        Bson::Int32(n) => i64::from(*n),
        Bson::Int64(n) => *n,
        _ => return Err(invalid(key, value)),
    };
    u64::try_from(n).map_err(|_| invalid(key, value))
}

fn small(key: &str, value: &Bson) -> VeneerResult<u32> {
    u32::try_from(integer(key, value)?).map_err(|_| invalid(key, value))
}

fn millis(key: &str, value: &Bson) -> VeneerResult<Duration> {
    integer(key, value).map(Duration::from_millis)
}

/// Builder for MongoDB configuration.
#[derive(Debug, Default)]
pub struct MongoConfigBuilder {
    uri: Option<String>,
    app_name: Option<String>,
    min_pool_size: Option<u32>,
    max_pool_size: Option<u32>,
    connect_timeout: Option<Duration>,
    server_selection_timeout: Option<Duration>,
    read_preference: Option<ReadPreference>,
    write_concern: Option<WriteConcern>,
    retry_writes: Option<bool>,
    retry_reads: Option<bool>,
    direct_connection: Option<bool>,
}

impl MongoConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the MongoDB URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.min_pool_size = Some(size);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, duration: Duration) -> Self {
        self.connect_timeout = Some(duration);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, duration: Duration) -> Self {
        self.server_selection_timeout = Some(duration);
        self
    }

    /// Set the read preference.
    pub fn read_preference(mut self, pref: ReadPreference) -> Self {
        self.read_preference = Some(pref);
        self
    }

    /// Set the write concern.
    pub fn write_concern(mut self, wc: WriteConcern) -> Self {
        self.write_concern = Some(wc);
        self
    }

    /// Enable or disable retry writes.
    pub fn retry_writes(mut self, enabled: bool) -> Self {
        self.retry_writes = Some(enabled);
        self
    }

    /// Enable or disable retry reads.
    pub fn retry_reads(mut self, enabled: bool) -> Self {
        self.retry_reads = Some(enabled);
        self
    }

    /// Enable direct connection (bypass replica set discovery).
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.direct_connection = Some(enabled);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> MongoConfig {
        let defaults = MongoConfig::default();
        MongoConfig {
            uri: self.uri.unwrap_or(defaults.uri),
            app_name: self.app_name.or(defaults.app_name),
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
            connect_timeout: self.connect_timeout,
            server_selection_timeout: self.server_selection_timeout,
            read_preference: self.read_preference,
            write_concern: self.write_concern,
            retry_writes: self.retry_writes,
            retry_reads: self.retry_reads,
            direct_connection: self.direct_connection,
        }
    }
}
