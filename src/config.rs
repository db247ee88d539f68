//! Configuration for the SQL Server feature provider.
//!
//! A provider is configured once, either from the host framework's provider
//! definition or from environment variables following the 12-factor pattern.

use crate::constants::{
    DEFAULT_APPLICATION_NAME, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_CONNECTION_TIMEOUT_SECS,
    DEFAULT_GEOMETRY_COLUMN, DEFAULT_PORT, DEFAULT_QUERY_TIMEOUT, DEFAULT_QUERY_TIMEOUT_SECS,
};
use crate::error::ProviderError;
use crate::security::{escape_column, validate_identifier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Provider configuration, immutable for the provider's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Database connection configuration
    pub database: DatabaseConfig,

    /// Table holding the features (optionally schema-qualified)
    pub table: String,

    /// Column whose value becomes the feature id
    pub id_field: String,

    /// Geometry column
    pub geometry_column: String,

    /// SRID of the stored geometries; discovered from the table when absent
    pub source_srid: Option<i32>,

    /// SRID of the emitted coordinates; no reprojection when absent
    pub target_srid: Option<i32>,

    /// Extra proj4 definitions keyed by SRID
    #[serde(default)]
    pub proj_definitions: HashMap<i32, String>,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQL Server hostname or IP address
    pub host: String,

    /// SQL Server port (default: 1433)
    pub port: u16,

    /// Database name
    pub database: Option<String>,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// Application name sent to SQL Server
    pub application_name: String,

    /// Connect and statement timeouts
    pub timeouts: TimeoutsConfig,
}

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthConfig {
    /// SQL Server authentication (username/password)
    SqlServer { username: String, password: String },

    /// Windows authentication (Integrated Security)
    #[cfg(windows)]
    Windows,
}

/// Timeouts applied to each connection scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Time allowed to open a connection (TCP + TDS login)
    pub connect: Duration,

    /// Time allowed for a single statement, including row retrieval
    pub query: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECTION_TIMEOUT,
            query: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Provider definition as handed over by the host framework.
#[derive(Debug, Deserialize)]
struct ProviderDefinition {
    data: ConnectionData,
    table: String,
    id_field: String,
    #[serde(default)]
    geom_field: Option<String>,
    #[serde(default)]
    source_srid: Option<i32>,
    #[serde(default)]
    target_srid: Option<i32>,
    #[serde(default)]
    proj_definitions: HashMap<i32, String>,
}

/// Connection block of a provider definition.
#[derive(Debug, Deserialize)]
struct ConnectionData {
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    dbname: Option<String>,
    user: String,
    password: String,
    #[serde(default)]
    encrypt: Option<bool>,
    #[serde(default)]
    trust_server_certificate: Option<bool>,
}

impl ProviderConfig {
    /// Build a configuration from a host provider definition.
    ///
    /// ```
    /// use mssql_feature_provider::ProviderConfig;
    ///
    /// let config = ProviderConfig::from_definition(serde_json::json!({
    ///     "data": {"host": "db", "dbname": "gis", "user": "api", "password": "api"},
    ///     "table": "BOX",
    ///     "id_field": "ID",
    ///     "geom_field": "GEOM"
    /// }))
    /// .unwrap();
    /// assert_eq!(config.geometry_column, "GEOM");
    /// assert_eq!(config.database.port, 1433);
    /// ```
    pub fn from_definition(definition: serde_json::Value) -> Result<Self, ProviderError> {
        let def: ProviderDefinition = serde_json::from_value(definition)
            .map_err(|e| ProviderError::config(format!("Invalid provider definition: {}", e)))?;

        let config = ProviderConfig {
            database: DatabaseConfig {
                host: def.data.host,
                port: def.data.port.unwrap_or(DEFAULT_PORT),
                database: def.data.dbname,
                auth: AuthConfig::SqlServer {
                    username: def.data.user,
                    password: def.data.password,
                },
                encrypt: def.data.encrypt.unwrap_or(false),
                trust_server_certificate: def.data.trust_server_certificate.unwrap_or(true),
                application_name: DEFAULT_APPLICATION_NAME.to_string(),
                timeouts: TimeoutsConfig::default(),
            },
            table: def.table,
            id_field: def.id_field,
            geometry_column: def
                .geom_field
                .unwrap_or_else(|| DEFAULT_GEOMETRY_COLUMN.to_string()),
            source_srid: def.source_srid,
            target_srid: def.target_srid,
            proj_definitions: def.proj_definitions,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// ## Required
    /// - `MSSQL_HOST`: SQL Server hostname
    /// - `MSSQL_USER`: SQL Server username
    /// - `MSSQL_PASSWORD`: SQL Server password
    /// - `MSSQL_TABLE`: Feature table
    /// - `MSSQL_ID_FIELD`: Identifier column
    ///
    /// ## Optional
    /// - `MSSQL_PORT`: Port number (default: 1433)
    /// - `MSSQL_DATABASE`: Database name
    /// - `MSSQL_ENCRYPT`: Enable TLS (default: false)
    /// - `MSSQL_TRUST_CERT`: Trust server certificate (default: true)
    /// - `MSSQL_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 30)
    /// - `MSSQL_QUERY_TIMEOUT`: Statement timeout in seconds (default: 30)
    /// - `MSSQL_GEOM_FIELD`: Geometry column (default: geom)
    /// - `MSSQL_SOURCE_SRID`: SRID of stored geometries
    /// - `MSSQL_TARGET_SRID`: SRID of emitted coordinates
    pub fn from_env() -> Result<Self, ProviderError> {
        let host = required_env("MSSQL_HOST")?;
        let username = required_env("MSSQL_USER")?;
        let password = required_env("MSSQL_PASSWORD")?;
        let table = required_env("MSSQL_TABLE")?;
        let id_field = required_env("MSSQL_ID_FIELD")?;

        let port = std::env::var("MSSQL_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database = std::env::var("MSSQL_DATABASE").ok();

        let encrypt = std::env::var("MSSQL_ENCRYPT")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let trust_server_certificate = std::env::var("MSSQL_TRUST_CERT")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(true);

        let connect_timeout_secs = std::env::var("MSSQL_CONNECT_TIMEOUT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS);

        let query_timeout_secs = std::env::var("MSSQL_QUERY_TIMEOUT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS);

        let geometry_column = std::env::var("MSSQL_GEOM_FIELD")
            .unwrap_or_else(|_| DEFAULT_GEOMETRY_COLUMN.to_string());

        let source_srid = optional_srid("MSSQL_SOURCE_SRID")?;
        let target_srid = optional_srid("MSSQL_TARGET_SRID")?;

        let config = ProviderConfig {
            database: DatabaseConfig {
                host,
                port,
                database,
                auth: AuthConfig::SqlServer { username, password },
                encrypt,
                trust_server_certificate,
                application_name: DEFAULT_APPLICATION_NAME.to_string(),
                timeouts: TimeoutsConfig {
                    connect: Duration::from_secs(connect_timeout_secs),
                    query: Duration::from_secs(query_timeout_secs),
                },
            },
            table,
            id_field,
            geometry_column,
            source_srid,
            target_srid,
            proj_definitions: HashMap::new(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check identifiers and timeouts before any connection is attempted.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.database.host.trim().is_empty() {
            return Err(ProviderError::config("Database host cannot be empty"));
        }

        validate_identifier(&self.table)
            .map_err(|e| ProviderError::config(format!("Invalid table: {}", e)))?;

        for (what, name) in [
            ("id_field", &self.id_field),
            ("geometry column", &self.geometry_column),
        ] {
            escape_column(name)
                .map_err(|e| ProviderError::config(format!("Invalid {}: {}", what, e)))?;
        }

        if self.database.timeouts.connect.is_zero() || self.database.timeouts.query.is_zero() {
            return Err(ProviderError::config("Timeouts must be greater than zero"));
        }

        Ok(())
    }
}

fn required_env(name: &str) -> Result<String, ProviderError> {
    std::env::var(name)
        .map_err(|_| ProviderError::config(format!("{} environment variable is required", name)))
}

fn optional_srid(name: &str) -> Result<Option<i32>, ProviderError> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ProviderError::config(format!("{} must be an integer SRID", name))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definition() -> serde_json::Value {
        json!({
            "name": "SQLServer",
            "type": "feature",
            "data": {
                "host": "10.64.32.62",
                "dbname": "test_engdep",
                "user": "api",
                "password": "api"
            },
            "id_field": "ID",
            "table": "BOX",
            "geom_field": "GEOM",
            "target_srid": 4326
        })
    }

    #[test]
    fn test_from_definition() {
        let config = ProviderConfig::from_definition(definition()).unwrap();
        assert_eq!(config.database.host, "10.64.32.62");
        assert_eq!(config.database.database.as_deref(), Some("test_engdep"));
        assert_eq!(config.table, "BOX");
        assert_eq!(config.id_field, "ID");
        assert_eq!(config.geometry_column, "GEOM");
        assert_eq!(config.source_srid, None);
        assert_eq!(config.target_srid, Some(4326));
        assert!(matches!(
            config.database.auth,
            AuthConfig::SqlServer { ref username, .. } if username == "api"
        ));
    }

    #[test]
    fn test_geometry_column_default() {
        let mut def = definition();
        def.as_object_mut().unwrap().remove("geom_field");
        let config = ProviderConfig::from_definition(def).unwrap();
        assert_eq!(config.geometry_column, "geom");
    }

    #[test]
    fn test_missing_table_rejected() {
        let mut def = definition();
        def.as_object_mut().unwrap().remove("table");
        let err = ProviderConfig::from_definition(def).unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn test_unsafe_identifier_rejected() {
        let mut def = definition();
        def["table"] = json!("BOX; DROP TABLE BOX");
        assert!(ProviderConfig::from_definition(def).is_err());
    }

    #[test]
    fn test_quoted_id_field_accepted() {
        let mut def = definition();
        def["id_field"] = json!("Owner's ID");
        let config = ProviderConfig::from_definition(def).unwrap();
        assert_eq!(config.id_field, "Owner's ID");
    }

    #[test]
    fn test_timeout_defaults() {
        let timeouts = TimeoutsConfig::default();
        assert_eq!(timeouts.connect, Duration::from_secs(30));
        assert_eq!(timeouts.query, Duration::from_secs(30));
    }
}
