//! Error types for the SQL Server feature provider.
//!
//! This module defines the provider's error taxonomy together with SQL Server
//! error code classification for readable diagnostics.

use thiserror::Error;

/// Domain-specific errors for the feature provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The database connection could not be established.
    ///
    /// Credential, network and host misconfiguration failures are reported
    /// alike.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A statement failed at the database.
    #[error("Query execution error: {message}")]
    Query {
        message: String,
        statement: String,
        sql_error_code: Option<u32>,
    },

    /// No row matches the requested identifier.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Introspection found a column type outside the type table.
    #[error("Unsupported type '{data_type}' for column '{column}'")]
    UnsupportedType { column: String, data_type: String },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not offered by this provider.
    #[error("Operation not implemented: {0}")]
    NotImplemented(&'static str),

    /// Timeout
    #[error("Timeout: {operation} exceeded {seconds} seconds")]
    Timeout { operation: &'static str, seconds: u64 },

    /// Coordinate transformation failure.
    #[error("Reprojection error: {0}")]
    Reprojection(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error for a statement.
    pub fn query(statement: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
            statement: statement.into(),
            sql_error_code: None,
        }
    }

    /// Wrap a driver failure raised while running `statement`.
    pub fn query_failed(statement: impl Into<String>, err: tiberius::error::Error) -> Self {
        let statement = statement.into();
        match &err {
            tiberius::error::Error::Server(token) => Self::Query {
                message: describe_sql_error(token.code(), token.message()),
                statement,
                sql_error_code: Some(token.code()),
            },
            _ => Self::Query {
                message: err.to_string(),
                statement,
                sql_error_code: None,
            },
        }
    }

    /// Create an item not found error.
    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::ItemNotFound(id.into())
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(column: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self::UnsupportedType {
            column: column.into(),
            data_type: data_type.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(operation: &'static str, seconds: u64) -> Self {
        Self::Timeout { operation, seconds }
    }

    /// Create a reprojection error.
    pub fn reprojection(msg: impl Into<String>) -> Self {
        Self::Reprojection(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The statement text attached to a query error, if any.
    pub fn statement(&self) -> Option<&str> {
        match self {
            Self::Query { statement, .. } => Some(statement),
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check the provider definition or environment variables"),
            Self::Connection { .. } => {
                Some("Check server hostname, port, credentials and network connectivity")
            }
            Self::Query { .. } => Some("Check the table, column and geometry column names"),
            Self::UnsupportedType { .. } => {
                Some("Exclude the column from the table or expose it through a view with a supported type")
            }
            Self::Timeout { .. } => Some("Narrow the query or increase the timeout"),
            Self::Reprojection(_) => {
                Some("Add a proj4 definition for the SRID to the provider configuration")
            }
            _ => None,
        }
    }
}

/// Prefix a SQL Server error message with its category.
pub fn describe_sql_error(code: u32, message: &str) -> String {
    match code {
        102 => format!("Syntax error: {}", message),
        207 => format!("Invalid column: {}", message),
        208 => format!("Invalid object: {}", message),
        229 | 230 => format!("Permission denied: {}", message),
        245 => format!("Conversion failed: {}", message),
        6522 => format!("Spatial (CLR) error: {}", message),
        8115 => format!("Arithmetic overflow: {}", message),
        _ => message.to_string(),
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(e: std::io::Error) -> Self {
        ProviderError::connection_with_source(format!("IO error: {}", e.kind()), e)
    }
}
