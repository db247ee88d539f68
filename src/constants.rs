//! Centralized constants for the SQL Server feature provider.
//!
//! This module contains the default values used throughout the codebase,
//! making them easy to find, understand, and modify.

use std::time::Duration;

// =============================================================================
// Connection Constants
// =============================================================================

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Application name reported to SQL Server.
pub const DEFAULT_APPLICATION_NAME: &str = "mssql-feature-provider";

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Default connection timeout as Duration.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration =
    Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS);

/// Default query timeout as Duration.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS);

// =============================================================================
// Table Layout Constants
// =============================================================================

/// Geometry column used when the provider definition does not name one.
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geom";

/// Result key carrying the geometry's WKT text in selected rows.
pub const GEOMETRY_TEXT_KEY: &str = "__geometry_wkt";

/// SRID assumed for the bbox polygon when neither the configuration nor the
/// table provides one (SQL Server's own default for `geometry`).
pub const UNKNOWN_SRID: i32 = 0;

// =============================================================================
// Paging Constants
// =============================================================================

/// Default number of features returned by a results query.
pub const DEFAULT_LIMIT: usize = 10;

/// Default start index of a results query.
pub const DEFAULT_START_INDEX: usize = 0;

// =============================================================================
// Logging Constants
// =============================================================================

/// Maximum length of SQL text written to debug logs.
pub const MAX_LOGGED_SQL_LENGTH: usize = 200;
