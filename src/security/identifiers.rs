//! SQL Server identifier escaping utilities.
//!
//! Uses SQL Server's bracket notation `[identifier]` to escape table and
//! column names.

use crate::error::ProviderError;

/// Maximum length for SQL Server identifiers.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Escape a SQL Server identifier using bracket notation.
///
/// Schema-qualified names are escaped part by part and embedded right
/// brackets are doubled.
///
/// # Examples
///
/// ```
/// use mssql_feature_provider::security::escape_identifier;
///
/// assert_eq!(escape_identifier("BOX").unwrap(), "[BOX]");
/// assert_eq!(escape_identifier("dbo.BOX").unwrap(), "[dbo].[BOX]");
/// assert_eq!(escape_identifier("Box Name").unwrap(), "[Box Name]");
/// ```
pub fn escape_identifier(identifier: &str) -> Result<String, ProviderError> {
    let (schema, name) = parse_qualified_name(identifier)?;

    match schema {
        Some(schema) => Ok(format!(
            "{}.{}",
            escape_single_identifier(&schema)?,
            escape_single_identifier(&name)?
        )),
        None => escape_single_identifier(&name),
    }
}

/// Escape a single identifier (no dots).
fn escape_single_identifier(identifier: &str) -> Result<String, ProviderError> {
    let trimmed = identifier.trim();

    if trimmed.is_empty() {
        return Err(ProviderError::invalid_input("Identifier cannot be empty"));
    }

    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ProviderError::invalid_input(format!(
            "Identifier exceeds maximum length of {} characters",
            MAX_IDENTIFIER_LENGTH
        )));
    }

    // Only strip brackets when both outer brackets exist
    let clean = if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        &trimmed[1..trimmed.len() - 1]
    } else {
        trimmed
    };

    Ok(format!("[{}]", clean.replace(']', "]]")))
}

/// Escape a column name as one bracket-quoted part.
///
/// Column names are taken verbatim: dots and quotes are part of the name and
/// embedded right brackets are doubled.
///
/// ```
/// use mssql_feature_provider::security::escape_column;
///
/// assert_eq!(escape_column("Box.Name").unwrap(), "[Box.Name]");
/// assert_eq!(escape_column("Owner's").unwrap(), "[Owner's]");
/// ```
pub fn escape_column(column: &str) -> Result<String, ProviderError> {
    if column.trim().is_empty() {
        return Err(ProviderError::invalid_input("Column name cannot be empty"));
    }

    if column.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(ProviderError::invalid_input(format!(
            "Column name exceeds maximum length of {} characters",
            MAX_IDENTIFIER_LENGTH
        )));
    }

    if column.contains('\x00') {
        return Err(ProviderError::invalid_input("Column name contains a null byte"));
    }

    Ok(format!("[{}]", column.replace(']', "]]")))
}

/// Validate that an identifier contains no statement-altering sequences.
pub fn validate_identifier(identifier: &str) -> Result<(), ProviderError> {
    if identifier.trim().is_empty() {
        return Err(ProviderError::invalid_input("Identifier cannot be empty"));
    }

    if identifier.len() > MAX_IDENTIFIER_LENGTH * 2 + 1 {
        return Err(ProviderError::invalid_input(format!(
            "Identifier exceeds maximum length of {} characters",
            MAX_IDENTIFIER_LENGTH
        )));
    }

    let dangerous_patterns = [
        "--",   // SQL comment
        "/*",   // Multi-line comment start
        "*/",   // Multi-line comment end
        ";",    // Statement separator
        "'",    // String delimiter
        "\"",   // Quoted identifier delimiter (we use brackets instead)
        "\\",   // Escape character
        "\x00", // Null byte
    ];

    for pattern in &dangerous_patterns {
        if identifier.contains(pattern) {
            return Err(ProviderError::invalid_input(format!(
                "Identifier contains forbidden character sequence: {}",
                pattern.escape_debug()
            )));
        }
    }

    Ok(())
}

/// Validate and escape an identifier for safe use in SQL.
pub fn safe_identifier(identifier: &str) -> Result<String, ProviderError> {
    validate_identifier(identifier)?;
    escape_identifier(identifier)
}

/// Parse a potentially schema-qualified identifier.
///
/// Returns (schema, name). Schema is None if not specified.
pub fn parse_qualified_name(identifier: &str) -> Result<(Option<String>, String), ProviderError> {
    if identifier.is_empty() {
        return Err(ProviderError::invalid_input("Identifier cannot be empty"));
    }

    if let Some((schema, name)) = identifier.split_once('.') {
        if !schema.is_empty() && !name.is_empty() {
            return Ok((Some(unbracket(schema)), unbracket(name)));
        }
    }

    Ok((None, unbracket(identifier)))
}

fn unbracket(part: &str) -> String {
    let trimmed = part.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}
