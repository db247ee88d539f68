//! Identifier handling for SQL text the provider assembles itself.
//!
//! Values always travel as bound parameters; only table and column names are
//! written into statements, and those go through this module. Table names
//! may be schema-qualified; column names are always a single part.

mod identifiers;

pub use identifiers::{
    escape_column, escape_identifier, parse_qualified_name, safe_identifier, validate_identifier,
};
