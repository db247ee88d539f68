//! SQL Server type mapping to Rust and JSON values.

use crate::error::ProviderError;
use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use tiberius::Row;
use uuid::Uuid;

/// Semantic type of a non-spatial column.
///
/// The set is closed: [`FieldType::from_native`] rejects anything it does not
/// list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Float,
    Decimal,
    Boolean,
    String,
    Uuid,
    Date,
    Datetime,
}

impl FieldType {
    /// Map a native `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE` name.
    pub fn from_native(data_type: &str) -> Option<Self> {
        let ty = match data_type.to_ascii_lowercase().as_str() {
            "bigint" | "int" | "smallint" | "tinyint" => Self::Integer,
            "float" | "real" => Self::Float,
            "decimal" | "numeric" => Self::Decimal,
            "bit" => Self::Boolean,
            "nvarchar" | "varchar" | "nchar" | "char" | "ntext" | "text" => Self::String,
            "uniqueidentifier" => Self::Uuid,
            "date" => Self::Date,
            "datetime" | "datetime2" | "smalldatetime" => Self::Datetime,
            _ => return None,
        };
        Some(ty)
    }

    /// Get the type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Datetime => "datetime",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One introspected column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Native SQL Server type name, as reported by the catalog.
    #[serde(rename = "type")]
    pub native_type: String,

    /// Semantic type derived from the native type.
    pub field_type: FieldType,
}

impl FieldDescriptor {
    /// Describe a column, failing on types outside the mapping table.
    pub fn new(column: &str, native_type: &str) -> Result<Self, ProviderError> {
        let field_type = FieldType::from_native(native_type)
            .ok_or_else(|| ProviderError::unsupported_type(column, native_type))?;
        Ok(Self {
            native_type: native_type.to_string(),
            field_type,
        })
    }
}

/// A SQL value that can be serialized to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Decimal(Decimal),
    String(String),
    Uuid(Uuid),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::I32(v) => Some(i64::from(*v)),
            SqlValue::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// String view of the value, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Convert to the JSON value emitted in feature properties.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(v) => Value::Bool(*v),
            SqlValue::I32(v) => Value::from(*v),
            SqlValue::I64(v) => Value::from(*v),
            SqlValue::F64(v) => Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Decimal(v) => v
                .to_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(v.to_string())),
            SqlValue::String(v) => Value::String(v.clone()),
            SqlValue::Uuid(v) => Value::String(v.to_string()),
            SqlValue::Date(v) => Value::String(v.format("%Y-%m-%d").to_string()),
            SqlValue::DateTime(v) => Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        }
    }

    /// Convert to a display string.
    pub fn to_display_string(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(v) => v.to_string(),
            SqlValue::I32(v) => v.to_string(),
            SqlValue::I64(v) => v.to_string(),
            SqlValue::F64(v) => v.to_string(),
            SqlValue::Decimal(v) => v.to_string(),
            SqlValue::String(v) => v.clone(),
            SqlValue::Uuid(v) => v.to_string(),
            SqlValue::Date(v) => v.to_string(),
            SqlValue::DateTime(v) => v.to_string(),
        }
    }
}

/// Type mapper for converting SQL Server row values.
pub struct TypeMapper;

impl TypeMapper {
    /// Extract a value from a Tiberius row column.
    pub fn extract_column(row: &Row, idx: usize) -> SqlValue {
        if row.columns().get(idx).is_none() {
            return SqlValue::Null;
        }

        // Strings (most common, also carries WKT text)
        if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
            return SqlValue::String(v.to_string());
        }

        // Integers
        if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
            return SqlValue::I32(v);
        }
        if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
            return SqlValue::I64(v);
        }
        if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
            return SqlValue::I32(i32::from(v));
        }
        if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
            return SqlValue::I32(i32::from(v));
        }

        // Floating point
        if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
            return SqlValue::F64(v);
        }
        if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
            return SqlValue::F64(f64::from(v));
        }

        if let Some(v) = row.try_get::<Decimal, _>(idx).ok().flatten() {
            return SqlValue::Decimal(v);
        }

        if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
            return SqlValue::Bool(v);
        }

        if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
            return SqlValue::Uuid(v);
        }

        // Date/Time types
        if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
            return SqlValue::DateTime(v);
        }
        if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
            return SqlValue::Date(v);
        }

        // NULL, or a type the provider never selects
        SqlValue::Null
    }
}
