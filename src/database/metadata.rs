//! Table schema introspection.
//!
//! Discovers the non-spatial columns of the feature table and the SRID of
//! its geometry column.

use crate::database::connection::ConnectionScope;
use crate::database::query::{QueryExecutor, ResultRow, SqlParam, Statement};
use crate::database::types::{FieldDescriptor, SqlValue};
use crate::error::ProviderError;
use crate::security::{escape_column, parse_qualified_name, safe_identifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Column name to descriptor, for every non-spatial column.
pub type FieldMap = BTreeMap<String, FieldDescriptor>;

/// What the provider knows about its table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Non-spatial column names in ordinal order.
    pub columns: Vec<String>,

    /// Descriptors keyed by column name.
    pub fields: FieldMap,

    /// SRID of the geometry column, read from one row. `None` when the
    /// table holds no geometry yet.
    pub srid: Option<i32>,
}

impl TableSchema {
    /// Look up a column.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }
}

/// Reads column and SRID metadata for one table.
#[derive(Debug, Clone)]
pub struct SchemaIntrospector {
    schema: Option<String>,
    name: String,
    table: String,
    geometry_column: String,
}

impl SchemaIntrospector {
    /// Create an introspector for `table` and its geometry column.
    pub fn new(table: &str, geometry_column: &str) -> Result<Self, ProviderError> {
        let (schema, name) = parse_qualified_name(table)?;
        Ok(Self {
            schema,
            name,
            table: safe_identifier(table)?,
            geometry_column: escape_column(geometry_column)?,
        })
    }

    /// Catalog query for the table's non-spatial columns.
    pub fn columns_statement(&self) -> Statement {
        let mut statement = Statement::new(
            "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = ",
        );
        let name = statement.bind(SqlParam::Text(self.name.clone()));
        statement.push_sql(&name);
        if let Some(schema) = &self.schema {
            let schema = statement.bind(SqlParam::Text(schema.clone()));
            statement.push_sql(&format!(" AND TABLE_SCHEMA = {}", schema));
        }
        statement.push_sql(
            " AND DATA_TYPE NOT IN ('geometry', 'geography') ORDER BY ORDINAL_POSITION",
        );
        statement
    }

    /// Query reading the SRID from one stored geometry.
    ///
    /// All rows are assumed to share it; mixed SRIDs are not detected.
    pub fn srid_statement(&self) -> Statement {
        Statement::new(format!(
            "SELECT TOP 1 {geom}.STSrid AS srid FROM {table} WHERE {geom} IS NOT NULL",
            geom = self.geometry_column,
            table = self.table
        ))
    }

    /// Read the table's schema over an open connection.
    pub async fn introspect(
        &self,
        executor: &QueryExecutor,
        scope: &mut ConnectionScope,
    ) -> Result<TableSchema, ProviderError> {
        debug!("Introspecting table {}", self.table);

        let rows = executor.fetch(scope, &self.columns_statement()).await?;
        let (columns, fields) = build_fields(&rows)?;

        let srid = executor
            .fetch(scope, &self.srid_statement())
            .await?
            .first()
            .and_then(|row| row.get("srid"))
            .and_then(SqlValue::as_i64)
            .and_then(|v| i32::try_from(v).ok());

        info!(
            "Table {}: {} fields, geometry SRID {:?}",
            self.table,
            fields.len(),
            srid
        );

        Ok(TableSchema {
            columns,
            fields,
            srid,
        })
    }
}

fn build_fields(rows: &[ResultRow]) -> Result<(Vec<String>, FieldMap), ProviderError> {
    let mut columns = Vec::with_capacity(rows.len());
    let mut fields = FieldMap::new();

    for row in rows {
        let name = extract_string(row, "COLUMN_NAME")
            .ok_or_else(|| ProviderError::internal("Catalog row without COLUMN_NAME"))?;
        let data_type = extract_string(row, "DATA_TYPE")
            .ok_or_else(|| ProviderError::internal("Catalog row without DATA_TYPE"))?;

        let descriptor = FieldDescriptor::new(&name, &data_type)?;
        columns.push(name.clone());
        fields.insert(name, descriptor);
    }

    Ok((columns, fields))
}

fn extract_string(row: &ResultRow, column: &str) -> Option<String> {
    match row.get(column)? {
        SqlValue::String(s) => Some(s.clone()),
        SqlValue::Null => None,
        other => Some(other.to_display_string()),
    }
}
