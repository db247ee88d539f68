//! Statement assembly and execution.

use crate::constants::{GEOMETRY_TEXT_KEY, MAX_LOGGED_SQL_LENGTH};
use crate::database::connection::ConnectionScope;
use crate::database::types::SqlValue;
use crate::error::ProviderError;
use crate::predicate::WhereClause;
use crate::security::{escape_column, safe_identifier};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// A value bound to an `@Pn` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

/// A parameterized T-SQL statement.
///
/// Placeholders are numbered in bind order, starting at `@P1`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    /// Statement text.
    pub sql: String,

    /// Bound values, in placeholder order.
    pub params: Vec<SqlParam>,
}

impl Statement {
    /// Create a statement without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Start a statement from `prefix` followed by an optional WHERE clause.
    ///
    /// The clause's placeholders stay valid because its parameters are the
    /// first ones bound.
    pub fn with_where(prefix: impl Into<String>, filter: &WhereClause) -> Self {
        let mut sql = prefix.into();
        if !filter.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.sql);
        }
        Self {
            sql,
            params: filter.params.clone(),
        }
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("@P{}", self.params.len())
    }

    /// Append raw SQL text.
    pub fn push_sql(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    /// Build the driver query with all parameters bound.
    pub fn to_query(&self) -> tiberius::Query<'_> {
        let mut query = tiberius::Query::new(self.sql.as_str());
        for param in &self.params {
            match param {
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Bool(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.as_str()),
            }
        }
        query
    }
}

/// A single row of query results, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    columns: Vec<(String, SqlValue)>,
}

impl ResultRow {
    /// Create a new result row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Insert a value, replacing an existing column of the same name.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Remove a column and return its value.
    pub fn take(&mut self, column: &str) -> Option<SqlValue> {
        let idx = self.columns.iter().position(|(name, _)| name == column)?;
        Some(self.columns.remove(idx).1)
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate over columns in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl IntoIterator for ResultRow {
    type Item = (String, SqlValue);
    type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, SqlValue)> for ResultRow {
    fn from_iter<I: IntoIterator<Item = (K, SqlValue)>>(iter: I) -> Self {
        let mut row = ResultRow::new();
        for (name, value) in iter {
            row.insert(name, value);
        }
        row
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    /// Column name (unescaped).
    pub column: String,
    /// Sort descending.
    pub descending: bool,
}

/// Skip `offset` rows, then return at most `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// Columns and shape of a feature SELECT.
#[derive(Debug, Clone, Default)]
pub struct SelectSpec<'a> {
    /// Non-geometry columns to return.
    pub columns: Vec<&'a str>,
    /// Whether to return the geometry as WKT under the reserved key.
    pub with_geometry: bool,
    /// Ordering; required for paging and defaulted when empty.
    pub order: Vec<OrderTerm>,
    /// Server-side paging.
    pub page: Option<Page>,
}

/// Builds and runs count and feature statements against one table.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    table: String,
    geometry_column: String,
}

impl QueryExecutor {
    /// Create an executor for `table` with its geometry column.
    pub fn new(table: &str, geometry_column: &str) -> Result<Self, ProviderError> {
        Ok(Self {
            table: safe_identifier(table)?,
            geometry_column: escape_column(geometry_column)?,
        })
    }

    /// The escaped geometry column.
    pub fn geometry_column(&self) -> &str {
        &self.geometry_column
    }

    /// `SELECT COUNT_BIG(*)` over the filtered table.
    pub fn count_statement(&self, filter: &WhereClause) -> Statement {
        Statement::with_where(
            format!("SELECT COUNT_BIG(*) AS hits FROM {}", self.table),
            filter,
        )
    }

    /// Feature SELECT over the filtered table.
    pub fn select_statement(
        &self,
        spec: &SelectSpec<'_>,
        filter: &WhereClause,
    ) -> Result<Statement, ProviderError> {
        let mut projection = spec
            .columns
            .iter()
            .map(|c| escape_column(c))
            .collect::<Result<Vec<_>, _>>()?;
        if spec.with_geometry {
            projection.push(format!(
                "{}.STAsText() AS [{}]",
                self.geometry_column, GEOMETRY_TEXT_KEY
            ));
        }
        if projection.is_empty() {
            return Err(ProviderError::invalid_input("No columns to select"));
        }

        let mut statement = Statement::with_where(
            format!("SELECT {} FROM {}", projection.join(", "), self.table),
            filter,
        );

        let order = order_by(&spec.order)?;
        if let Some(page) = spec.page {
            let offset = statement.bind(SqlParam::Int(page_bound("offset", page.offset)?));
            let limit = statement.bind(SqlParam::Int(page_bound("limit", page.limit)?));
            statement.push_sql(&format!(
                " ORDER BY {} OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
                order.as_deref().unwrap_or("(SELECT NULL)"),
                offset,
                limit
            ));
        } else if let Some(order) = order {
            statement.push_sql(&format!(" ORDER BY {}", order));
        }

        Ok(statement)
    }

    /// Run a count statement.
    pub async fn count(
        &self,
        scope: &mut ConnectionScope,
        filter: &WhereClause,
    ) -> Result<u64, ProviderError> {
        let statement = self.count_statement(filter);
        let rows = self.fetch(scope, &statement).await?;

        let hits = rows
            .first()
            .and_then(|row| row.get("hits"))
            .and_then(SqlValue::as_i64)
            .ok_or_else(|| ProviderError::query(&statement.sql, "Count returned no value"))?;

        u64::try_from(hits)
            .map_err(|_| ProviderError::query(&statement.sql, "Count returned a negative value"))
    }

    /// Run a statement and return its rows.
    pub async fn fetch(
        &self,
        scope: &mut ConnectionScope,
        statement: &Statement,
    ) -> Result<Vec<ResultRow>, ProviderError> {
        let start = Instant::now();

        debug!(
            "Executing query: {} ({} params)",
            truncate_for_log(&statement.sql, MAX_LOGGED_SQL_LENGTH),
            statement.params.len()
        );

        let rows = scope.fetch(statement).await?;

        debug!(
            "Query completed: {} rows in {} ms",
            rows.len(),
            start.elapsed().as_millis()
        );

        Ok(rows)
    }
}

fn page_bound(what: &str, value: usize) -> Result<i64, ProviderError> {
    i64::try_from(value).map_err(|_| {
        ProviderError::invalid_input(format!("Page {} {} is out of range", what, value))
    })
}

fn order_by(order: &[OrderTerm]) -> Result<Option<String>, ProviderError> {
    if order.is_empty() {
        return Ok(None);
    }
    let terms = order
        .iter()
        .map(|term| {
            escape_column(&term.column)
                .map(|col| format!("{} {}", col, if term.descending { "DESC" } else { "ASC" }))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(terms.join(", ")))
}

/// Truncate a string for logging purposes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor() -> QueryExecutor {
        QueryExecutor::new("BOX", "GEOM").unwrap()
    }

    #[test]
    fn test_result_row() {
        let mut row = ResultRow::new();
        row.insert("ID", SqlValue::I32(1));
        row.insert("Box", SqlValue::String("ZB41".to_string()));

        assert_eq!(row.get("ID"), Some(&SqlValue::I32(1)));
        assert!(row.get("missing").is_none());

        row.insert("ID", SqlValue::I32(2));
        assert_eq!(row.len(), 2);
        assert_eq!(row.take("ID"), Some(SqlValue::I32(2)));
        assert_eq!(row.len(), 1);
        assert_eq!(row.iter().next().map(|(k, _)| k), Some("Box"));
    }

    #[test]
    fn test_statement_bind_numbers_placeholders() {
        let mut statement = Statement::new("SELECT 1");
        assert_eq!(statement.bind(SqlParam::Int(1)), "@P1");
        assert_eq!(statement.bind(SqlParam::Text("a".into())), "@P2");
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn test_count_statement() {
        let statement = executor().count_statement(&WhereClause::default());
        assert_eq!(statement.sql, "SELECT COUNT_BIG(*) AS hits FROM [BOX]");
        assert!(statement.params.is_empty());

        let filter = WhereClause {
            sql: "[Box] = @P1".to_string(),
            params: vec![SqlParam::Text("ZB41".to_string())],
        };
        let statement = executor().count_statement(&filter);
        assert_eq!(
            statement.sql,
            "SELECT COUNT_BIG(*) AS hits FROM [BOX] WHERE [Box] = @P1"
        );
        assert_eq!(statement.params, filter.params);
    }

    #[test]
    fn test_select_statement_paging_follows_filter_params() {
        let filter = WhereClause {
            sql: "[Box] = @P1".to_string(),
            params: vec![SqlParam::Text("ZB41".to_string())],
        };
        let spec = SelectSpec {
            columns: vec!["ID", "Box"],
            with_geometry: true,
            order: vec![OrderTerm {
                column: "ID".to_string(),
                descending: false,
            }],
            page: Some(Page {
                offset: 5,
                limit: 10,
            }),
        };
        let statement = executor().select_statement(&spec, &filter).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT [ID], [Box], [GEOM].STAsText() AS [__geometry_wkt] FROM [BOX] \
             WHERE [Box] = @P1 ORDER BY [ID] ASC OFFSET @P2 ROWS FETCH NEXT @P3 ROWS ONLY"
        );
        assert_eq!(
            statement.params,
            vec![
                SqlParam::Text("ZB41".to_string()),
                SqlParam::Int(5),
                SqlParam::Int(10)
            ]
        );
    }

    #[test]
    fn test_select_statement_without_geometry_or_page() {
        let spec = SelectSpec {
            columns: vec!["ID"],
            ..Default::default()
        };
        let statement = executor()
            .select_statement(&spec, &WhereClause::default())
            .unwrap();
        assert_eq!(statement.sql, "SELECT [ID] FROM [BOX]");
    }

    #[test]
    fn test_select_statement_quotes_columns_as_one_part() {
        let spec = SelectSpec {
            columns: vec!["Box.Name", "Owner's"],
            order: vec![OrderTerm {
                column: "Box.Name".to_string(),
                descending: true,
            }],
            ..Default::default()
        };
        let statement = executor()
            .select_statement(&spec, &WhereClause::default())
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT [Box.Name], [Owner's] FROM [BOX] ORDER BY [Box.Name] DESC"
        );
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_select_statement_rejects_oversized_page() {
        let spec = SelectSpec {
            columns: vec!["ID"],
            page: Some(Page {
                offset: usize::MAX,
                limit: 10,
            }),
            ..Default::default()
        };
        let err = executor()
            .select_statement(&spec, &WhereClause::default())
            .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }

    #[test]
    fn test_select_statement_needs_columns() {
        let spec = SelectSpec::default();
        assert!(executor()
            .select_statement(&spec, &WhereClause::default())
            .is_err());
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("short", 10), "short");
        assert_eq!(truncate_for_log("this is a long string", 10), "this is a ...");
    }
}
