//! WHERE clause compilation.
//!
//! Attribute filters become equality tests on known columns and a bounding
//! box becomes a spatial containment test in the table's SRID. Values are
//! always bound as parameters.

use crate::database::{FieldDescriptor, FieldType, SqlParam, TableSchema};
use crate::error::ProviderError;
use crate::security::escape_column;
use geo_types::{LineString, Polygon};
use serde::{Deserialize, Serialize};
use tracing::debug;
use wkt::ToWkt;

/// A bounding box `[minx, miny, maxx, maxy]` in the table's SRID.
///
/// Ordering of the bounds is not checked; an inverted box simply matches
/// nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a bounding box from its four bounds.
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self {
            minx,
            miny,
            maxx,
            maxy,
        }
    }

    /// Read a host-supplied bbox list. An empty list means no bbox.
    pub fn from_slice(values: &[f64]) -> Result<Option<Self>, ProviderError> {
        match values {
            [] => Ok(None),
            [minx, miny, maxx, maxy] => Ok(Some(Self::new(*minx, *miny, *maxx, *maxy))),
            _ => Err(ProviderError::invalid_input(format!(
                "bbox needs 4 values (minx, miny, maxx, maxy), got {}",
                values.len()
            ))),
        }
    }

    /// The four bounds, in `[minx, miny, maxx, maxy]` order.
    pub fn bounds(&self) -> [f64; 4] {
        [self.minx, self.miny, self.maxx, self.maxy]
    }

    /// Reject NaN and infinite bounds.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.bounds().iter().all(|v| v.is_finite()) {
            Ok(())
        } else {
            Err(ProviderError::invalid_input(
                "bbox coordinates must be finite numbers",
            ))
        }
    }

    /// The box as a closed five-point WKT polygon.
    pub fn to_wkt(&self) -> String {
        let ring = LineString::from(vec![
            (self.maxx, self.miny),
            (self.maxx, self.maxy),
            (self.minx, self.maxy),
            (self.minx, self.miny),
            (self.maxx, self.miny),
        ]);
        Polygon::new(ring, vec![]).wkt_string()
    }
}

/// A compiled WHERE clause body (without the `WHERE` keyword).
///
/// Placeholders are numbered from `@P1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl WhereClause {
    /// Whether no predicate applies.
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("@P{}", self.params.len())
    }
}

/// Compiles attribute filters and a bbox against one table.
pub struct PredicateCompiler<'a> {
    schema: &'a TableSchema,
    geometry_column: String,
    srid: i32,
}

impl<'a> PredicateCompiler<'a> {
    /// Create a compiler for `schema`, with bbox polygons built in `srid`.
    pub fn new(
        schema: &'a TableSchema,
        geometry_column: &str,
        srid: i32,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            schema,
            geometry_column: escape_column(geometry_column)?,
            srid,
        })
    }

    /// Compile filters (in input order) and an optional bbox, joined by AND.
    ///
    /// Returns an empty clause when nothing applies.
    pub fn compile(
        &self,
        filters: &[(String, String)],
        bbox: Option<&BoundingBox>,
    ) -> Result<WhereClause, ProviderError> {
        let mut clause = WhereClause::default();
        let mut conditions = Vec::with_capacity(filters.len() + 1);

        for (name, value) in filters {
            let field = self.schema.field(name).ok_or_else(|| {
                ProviderError::invalid_input(format!("Unknown property '{}'", name))
            })?;
            let param = coerce_value(name, field, value)?;
            let column = escape_column(name)?;
            let placeholder = clause.bind(param);
            conditions.push(format!("{} = {}", column, placeholder));
        }

        if let Some(bbox) = bbox {
            bbox.validate()?;
            let polygon = clause.bind(SqlParam::Text(bbox.to_wkt()));
            let srid = clause.bind(SqlParam::Int(i64::from(self.srid)));
            conditions.push(format!(
                "geometry::STGeomFromText({}, {}).STContains({}) = 1",
                polygon, srid, self.geometry_column
            ));
        }

        clause.sql = conditions.join(" AND ");
        debug!("Compiled WHERE clause: {:?}", clause.sql);
        Ok(clause)
    }
}

/// Convert a textual filter value to a parameter of the column's type.
pub fn coerce_value(
    name: &str,
    field: &FieldDescriptor,
    value: &str,
) -> Result<SqlParam, ProviderError> {
    let mismatch = || {
        ProviderError::invalid_input(format!(
            "Value '{}' is not a valid {} for property '{}'",
            value, field.field_type, name
        ))
    };

    let param = match field.field_type {
        FieldType::Integer => SqlParam::Int(value.trim().parse().map_err(|_| mismatch())?),
        FieldType::Float => {
            let v: f64 = value.trim().parse().map_err(|_| mismatch())?;
            if !v.is_finite() {
                return Err(mismatch());
            }
            SqlParam::Float(v)
        }
        FieldType::Boolean => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => SqlParam::Bool(true),
            "false" | "0" => SqlParam::Bool(false),
            _ => return Err(mismatch()),
        },
        FieldType::Decimal
        | FieldType::String
        | FieldType::Uuid
        | FieldType::Date
        | FieldType::Datetime => SqlParam::Text(value.to_string()),
    };
    Ok(param)
}
