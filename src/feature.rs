//! Row to GeoJSON conversion.

use crate::constants::GEOMETRY_TEXT_KEY;
use crate::database::{ResultRow, SqlValue};
use crate::error::ProviderError;
use crate::projection::{CoordTransform, Reprojection};
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde_json::Value as JsonValue;
use tracing::warn;
use wkt::TryFromWkt;

/// Parse WKT text into a GeoJSON geometry.
///
/// Returns `None` for text that does not parse.
pub fn parse_geometry(text: &str) -> Option<Geometry> {
    match geo_types::Geometry::<f64>::try_from_wkt_str(text) {
        Ok(geometry) => Some(Geometry::new(geojson::Value::from(&geometry))),
        Err(e) => {
            warn!("Ignoring unparseable geometry text: {}", e);
            None
        }
    }
}

/// Hits-mode payload: a collection with `numberMatched` and no features.
pub fn hits_response(count: u64) -> FeatureCollection {
    let mut members = JsonObject::new();
    members.insert("numberMatched".to_string(), JsonValue::from(count));
    FeatureCollection {
        bbox: None,
        features: Vec::new(),
        foreign_members: Some(members),
    }
}

/// Builds features from result rows.
pub struct FeatureMaterializer<'a> {
    id_field: &'a str,
    properties: Option<&'a [String]>,
    transform: Option<CoordTransform>,
}

impl<'a> FeatureMaterializer<'a> {
    /// Materializer resolving feature ids from `id_field`.
    pub fn new(id_field: &'a str) -> Self {
        Self {
            id_field,
            properties: None,
            transform: None,
        }
    }

    /// Reproject geometries. `None` leaves coordinates untouched.
    pub fn with_reprojection(
        mut self,
        reprojection: Option<&Reprojection>,
    ) -> Result<Self, ProviderError> {
        self.transform = reprojection.map(Reprojection::transformer).transpose()?;
        Ok(self)
    }

    /// Only emit the named properties. An empty list keeps all of them.
    pub fn with_properties(mut self, names: &'a [String]) -> Self {
        self.properties = (!names.is_empty()).then_some(names);
        self
    }

    fn keeps(&self, column: &str) -> bool {
        self.properties
            .map_or(true, |names| names.iter().any(|n| n == column))
    }

    /// Convert one row.
    ///
    /// The geometry text is consumed; every other column becomes a property.
    /// Geometry that fails to parse or reproject is emitted as null.
    pub fn to_feature(&self, mut row: ResultRow) -> Result<Feature, ProviderError> {
        let mut geometry = match row.take(GEOMETRY_TEXT_KEY) {
            Some(SqlValue::String(text)) => parse_geometry(&text),
            _ => None,
        };
        if let Some(transform) = &self.transform {
            if let Some(Err(e)) = geometry
                .as_mut()
                .map(|shape| transform.transform_geometry(shape))
            {
                warn!("Dropping geometry that cannot be reprojected: {}", e);
                geometry = None;
            }
        }

        let mut id = None;
        let mut properties = JsonObject::new();
        for (column, value) in row {
            let value = value.to_json();
            if column == self.id_field {
                id = feature_id(&value);
            }
            if self.keeps(&column) {
                properties.insert(column, value);
            }
        }

        Ok(Feature {
            bbox: None,
            geometry,
            id,
            properties: Some(properties),
            foreign_members: None,
        })
    }

    /// Convert rows in order and wrap them in a collection.
    pub fn to_feature_collection(
        &self,
        rows: Vec<ResultRow>,
    ) -> Result<FeatureCollection, ProviderError> {
        let features = rows
            .into_iter()
            .map(|row| self.to_feature(row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        })
    }
}

fn feature_id(value: &JsonValue) -> Option<Id> {
    match value {
        JsonValue::Null => None,
        JsonValue::Number(n) => Some(Id::Number(n.clone())),
        JsonValue::String(s) => Some(Id::String(s.clone())),
        other => Some(Id::String(other.to_string())),
    }
}
