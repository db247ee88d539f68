//! Coordinate reprojection between SRIDs.
//!
//! SRIDs are resolved to proj4 definitions through a built-in table, which
//! configuration can extend or override. Transforms run through `proj4rs`.

use crate::error::ProviderError;
use geojson::{Geometry, Value};
use proj4rs::proj::Proj;
use std::collections::HashMap;
use tracing::debug;

/// WGS 84 geographic coordinates.
pub const WGS84: i32 = 4326;

const WGS84_DEFINITION: &str = "+proj=longlat +datum=WGS84 +no_defs";

/// Resolves SRIDs to proj4 definitions.
#[derive(Debug, Clone, Default)]
pub struct SridRegistry {
    overrides: HashMap<i32, String>,
}

impl SridRegistry {
    /// Create a registry with configured definitions taking precedence over
    /// the built-in table.
    pub fn new(overrides: HashMap<i32, String>) -> Self {
        Self { overrides }
    }

    /// The proj4 definition for `srid`, if known.
    pub fn definition(&self, srid: i32) -> Option<String> {
        self.overrides
            .get(&srid)
            .cloned()
            .or_else(|| builtin_definition(srid))
    }
}

fn builtin_definition(srid: i32) -> Option<String> {
    let definition = match srid {
        WGS84 => WGS84_DEFINITION.to_string(),
        4258 => "+proj=longlat +ellps=GRS80 +no_defs".to_string(),
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 \
                 +units=m +no_defs"
            .to_string(),
        // SVY21 / Singapore TM
        3414 => "+proj=tmerc +lat_0=1.36666666666667 +lon_0=103.833333333333 +k=1 \
                 +x_0=28001.642 +y_0=38744.572 +ellps=WGS84 +units=m +no_defs"
            .to_string(),
        // OSGB 1936 / British National Grid
        27700 => "+proj=tmerc +lat_0=49 +lon_0=-2 +k=0.9996012717 +x_0=400000 +y_0=-100000 \
                  +ellps=airy +towgs84=446.448,-125.157,542.06,0.15,0.247,0.842,-20.489 \
                  +units=m +no_defs"
            .to_string(),
        // RGF93 / Lambert-93
        2154 => "+proj=lcc +lat_0=46.5 +lon_0=3 +lat_1=49 +lat_2=44 +x_0=700000 \
                 +y_0=6600000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs"
            .to_string(),
        // ETRS89 / UTM zones 28N-38N
        25828..=25838 => format!(
            "+proj=utm +zone={} +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            srid - 25800
        ),
        // WGS 84 / UTM north and south
        32601..=32660 => format!(
            "+proj=utm +zone={} +datum=WGS84 +units=m +no_defs",
            srid - 32600
        ),
        32701..=32760 => format!(
            "+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs",
            srid - 32700
        ),
        _ => return None,
    };
    Some(definition)
}

fn is_geographic(definition: &str) -> bool {
    definition
        .split_whitespace()
        .any(|token| token == "+proj=longlat" || token == "+proj=latlong")
}

fn parse(srid: i32, definition: &str) -> Result<Proj, ProviderError> {
    Proj::from_proj_string(definition).map_err(|e| {
        ProviderError::reprojection(format!(
            "Invalid projection definition for SRID {}: {:?}",
            srid, e
        ))
    })
}

/// A resolved source-to-target SRID pair.
///
/// Holds the definitions rather than the parsed projections so it can be
/// cached and shared; [`Reprojection::transformer`] builds the transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Reprojection {
    source: i32,
    target: i32,
    source_definition: String,
    target_definition: String,
}

impl Reprojection {
    /// Resolve a transform from `source` to `target`.
    ///
    /// Returns `None` when the two are equal: coordinates pass through
    /// untouched.
    pub fn resolve(
        registry: &SridRegistry,
        source: i32,
        target: i32,
    ) -> Result<Option<Self>, ProviderError> {
        if source == target {
            return Ok(None);
        }

        let lookup = |srid: i32| {
            registry.definition(srid).ok_or_else(|| {
                ProviderError::reprojection(format!(
                    "No projection definition for SRID {}; add one to proj_definitions",
                    srid
                ))
            })
        };
        let reprojection = Self {
            source,
            target,
            source_definition: lookup(source)?,
            target_definition: lookup(target)?,
        };

        // Fail at resolution time rather than on the first row
        reprojection.transformer()?;
        debug!("Reprojecting SRID {} to SRID {}", source, target);
        Ok(Some(reprojection))
    }

    pub fn source(&self) -> i32 {
        self.source
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    /// Build the coordinate transform.
    pub fn transformer(&self) -> Result<CoordTransform, ProviderError> {
        Ok(CoordTransform {
            source: parse(self.source, &self.source_definition)?,
            target: parse(self.target, &self.target_definition)?,
            source_geographic: is_geographic(&self.source_definition),
            target_geographic: is_geographic(&self.target_definition),
        })
    }
}

/// A ready-to-use transform between two projections.
///
/// Geographic coordinates are taken and returned in degrees.
pub struct CoordTransform {
    source: Proj,
    target: Proj,
    source_geographic: bool,
    target_geographic: bool,
}

impl CoordTransform {
    /// Transform one coordinate pair.
    pub fn transform_xy(&self, x: f64, y: f64) -> Result<(f64, f64), ProviderError> {
        if !x.is_finite() || !y.is_finite() {
            return Err(ProviderError::reprojection(format!(
                "Coordinate ({}, {}) is not finite",
                x, y
            )));
        }
        if self.source_geographic && y.abs() > 90.0 {
            return Err(ProviderError::reprojection(format!(
                "Latitude {} is outside [-90, 90]",
                y
            )));
        }

        let mut point = if self.source_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };

        proj4rs::transform::transform(&self.source, &self.target, &mut point).map_err(|e| {
            ProviderError::reprojection(format!("Failed to transform ({}, {}): {:?}", x, y, e))
        })?;

        if self.target_geographic {
            Ok((point.0.to_degrees(), point.1.to_degrees()))
        } else {
            Ok((point.0, point.1))
        }
    }

    /// Transform every position of a geometry in place.
    pub fn transform_geometry(&self, geometry: &mut Geometry) -> Result<(), ProviderError> {
        self.transform_value(&mut geometry.value)
    }

    fn transform_value(&self, value: &mut Value) -> Result<(), ProviderError> {
        match value {
            Value::Point(position) => self.transform_position(position),
            Value::MultiPoint(positions) | Value::LineString(positions) => {
                self.transform_positions(positions)
            }
            Value::MultiLineString(lines) | Value::Polygon(lines) => lines
                .iter_mut()
                .try_for_each(|line| self.transform_positions(line)),
            Value::MultiPolygon(polygons) => polygons.iter_mut().try_for_each(|polygon| {
                polygon
                    .iter_mut()
                    .try_for_each(|ring| self.transform_positions(ring))
            }),
            Value::GeometryCollection(geometries) => geometries
                .iter_mut()
                .try_for_each(|g| self.transform_geometry(g)),
        }
    }

    fn transform_positions(&self, positions: &mut [Vec<f64>]) -> Result<(), ProviderError> {
        positions
            .iter_mut()
            .try_for_each(|p| self.transform_position(p))
    }

    fn transform_position(&self, position: &mut Vec<f64>) -> Result<(), ProviderError> {
        if let [x, y, ..] = position.as_mut_slice() {
            let (tx, ty) = self.transform_xy(*x, *y)?;
            *x = tx;
            *y = ty;
        }
        Ok(())
    }
}
