//! Query parameters handed over by the host framework.

use crate::constants::{DEFAULT_LIMIT, DEFAULT_START_INDEX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a query returns features or only their count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    /// Feature bodies (default).
    #[default]
    Results,
    /// Only `numberMatched`.
    Hits,
}

impl ResultType {
    /// Get the result type name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Results => "results",
            ResultType::Hits => "hits",
        }
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResultType {
    type Err = InvalidParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "results" => Ok(ResultType::Results),
            "hits" => Ok(ResultType::Hits),
            _ => Err(InvalidParameterError(format!(
                "Invalid result type '{}'. Valid types: results, hits",
                s
            ))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub property: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn ascending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn descending(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Parses `name`, `+name` (ascending) and `-name` (descending).
impl FromStr for SortSpec {
    type Err = InvalidParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let spec = match s.trim() {
            "" | "-" | "+" => {
                return Err(InvalidParameterError("Empty sort property".to_string()));
            }
            s => match s.strip_prefix('-') {
                Some(name) => SortSpec::descending(name),
                None => SortSpec::ascending(s.strip_prefix('+').unwrap_or(s)),
            },
        };
        Ok(spec)
    }
}

/// Error returned when parsing an invalid parameter string.
#[derive(Debug, Clone)]
pub struct InvalidParameterError(String);

impl fmt::Display for InvalidParameterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for InvalidParameterError {}

/// Parameters of a feature query. Every field is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParameters {
    /// Number of matching features to skip.
    pub startindex: usize,

    /// Maximum number of features to return.
    pub limit: usize,

    pub result_type: ResultType,

    /// `[minx, miny, maxx, maxy]` in the table's SRID, or empty.
    pub bbox: Vec<f64>,

    /// Temporal filter. The table has no temporal column; ignored.
    pub datetime: Option<String>,

    /// Attribute equality filters, applied in order.
    pub properties: Vec<(String, String)>,

    pub sortby: Vec<SortSpec>,

    /// Properties to emit; empty means all.
    pub select_properties: Vec<String>,

    pub skip_geometry: bool,

    /// Free-text search term. Not supported by this provider; ignored.
    pub q: Option<String>,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self {
            startindex: DEFAULT_START_INDEX,
            limit: DEFAULT_LIMIT,
            result_type: ResultType::default(),
            bbox: Vec::new(),
            datetime: None,
            properties: Vec::new(),
            sortby: Vec::new(),
            select_properties: Vec::new(),
            skip_geometry: false,
            q: None,
        }
    }
}

impl QueryParameters {
    /// Hits-mode parameters with no filters.
    pub fn hits() -> Self {
        Self {
            result_type: ResultType::Hits,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_type_from_str() {
        assert_eq!("hits".parse::<ResultType>().unwrap(), ResultType::Hits);
        assert_eq!("RESULTS".parse::<ResultType>().unwrap(), ResultType::Results);
        assert!("count".parse::<ResultType>().is_err());
    }

    #[test]
    fn test_sort_spec_from_str() {
        assert_eq!("-Height".parse::<SortSpec>().unwrap(), SortSpec::descending("Height"));
        assert_eq!("+ID".parse::<SortSpec>().unwrap(), SortSpec::ascending("ID"));
        assert_eq!("Box".parse::<SortSpec>().unwrap(), SortSpec::ascending("Box"));
        assert!("-".parse::<SortSpec>().is_err());
    }

    #[test]
    fn test_defaults() {
        let params = QueryParameters::default();
        assert_eq!(params.startindex, 0);
        assert_eq!(params.limit, 10);
        assert_eq!(params.result_type, ResultType::Results);
        assert!(params.bbox.is_empty());
    }

    #[test]
    fn test_deserialize_partial() {
        let params: QueryParameters = serde_json::from_value(serde_json::json!({
            "result_type": "hits",
            "properties": [["Box", "ZB41"]],
            "sortby": [{"property": "ID", "order": "desc"}]
        }))
        .unwrap();
        assert_eq!(params.result_type, ResultType::Hits);
        assert_eq!(params.limit, 10);
        assert_eq!(params.properties, vec![("Box".to_string(), "ZB41".to_string())]);
        assert_eq!(params.sortby, vec![SortSpec::descending("ID")]);
    }
}
