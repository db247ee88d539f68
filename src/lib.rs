//! # SQL Server Feature Provider
//!
//! Serves features from a SQL Server table with a `geometry` column as
//! GeoJSON.
//!
//! This crate provides:
//! - **Schema introspection**: column types and geometry SRID, discovered once
//! - **Predicates**: attribute filters and bounding boxes as parameterized T-SQL
//! - **Paging**: server-side `OFFSET`/`FETCH` with hits-only counting
//! - **Reprojection**: optional SRID-to-SRID transform of emitted coordinates
//!
//! ## Architecture
//!
//! A host framework drives the provider through [`FeatureProvider`]:
//! - `query` and `get` each open one connection, run their statements and
//!   close it before returning
//! - `get_fields` returns the cached field map
//! - `create`, `update` and `delete` are not implemented
//!
//! ```no_run
//! use mssql_feature_provider::{FeatureProvider, MssqlProvider, ProviderConfig, QueryParameters};
//!
//! # async fn run() -> Result<(), mssql_feature_provider::ProviderError> {
//! let provider = MssqlProvider::connect(ProviderConfig::from_env()?).await?;
//! let hits = provider.query(&QueryParameters::hits()).await?;
//! println!("{}", serde_json::to_string(&hits).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod feature;
pub mod predicate;
pub mod projection;
pub mod provider;
pub mod security;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use provider::{FeatureProvider, MssqlProvider, QueryParameters, ResultType, SortSpec};
