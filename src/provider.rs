//! The feature provider facade.
//!
//! [`FeatureProvider`] is the contract the host framework calls;
//! [`MssqlProvider`] implements it over one SQL Server table. Each call opens
//! its own connection scope and closes it before returning. The only state
//! shared between calls is the table schema, resolved once on first use.

pub mod params;

pub use params::{QueryParameters, ResultType, SortOrder, SortSpec};

use crate::config::ProviderConfig;
use crate::constants::UNKNOWN_SRID;
use crate::database::{
    ConnectionScope, Connector, FieldMap, OrderTerm, Page, QueryExecutor, ResultRow,
    SchemaIntrospector, SelectSpec, TableSchema, TdsConnector,
};
use crate::error::ProviderError;
use crate::feature::{hits_response, FeatureMaterializer};
use crate::predicate::{BoundingBox, PredicateCompiler, WhereClause};
use crate::projection::{Reprojection, SridRegistry};
use async_trait::async_trait;
use geojson::{Feature, FeatureCollection};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operations a feature provider offers its host.
#[async_trait]
pub trait FeatureProvider: Send + Sync {
    /// Run a feature query.
    async fn query(&self, params: &QueryParameters) -> Result<FeatureCollection, ProviderError>;

    /// Fetch a single feature by identifier.
    async fn get(&self, id: &str) -> Result<Feature, ProviderError>;

    /// Insert a feature and return its identifier.
    async fn create(&self, item: &Feature) -> Result<String, ProviderError>;

    /// Replace a feature.
    async fn update(&self, id: &str, item: &Feature) -> Result<bool, ProviderError>;

    /// Remove a feature.
    async fn delete(&self, id: &str) -> Result<bool, ProviderError>;

    /// Describe the non-spatial fields.
    async fn get_fields(&self) -> Result<FieldMap, ProviderError>;
}

/// Schema plus the spatial settings derived from it.
#[derive(Debug)]
struct ResolvedSchema {
    table: TableSchema,
    source_srid: Option<i32>,
    reprojection: Option<Reprojection>,
}

/// Feature provider backed by a SQL Server table with a geometry column.
pub struct MssqlProvider {
    config: ProviderConfig,
    connector: Arc<dyn Connector>,
    executor: QueryExecutor,
    introspector: SchemaIntrospector,
    registry: SridRegistry,
    schema: OnceCell<Arc<ResolvedSchema>>,
}

impl MssqlProvider {
    /// Create a provider. The schema is introspected on first use.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let connector = Arc::new(TdsConnector::new(config.database.clone()));
        Self::with_connector(config, connector)
    }

    /// Create a provider and resolve its schema immediately.
    pub async fn connect(config: ProviderConfig) -> Result<Self, ProviderError> {
        let provider = Self::new(config)?;
        provider.get_fields().await?;
        Ok(provider)
    }

    /// Create a provider over a custom connector.
    pub fn with_connector(
        config: ProviderConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ProviderError> {
        config.validate()?;

        let executor = QueryExecutor::new(&config.table, &config.geometry_column)?;
        let introspector = SchemaIntrospector::new(&config.table, &config.geometry_column)?;
        let registry = SridRegistry::new(config.proj_definitions.clone());

        Ok(Self {
            config,
            connector,
            executor,
            introspector,
            registry,
            schema: OnceCell::new(),
        })
    }

    /// The provider's configuration.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Return the cached schema, introspecting over `scope` when cold.
    ///
    /// Concurrent first calls may each introspect; the first result stored
    /// wins and the others are discarded.
    async fn schema(
        &self,
        scope: &mut ConnectionScope,
    ) -> Result<Arc<ResolvedSchema>, ProviderError> {
        if let Some(schema) = self.schema.get() {
            return Ok(Arc::clone(schema));
        }

        let table = self.introspector.introspect(&self.executor, scope).await?;
        let resolved = Arc::new(self.resolve(table)?);
        if self.schema.set(Arc::clone(&resolved)).is_err() {
            debug!("Schema already cached by a concurrent call");
        }
        Ok(self.schema.get().cloned().unwrap_or(resolved))
    }

    fn resolve(&self, table: TableSchema) -> Result<ResolvedSchema, ProviderError> {
        if table.field(&self.config.id_field).is_none() {
            return Err(ProviderError::config(format!(
                "id_field '{}' is not a column of {}",
                self.config.id_field, self.config.table
            )));
        }

        let source_srid = match (self.config.source_srid, table.srid) {
            (Some(configured), Some(discovered)) if configured != discovered => {
                warn!(
                    "Configured source_srid {} differs from table SRID {}; using {}",
                    configured, discovered, discovered
                );
                Some(discovered)
            }
            (configured, discovered) => discovered.or(configured),
        };

        let reprojection = match (source_srid, self.config.target_srid) {
            (Some(source), Some(target)) => Reprojection::resolve(&self.registry, source, target)?,
            (None, Some(target)) => {
                warn!(
                    "target_srid {} set but the source SRID is unknown; coordinates are not reprojected",
                    target
                );
                None
            }
            (_, None) => None,
        };

        info!(
            "Resolved schema for {}: {} fields, source SRID {:?}, target SRID {:?}",
            self.config.table,
            table.fields.len(),
            source_srid,
            self.config.target_srid
        );

        Ok(ResolvedSchema {
            table,
            source_srid,
            reprojection,
        })
    }

    fn compiler<'a>(
        &self,
        schema: &'a ResolvedSchema,
    ) -> Result<PredicateCompiler<'a>, ProviderError> {
        PredicateCompiler::new(
            &schema.table,
            &self.config.geometry_column,
            schema.source_srid.unwrap_or(UNKNOWN_SRID),
        )
    }

    async fn run_query(
        &self,
        scope: &mut ConnectionScope,
        params: &QueryParameters,
    ) -> Result<FeatureCollection, ProviderError> {
        let schema = self.schema(scope).await?;

        if let Some(datetime) = &params.datetime {
            debug!("Ignoring datetime filter '{}': no temporal column", datetime);
        }
        if let Some(q) = &params.q {
            debug!("Ignoring free-text query '{}': not supported", q);
        }

        let bbox = BoundingBox::from_slice(&params.bbox)?;
        let filter = self
            .compiler(&schema)?
            .compile(&params.properties, bbox.as_ref())?;

        match params.result_type {
            ResultType::Hits => {
                let count = self.executor.count(scope, &filter).await?;
                debug!("Query matched {} features", count);
                Ok(hits_response(count))
            }
            ResultType::Results => {
                let rows = self.select_page(scope, &schema, params, &filter).await?;
                FeatureMaterializer::new(&self.config.id_field)
                    .with_properties(&params.select_properties)
                    .with_reprojection(schema.reprojection.as_ref())?
                    .to_feature_collection(rows)
            }
        }
    }

    async fn select_page(
        &self,
        scope: &mut ConnectionScope,
        schema: &ResolvedSchema,
        params: &QueryParameters,
        filter: &WhereClause,
    ) -> Result<Vec<ResultRow>, ProviderError> {
        let table = &schema.table;
        let id_field = self.config.id_field.as_str();

        let columns: Vec<&str> = if params.select_properties.is_empty() {
            table.columns.iter().map(String::as_str).collect()
        } else {
            let mut columns = vec![id_field];
            for name in &params.select_properties {
                known_field(table, name)?;
                if !columns.contains(&name.as_str()) {
                    columns.push(name.as_str());
                }
            }
            columns
        };

        // A column may appear once in ORDER BY; the first direction given wins
        let mut order: Vec<OrderTerm> = Vec::with_capacity(params.sortby.len() + 1);
        for sort in &params.sortby {
            known_field(table, &sort.property)?;
            if order.iter().any(|term| term.column == sort.property) {
                debug!("Ignoring repeated sort key '{}'", sort.property);
                continue;
            }
            order.push(OrderTerm {
                column: sort.property.clone(),
                descending: sort.order == SortOrder::Desc,
            });
        }
        // The id column breaks ties so OFFSET/FETCH pages are stable
        if !order.iter().any(|term| term.column == id_field) {
            order.push(OrderTerm {
                column: id_field.to_string(),
                descending: false,
            });
        }

        let spec = SelectSpec {
            columns,
            with_geometry: !params.skip_geometry,
            order,
            page: Some(Page {
                offset: params.startindex,
                limit: params.limit,
            }),
        };
        debug!(
            "Fetching features {}..{}",
            params.startindex,
            params.startindex.saturating_add(params.limit)
        );

        let statement = self.executor.select_statement(&spec, filter)?;
        self.executor.fetch(scope, &statement).await
    }

    async fn fetch_by_id(
        &self,
        scope: &mut ConnectionScope,
        id: &str,
    ) -> Result<Feature, ProviderError> {
        let schema = self.schema(scope).await?;
        let id_field = self.config.id_field.as_str();

        let lookup = [(id_field.to_string(), id.to_string())];
        let filter = match self.compiler(&schema)?.compile(&lookup, None) {
            Ok(filter) => filter,
            // An id that cannot be a value of the id column matches nothing
            Err(ProviderError::InvalidInput(_)) => return Err(ProviderError::item_not_found(id)),
            Err(e) => return Err(e),
        };

        let spec = SelectSpec {
            columns: schema.table.columns.iter().map(String::as_str).collect(),
            with_geometry: true,
            order: vec![OrderTerm {
                column: id_field.to_string(),
                descending: false,
            }],
            page: Some(Page {
                offset: 0,
                limit: 2,
            }),
        };
        let statement = self.executor.select_statement(&spec, &filter)?;
        let mut rows = self.executor.fetch(scope, &statement).await?;

        if rows.len() > 1 {
            warn!(
                "Identifier {} = '{}' is not unique; returning the first row",
                id_field, id
            );
        }
        if rows.is_empty() {
            return Err(ProviderError::item_not_found(id));
        }
        let row = rows.swap_remove(0);

        FeatureMaterializer::new(id_field)
            .with_reprojection(schema.reprojection.as_ref())?
            .to_feature(row)
    }
}

fn known_field(table: &TableSchema, name: &str) -> Result<(), ProviderError> {
    table
        .field(name)
        .map(|_| ())
        .ok_or_else(|| ProviderError::invalid_input(format!("Unknown property '{}'", name)))
}

#[async_trait]
impl FeatureProvider for MssqlProvider {
    async fn query(&self, params: &QueryParameters) -> Result<FeatureCollection, ProviderError> {
        if params.result_type == ResultType::Results && params.limit == 0 {
            debug!("limit is 0; returning an empty collection");
            return Ok(FeatureCollection {
                bbox: None,
                features: Vec::new(),
                foreign_members: None,
            });
        }

        let mut scope = ConnectionScope::open(self.connector.as_ref()).await?;
        let result = self.run_query(&mut scope, params).await;
        scope.close().await;
        result
    }

    async fn get(&self, id: &str) -> Result<Feature, ProviderError> {
        let mut scope = ConnectionScope::open(self.connector.as_ref()).await?;
        let result = self.fetch_by_id(&mut scope, id).await;
        scope.close().await;
        result
    }

    async fn create(&self, _item: &Feature) -> Result<String, ProviderError> {
        Err(ProviderError::NotImplemented("create"))
    }

    async fn update(&self, _id: &str, _item: &Feature) -> Result<bool, ProviderError> {
        Err(ProviderError::NotImplemented("update"))
    }

    async fn delete(&self, _id: &str) -> Result<bool, ProviderError> {
        Err(ProviderError::NotImplemented("delete"))
    }

    async fn get_fields(&self) -> Result<FieldMap, ProviderError> {
        if let Some(schema) = self.schema.get() {
            return Ok(schema.table.fields.clone());
        }

        let mut scope = ConnectionScope::open(self.connector.as_ref()).await?;
        let result = self.schema(&mut scope).await;
        scope.close().await;
        Ok(result?.table.fields.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, DatabaseConfig, TimeoutsConfig};
    use crate::constants::GEOMETRY_TEXT_KEY;
    use crate::database::mock::{FailingConnector, RecordingConnector};
    use crate::database::{SqlParam, SqlValue, Statement};
    use geojson::feature::Id;
    use std::collections::HashMap;

    const FIXTURE: [(i32, &str, &str); 4] = [
        (1, "ZB41", "POINT (49670 46400)"),
        (2, "ZB41", "POINT (49680 46410)"),
        (3, "ZC07", "POINT (28001.642 38744.572)"),
        (4, "ZC07", "POINT (49690 46420)"),
    ];

    fn config() -> ProviderConfig {
        ProviderConfig {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 1433,
                database: Some("gis".to_string()),
                auth: AuthConfig::SqlServer {
                    username: "api".to_string(),
                    password: "api".to_string(),
                },
                encrypt: false,
                trust_server_certificate: true,
                application_name: "test".to_string(),
                timeouts: TimeoutsConfig::default(),
            },
            table: "BOX".to_string(),
            id_field: "ID".to_string(),
            geometry_column: "GEOM".to_string(),
            source_srid: None,
            target_srid: None,
            proj_definitions: HashMap::new(),
        }
    }

    fn catalog_row(name: &str, data_type: &str) -> ResultRow {
        [
            ("COLUMN_NAME", SqlValue::String(name.to_string())),
            ("DATA_TYPE", SqlValue::String(data_type.to_string())),
        ]
        .into_iter()
        .collect()
    }

    fn feature_row(id: i32, name: &str, wkt: &str) -> ResultRow {
        [
            ("ID", SqlValue::I32(id)),
            ("Box", SqlValue::String(name.to_string())),
            (GEOMETRY_TEXT_KEY, SqlValue::String(wkt.to_string())),
        ]
        .into_iter()
        .collect()
    }

    /// Answers catalog, SRID, count and select statements for a small BOX table.
    fn box_table(statement: &Statement) -> Result<Vec<ResultRow>, ProviderError> {
        let sql = statement.sql.as_str();
        if sql.contains("INFORMATION_SCHEMA") {
            return Ok(vec![catalog_row("ID", "int"), catalog_row("Box", "nvarchar")]);
        }
        if sql.contains("STSrid") {
            return Ok(vec![[("srid", SqlValue::I32(3414))].into_iter().collect()]);
        }
        if sql.contains("COUNT_BIG") {
            return Ok(vec![[("hits", SqlValue::I64(42))].into_iter().collect()]);
        }

        let rows = FIXTURE
            .iter()
            .filter(|(id, name, _)| {
                if !sql.contains("WHERE") {
                    return true;
                }
                match statement.params.first() {
                    Some(SqlParam::Text(v)) => v == name,
                    Some(SqlParam::Int(v)) => *v == i64::from(*id),
                    _ => true,
                }
            })
            .map(|(id, name, wkt)| feature_row(*id, name, wkt))
            .collect();
        Ok(rows)
    }

    fn provider(connector: &RecordingConnector) -> MssqlProvider {
        MssqlProvider::with_connector(config(), Arc::new(connector.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_hits_returns_count_only() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let collection = provider.query(&QueryParameters::hits()).await.unwrap();
        assert!(collection.features.is_empty());
        assert_eq!(
            serde_json::to_value(&collection).unwrap(),
            serde_json::json!({"type": "FeatureCollection", "features": [], "numberMatched": 42})
        );

        let statements = connector.statements();
        assert_eq!(statements.last().unwrap(), "SELECT COUNT_BIG(*) AS hits FROM [BOX]");
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_attribute_filter() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let params = QueryParameters {
            properties: vec![("Box".to_string(), "ZB41".to_string())],
            ..Default::default()
        };
        let collection = provider.query(&params).await.unwrap();

        assert_eq!(collection.features.len(), 2);
        for feature in &collection.features {
            assert_eq!(feature.properties.as_ref().unwrap()["Box"], "ZB41");
        }

        let select = connector.recorded().pop().unwrap();
        assert_eq!(
            select.sql,
            "SELECT [ID], [Box], [GEOM].STAsText() AS [__geometry_wkt] FROM [BOX] \
             WHERE [Box] = @P1 ORDER BY [ID] ASC OFFSET @P2 ROWS FETCH NEXT @P3 ROWS ONLY"
        );
        assert_eq!(
            select.params,
            vec![
                SqlParam::Text("ZB41".to_string()),
                SqlParam::Int(0),
                SqlParam::Int(10)
            ]
        );
    }

    #[tokio::test]
    async fn test_bbox_uses_discovered_srid() {
        let connector = RecordingConnector::new(box_table);
        let mut config = config();
        config.source_srid = Some(4326);
        let provider = MssqlProvider::with_connector(config, Arc::new(connector.clone())).unwrap();

        let params = QueryParameters {
            bbox: vec![49662.6, 46395.4, 49697.0, 46424.1],
            result_type: ResultType::Hits,
            ..Default::default()
        };
        provider.query(&params).await.unwrap();

        let count = connector.recorded().pop().unwrap();
        assert!(count
            .sql
            .ends_with("WHERE geometry::STGeomFromText(@P1, @P2).STContains([GEOM]) = 1"));
        assert_eq!(count.params[1], SqlParam::Int(3414));
    }

    #[tokio::test]
    async fn test_get_missing_id_is_not_found() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let err = provider.get("-1").await.unwrap_err();
        assert!(matches!(err, ProviderError::ItemNotFound(ref id) if id == "-1"));

        let err = provider.get("not-a-number").await.unwrap_err();
        assert!(matches!(err, ProviderError::ItemNotFound(_)));
        assert_eq!(connector.opened(), connector.closed());
    }

    #[tokio::test]
    async fn test_get_existing_feature() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let feature = provider.get("3").await.unwrap();
        assert_eq!(feature.id, Some(Id::Number(3.into())));
        assert_eq!(feature.properties.unwrap()["Box"], "ZC07");
    }

    #[tokio::test]
    async fn test_get_reprojects_to_target_srid() {
        let connector = RecordingConnector::new(box_table);
        let mut config = config();
        config.target_srid = Some(4326);
        let provider = MssqlProvider::with_connector(config, Arc::new(connector.clone())).unwrap();

        let feature = provider.get("3").await.unwrap();
        let geojson::Value::Point(position) = feature.geometry.unwrap().value else {
            panic!("expected point");
        };
        assert!((position[0] - 103.833333333).abs() < 1e-6);
        assert!((position[1] - 1.366666667).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_get_fields_introspects_once() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let first = provider.get_fields().await.unwrap();
        let after_first = connector.statements().len();
        let second = provider.get_fields().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(connector.statements().len(), after_first);
        assert_eq!(connector.opened(), 1);
        assert_eq!(
            first.keys().cloned().collect::<Vec<_>>(),
            vec!["Box".to_string(), "ID".to_string()]
        );
    }

    #[tokio::test]
    async fn test_query_error_releases_connection() {
        let connector = RecordingConnector::new(|statement| {
            if statement.sql.starts_with("SELECT [ID]") {
                Err(ProviderError::query(&statement.sql, "Invalid column name 'GEOM'"))
            } else {
                box_table(statement)
            }
        });
        let provider = provider(&connector);

        let err = provider.query(&QueryParameters::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Query { .. }));
        assert_eq!(connector.opened(), 1);
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn test_connection_failure() {
        let provider = MssqlProvider::with_connector(config(), Arc::new(FailingConnector)).unwrap();
        let err = provider.query(&QueryParameters::hits()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_zero_limit_skips_database() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let params = QueryParameters {
            limit: 0,
            ..Default::default()
        };
        let collection = provider.query(&params).await.unwrap();
        assert!(collection.features.is_empty());
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_unknown_filter_property() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let params = QueryParameters {
            properties: vec![("Nope".to_string(), "1".to_string())],
            ..Default::default()
        };
        let err = provider.query(&params).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_sort_select_and_skip_geometry() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let params = QueryParameters {
            startindex: 2,
            limit: 5,
            sortby: vec![SortSpec::descending("Box")],
            select_properties: vec!["Box".to_string()],
            skip_geometry: true,
            ..Default::default()
        };
        let collection = provider.query(&params).await.unwrap();

        let select = connector.recorded().pop().unwrap();
        assert_eq!(
            select.sql,
            "SELECT [ID], [Box] FROM [BOX] ORDER BY [Box] DESC, [ID] ASC \
             OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY"
        );
        assert_eq!(select.params, vec![SqlParam::Int(2), SqlParam::Int(5)]);

        let feature = &collection.features[0];
        assert!(feature.id.is_some());
        assert!(!feature.properties.as_ref().unwrap().contains_key("ID"));
    }

    #[tokio::test]
    async fn test_sort_keys_are_unique() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let params = QueryParameters {
            sortby: vec![
                SortSpec::descending("ID"),
                SortSpec::ascending("Box"),
                SortSpec::descending("Box"),
            ],
            select_properties: vec!["Box".to_string(), "Box".to_string()],
            skip_geometry: true,
            ..Default::default()
        };
        provider.query(&params).await.unwrap();

        let select = connector.recorded().pop().unwrap();
        assert_eq!(
            select.sql,
            "SELECT [ID], [Box] FROM [BOX] ORDER BY [ID] DESC, [Box] ASC \
             OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY"
        );
    }

    #[tokio::test]
    async fn test_concurrent_cold_get_fields_agree() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);

        let (first, second) = tokio::join!(provider.get_fields(), provider.get_fields());
        let first = first.unwrap();
        assert_eq!(first, second.unwrap());
        assert_eq!(first, provider.get_fields().await.unwrap());
        // Both calls found the cache cold and introspected
        assert_eq!(connector.opened(), 2);
        assert_eq!(connector.closed(), 2);
    }

    #[tokio::test]
    async fn test_write_operations_not_implemented() {
        let connector = RecordingConnector::new(box_table);
        let provider = provider(&connector);
        let feature = Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: None,
            foreign_members: None,
        };

        assert!(matches!(
            provider.create(&feature).await,
            Err(ProviderError::NotImplemented("create"))
        ));
        assert!(matches!(
            provider.update("1", &feature).await,
            Err(ProviderError::NotImplemented("update"))
        ));
        assert!(matches!(
            provider.delete("1").await,
            Err(ProviderError::NotImplemented("delete"))
        ));
        assert_eq!(connector.opened(), 0);
    }

    #[tokio::test]
    async fn test_missing_id_field_is_config_error() {
        let connector = RecordingConnector::new(box_table);
        let mut config = config();
        config.id_field = "OBJECTID".to_string();
        let provider = MssqlProvider::with_connector(config, Arc::new(connector.clone())).unwrap();

        let err = provider.get_fields().await.unwrap_err();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
