//! Database connectivity, introspection and query execution.

pub mod connection;
pub mod metadata;
pub mod query;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::{create_connection, ConnectionScope, Connector, Session, TdsConnector};
pub use metadata::{FieldMap, SchemaIntrospector, TableSchema};
pub use query::{OrderTerm, Page, QueryExecutor, ResultRow, SelectSpec, SqlParam, Statement};
pub use types::{FieldDescriptor, FieldType, SqlValue, TypeMapper};
