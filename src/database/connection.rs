//! Connection handling for SQL Server.
//!
//! Every provider call opens its own connection through a [`Connector`],
//! runs its statements on the resulting [`Session`] and closes it again. The
//! [`ConnectionScope`] guard owns the session for the duration of the call
//! so that release happens on every exit path.

use crate::config::{AuthConfig, DatabaseConfig};
use crate::database::query::{ResultRow, Statement};
use crate::database::types::TypeMapper;
use crate::error::ProviderError;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use std::sync::Arc;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, error, warn};

/// Type alias for a raw tiberius connection.
pub type RawConnection = Client<Compat<TcpStream>>;

/// Opens database sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn Session>, ProviderError>;
}

/// A single open database connection.
#[async_trait]
pub trait Session: Send {
    /// Run a statement and return all of its rows.
    async fn fetch(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, ProviderError>;

    /// Close the connection.
    async fn close(self: Box<Self>) -> Result<(), ProviderError>;
}

/// A connection held for the duration of one provider call.
///
/// Call [`ConnectionScope::close`] when done. If the scope is dropped
/// instead (error propagation, cancelled future, panic), the session is
/// dropped with it, which closes the underlying socket.
pub struct ConnectionScope {
    session: Option<Box<dyn Session>>,
}

impl ConnectionScope {
    /// Open a connection through `connector`.
    pub async fn open(connector: &dyn Connector) -> Result<Self, ProviderError> {
        let session = connector.connect().await?;
        Ok(Self {
            session: Some(session),
        })
    }

    /// Run a statement on the scoped connection.
    pub async fn fetch(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, ProviderError> {
        match self.session.as_mut() {
            Some(session) => session.fetch(statement).await,
            None => Err(ProviderError::internal("Connection scope already closed")),
        }
    }

    /// Close the connection.
    ///
    /// A failure to close is logged, not returned: the call's own result has
    /// already been decided by then.
    pub async fn close(mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!("Failed to close connection cleanly: {}", e);
            }
        }
    }
}

impl Drop for ConnectionScope {
    fn drop(&mut self) {
        if self.session.is_some() {
            debug!("Connection scope dropped without close; dropping connection");
        }
    }
}

/// Production connector: a fresh TDS connection per session.
#[derive(Debug, Clone)]
pub struct TdsConnector {
    config: Arc<DatabaseConfig>,
}

impl TdsConnector {
    /// Create a connector for the given database configuration.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Connector for TdsConnector {
    async fn connect(&self) -> Result<Box<dyn Session>, ProviderError> {
        let timeout = self.config.timeouts.connect;
        let client = tokio::time::timeout(timeout, create_connection(&self.config))
            .await
            .map_err(|_| ProviderError::timeout("connect", timeout.as_secs()))??;

        Ok(Box::new(TdsSession {
            client,
            query_timeout: self.config.timeouts.query,
        }))
    }
}

/// Session over a tiberius client.
pub struct TdsSession {
    client: RawConnection,
    query_timeout: Duration,
}

impl TdsSession {
    async fn run(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, ProviderError> {
        let mut stream = statement
            .to_query()
            .query(&mut self.client)
            .await
            .map_err(|e| ProviderError::query_failed(&statement.sql, e))?;

        let columns: Vec<String> = stream
            .columns()
            .await
            .map_err(|e| ProviderError::query_failed(&statement.sql, e))?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut rows = Vec::new();
        let mut row_stream = stream.into_row_stream();
        while let Some(row) = row_stream
            .try_next()
            .await
            .map_err(|e| ProviderError::query_failed(&statement.sql, e))?
        {
            let result_row = columns
                .iter()
                .enumerate()
                .map(|(idx, name)| (name.clone(), TypeMapper::extract_column(&row, idx)))
                .collect();
            rows.push(result_row);
        }

        Ok(rows)
    }
}

#[async_trait]
impl Session for TdsSession {
    async fn fetch(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, ProviderError> {
        let timeout = self.query_timeout;
        match tokio::time::timeout(timeout, self.run(statement)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) => {
                error!("Error executing statement: {}: {}", statement.sql, e);
                Err(e)
            }
            Err(_) => {
                error!("Statement timed out after {:?}: {}", timeout, statement.sql);
                Err(ProviderError::timeout("query", timeout.as_secs()))
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<(), ProviderError> {
        self.client
            .close()
            .await
            .map_err(|e| ProviderError::connection_with_source("Failed to close connection", e))
    }
}

/// Create a tiberius Config from DatabaseConfig.
pub fn create_config(db_config: &DatabaseConfig) -> Config {
    let mut config = Config::new();

    config.host(&db_config.host);
    config.port(db_config.port);

    if let Some(ref database) = db_config.database {
        config.database(database);
    }

    if db_config.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::Off);
    }

    if db_config.trust_server_certificate {
        config.trust_cert();
    }

    config.application_name(&db_config.application_name);

    match &db_config.auth {
        AuthConfig::SqlServer { username, password } => {
            config.authentication(AuthMethod::sql_server(username, password));
        }
        #[cfg(windows)]
        AuthConfig::Windows => {
            config.authentication(AuthMethod::Integrated);
        }
    }

    config
}

/// Create a raw connection to SQL Server.
///
/// Establishes the TCP connection and performs the TDS handshake. All
/// failures, whether network, TLS or login, are reported as
/// [`ProviderError::Connection`].
pub async fn create_connection(db_config: &DatabaseConfig) -> Result<RawConnection, ProviderError> {
    let config = create_config(db_config);

    let address = format!("{}:{}", db_config.host, db_config.port);
    debug!("Creating connection to {}", address);

    let tcp = TcpStream::connect(&address).await.map_err(|e| {
        error!("Couldn't connect to SQL Server at {}", address);
        ProviderError::connection_with_source(format!("Failed to connect to {}", address), e)
    })?;

    tcp.set_nodelay(true)
        .map_err(|e| ProviderError::connection_with_source("Failed to set TCP_NODELAY", e))?;

    let client = Client::connect(config, tcp.compat_write())
        .await
        .map_err(|e| {
            error!("SQL Server handshake with {} failed: {}", address, e);
            ProviderError::connection_with_source(
                format!("Failed to connect to SQL Server at {}", address),
                e,
            )
        })?;

    debug!("Connection established successfully");
    Ok(client)
}
