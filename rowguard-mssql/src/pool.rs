//! Tenant-aware connection pool for Microsoft SQL Server.
//!
//! bb8 has no call for removing a checked-out connection from the pool, so
//! [`SessionManager`] wraps the Tiberius manager and reports a connection as
//! broken once the guard has marked it discarded. bb8 then closes it on
//! return instead of putting it back in the idle set.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection};
use bb8_tiberius::ConnectionManager;
use rowguard_core::{
    ConnectionSource, MssqlDialect, RowGuardConfig, RowGuardResult, SessionConnection, TenantPool,
};
use tracing::{debug, info, warn};

use crate::config::MssqlConfig;
use crate::error::{MssqlError, MssqlResult};

/// The Tiberius client type produced by `bb8-tiberius`.
pub type TdsClient = <ConnectionManager as ManageConnection>::Connection;

/// A tenant-aware SQL Server pool.
pub type TenantMssqlPool = TenantPool<MssqlSource>;

/// A physical connection plus its discard mark.
pub struct SessionClient {
    client: TdsClient,
    discarded: bool,
}

impl fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionClient")
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}

/// bb8 manager that drops connections the guard discarded.
pub struct SessionManager {
    inner: ConnectionManager,
    connect_timeout: Duration,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager from configuration.
    pub fn new(config: &MssqlConfig) -> MssqlResult<Self> {
        Ok(Self {
            inner: ConnectionManager::new(config.to_tiberius_config()?),
            connect_timeout: config.connect_timeout,
        })
    }
}

#[async_trait]
impl ManageConnection for SessionManager {
    type Connection = SessionClient;
    type Error = MssqlError;

    async fn connect(&self) -> Result<SessionClient, MssqlError> {
        let client = tokio::time::timeout(self.connect_timeout, self.inner.connect())
            .await
            .map_err(|_| MssqlError::Timeout(self.connect_timeout.as_millis() as u64))??;
        debug!("Opened SQL Server connection");
        Ok(SessionClient {
            client,
            discarded: false,
        })
    }

    async fn is_valid(&self, conn: &mut SessionClient) -> Result<(), MssqlError> {
        self.inner
            .is_valid(&mut conn.client)
            .await
            .map_err(MssqlError::from)
    }

    fn has_broken(&self, conn: &mut SessionClient) -> bool {
        conn.discarded || self.inner.has_broken(&mut conn.client)
    }
}

/// A pooled SQL Server client.
///
/// Dereferences to the Tiberius client, so `query`, `execute` and
/// `simple_query` are called directly on it.
#[derive(Debug)]
pub struct MssqlClient {
    inner: PooledConnection<'static, SessionManager>,
}

impl Deref for MssqlClient {
    type Target = TdsClient;

    fn deref(&self) -> &TdsClient {
        &self.inner.client
    }
}

impl DerefMut for MssqlClient {
    fn deref_mut(&mut self) -> &mut TdsClient {
        &mut self.inner.client
    }
}

#[async_trait]
impl SessionConnection for MssqlClient {
    async fn run_statement(&mut self, sql: &str) -> RowGuardResult<()> {
        self.inner
            .client
            .execute(sql, &[])
            .await
            .map(|_| ())
            .map_err(|e| MssqlError::from(e).into())
    }

    async fn rollback_open_transaction(&mut self) -> RowGuardResult<()> {
        self.run_statement(ROLLBACK_OPEN_TRANSACTION).await
    }
}

/// Rolls back only when `@@TRANCOUNT` shows an open transaction; a bare
/// `ROLLBACK` outside one is an error on SQL Server.
const ROLLBACK_OPEN_TRANSACTION: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

/// A bb8/Tiberius pool as a [`ConnectionSource`].
#[derive(Clone)]
pub struct MssqlSource {
    inner: Pool<SessionManager>,
    config: Arc<MssqlConfig>,
    max_size: usize,
}

impl MssqlSource {
    /// Create a source from configuration.
    pub async fn new(config: MssqlConfig, pool_config: PoolConfig) -> MssqlResult<Self> {
        let mgr = SessionManager::new(&config)?;
        let min_idle = (pool_config.min_connections > 0).then_some(pool_config.min_connections as u32);

        let pool = Pool::builder()
            .max_size(pool_config.max_connections as u32)
            .min_idle(min_idle)
            .connection_timeout(pool_config.connection_timeout)
            .idle_timeout(pool_config.idle_timeout)
            .max_lifetime(pool_config.max_lifetime)
            .build(mgr)
            .await
            .map_err(|e| MssqlError::pool(format!("failed to create pool: {}", e)))?;

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %pool_config.max_connections,
            "MSSQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
            max_size: pool_config.max_connections,
        })
    }

    /// Get the current pool status.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state();
        PoolStatus {
            connections: state.connections as usize,
            idle_connections: state.idle_connections as usize,
            max_size: self.max_size,
        }
    }

    /// Get the connection configuration.
    pub fn config(&self) -> &MssqlConfig {
        &self.config
    }

    /// Check that a connection can be opened and answers `SELECT 1`.
    ///
    /// Runs outside the tenant guard and touches no session state.
    pub async fn is_healthy(&self) -> bool {
        match self.inner.get().await {
            Ok(mut conn) => match conn.client.simple_query("SELECT 1").await {
                Ok(stream) => stream.into_results().await.is_ok(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ConnectionSource for MssqlSource {
    type Connection = MssqlClient;

    async fn acquire(&self) -> RowGuardResult<MssqlClient> {
        debug!("Acquiring connection from pool");
        let inner = self.inner.get_owned().await.map_err(MssqlError::from)?;
        Ok(MssqlClient { inner })
    }

    fn recycle(&self, conn: MssqlClient) {
        drop(conn);
    }

    fn discard(&self, mut conn: MssqlClient) {
        warn!("Marking SQL Server connection broken");
        conn.inner.discarded = true;
        drop(conn);
    }
}

/// Pool status information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Current number of connections (including idle).
    pub connections: usize,
    /// Number of idle connections.
    pub idle_connections: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
}

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: usize,
    /// Idle connections to keep open. Zero opens connections on demand.
    pub min_connections: usize,
    /// Maximum time to wait for a connection.
    pub connection_timeout: Duration,
    /// Maximum idle time before a connection is closed.
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            connection_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

/// Builder for a [`TenantMssqlPool`].
#[derive(Debug, Default)]
pub struct MssqlPoolBuilder {
    config: Option<MssqlConfig>,
    connection_string: Option<String>,
    pool_config: PoolConfig,
    dialect: Option<MssqlDialect>,
}

impl MssqlPoolBuilder {
    /// Create a new pool builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string.
    pub fn connection_string(mut self, conn_str: impl Into<String>) -> Self {
        self.connection_string = Some(conn_str.into());
        self
    }

    /// Set the connection configuration.
    pub fn config(mut self, config: MssqlConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.pool_config.max_connections = n;
        self
    }

    /// Set the number of idle connections to keep open.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.pool_config.min_connections = n;
        self
    }

    /// Set the connection timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connection_timeout = timeout;
        self
    }

    /// Use a specific dialect (session key and tenant format).
    pub fn dialect(mut self, dialect: MssqlDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    /// Take the session key and tenant format from `config`.
    pub fn guard_config(mut self, config: &RowGuardConfig) -> MssqlResult<Self> {
        let dialect = MssqlDialect::new(&config.mssql.session_key, config.tenant_format)?;
        self.dialect = Some(dialect);
        Ok(self)
    }

    /// Build the pool.
    pub async fn build(self) -> MssqlResult<TenantMssqlPool> {
        let config = if let Some(config) = self.config {
            config
        } else if let Some(conn_str) = self.connection_string {
            MssqlConfig::from_connection_string(conn_str)?
        } else {
            return Err(MssqlError::config(
                "no connection string or config provided",
            ));
        };

        let source = MssqlSource::new(config, self.pool_config).await?;
        let dialect = self.dialect.unwrap_or_default();
        Ok(TenantPool::new(source, Arc::new(dialect)))
    }
}
