//! Error types for the PostgreSQL integration.

use rowguard_core::RowGuardError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors raised by the PostgreSQL source.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tenant guard error.
    #[error(transparent)]
    Guard(#[from] RowGuardError),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is a pool or connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Check if this is a pool timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Pool(deadpool_postgres::PoolError::Timeout(_)))
    }
}

impl From<PgError> for RowGuardError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Pool(e) => RowGuardError::pool(e.to_string()),
            PgError::Postgres(e) => match e.code() {
                Some(code) => RowGuardError::database(format!("{} ({})", e, code.code())),
                None => RowGuardError::database(e.to_string()),
            },
            PgError::Config(msg) => RowGuardError::Config(msg),
            PgError::Guard(e) => e,
        }
    }
}
