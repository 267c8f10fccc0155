//! Error types for the SQL Server integration.

use rowguard_core::RowGuardError;
use thiserror::Error;

/// Result type for MSSQL operations.
pub type MssqlResult<T> = Result<T, MssqlError>;

/// Errors raised by the SQL Server source.
#[derive(Error, Debug)]
pub enum MssqlError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(String),

    /// Error opening or validating a pooled connection.
    #[error("connection error: {0}")]
    Connection(#[from] bb8_tiberius::Error),

    /// Tiberius/SQL Server error.
    #[error("sql server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Timed out waiting for, or opening, a connection.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Tenant guard error.
    #[error(transparent)]
    Guard(#[from] RowGuardError),
}

impl MssqlError {
    /// Create a pool error.
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check if this is a pool or connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Connection(_) | Self::Timeout(_))
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<bb8::RunError<MssqlError>> for MssqlError {
    fn from(err: bb8::RunError<MssqlError>) -> Self {
        match err {
            bb8::RunError::User(e) => e,
            bb8::RunError::TimedOut => MssqlError::pool("timed out waiting for a connection"),
        }
    }
}

impl From<MssqlError> for RowGuardError {
    fn from(err: MssqlError) -> Self {
        match err {
            MssqlError::Pool(msg) => RowGuardError::Pool(msg),
            MssqlError::Connection(e) => RowGuardError::pool(e.to_string()),
            MssqlError::Timeout(ms) => RowGuardError::pool(format!("timed out after {}ms", ms)),
            MssqlError::SqlServer(e) => match e.code() {
                Some(code) => RowGuardError::database(format!("{} (error {})", e, code)),
                None => RowGuardError::database(e.to_string()),
            },
            MssqlError::Config(msg) => RowGuardError::Config(msg),
            MssqlError::Guard(e) => e,
        }
    }
}
