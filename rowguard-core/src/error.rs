//! Error types for tenant-context propagation.
//!
//! The variants are split along the lines callers need to act on:
//!
//! - [`RowGuardError::TenantRequired`] is an authorization failure. The caller
//!   tried to reach tenant-scoped data without an authenticated tenant and must
//!   not retry.
//! - [`RowGuardError::Bind`] and [`RowGuardError::Unbind`] are failures of the
//!   session statements themselves. A failed unbind always costs the pool one
//!   physical connection.
//! - Everything else is plumbing (pool, driver, configuration, session store).
//!
//! ```rust
//! use rowguard_core::RowGuardError;
//!
//! let err = RowGuardError::TenantRequired;
//! assert!(err.is_authorization_failure());
//! assert!(!err.is_retryable());
//!
//! let err = RowGuardError::pool("timed out waiting for a connection");
//! assert!(err.is_retryable());
//! ```

use thiserror::Error;

/// Result type for tenant-guard operations.
pub type RowGuardResult<T> = Result<T, RowGuardError>;

/// Errors raised while binding, using, or releasing tenant-scoped connections.
#[derive(Error, Debug)]
pub enum RowGuardError {
    /// No tenant is bound to the current execution unit.
    #[error("no tenant bound to the current request; authentication is required")]
    TenantRequired,

    /// The tenant identifier cannot be rendered as a safe literal.
    #[error("invalid tenant identifier: {0}")]
    InvalidTenant(String),

    /// The bind statement failed; the connection was not handed out.
    #[error("failed to bind tenant {tenant}: {message}")]
    Bind {
        /// Tenant that was being bound.
        tenant: String,
        /// Underlying failure.
        message: String,
    },

    /// The unbind statement failed; the connection was discarded.
    #[error("failed to unbind tenant {tenant}, connection discarded: {message}")]
    Unbind {
        /// Tenant that was bound at the time.
        tenant: String,
        /// Underlying failure.
        message: String,
    },

    /// The underlying pool could not provide a connection.
    #[error("pool error: {0}")]
    Pool(String),

    /// A statement failed on the database.
    #[error("database error: {0}")]
    Database(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A session-context write happened outside any request scope.
    #[error("no session scope is active on the current task")]
    NoSessionScope,

    /// The persisted session store failed.
    #[error("session store error: {0}")]
    SessionStore(String),
}

impl RowGuardError {
    /// Create an invalid tenant error.
    pub fn invalid_tenant(message: impl Into<String>) -> Self {
        Self::InvalidTenant(message.into())
    }

    /// Create a pool error.
    pub fn pool(message: impl Into<String>) -> Self {
        Self::Pool(message.into())
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a session store error.
    pub fn session_store(message: impl Into<String>) -> Self {
        Self::SessionStore(message.into())
    }

    /// Check if this error means the caller is not authorized to touch
    /// tenant-scoped data.
    pub fn is_authorization_failure(&self) -> bool {
        matches!(self, Self::TenantRequired)
    }

    /// Check if retrying the same operation may succeed.
    ///
    /// Authorization and validation failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Pool(_) | Self::Bind { .. } | Self::Unbind { .. })
    }
}
