//! # rowguard-core
//!
//! Tenant-context propagation for databases that enforce row-level security.
//!
//! Row-level security only protects data if every statement a connection
//! runs carries the right tenant in session state. Pooled connections and
//! pooled workers are both reused across unrelated requests, so this crate
//! ties the tenant to exactly one request at both layers:
//!
//! - [`SessionContext`]: a task-local slot holding the tenant of the request
//!   being served. It exists only inside a scope and vanishes with it.
//! - [`Dialect`]: renders the bind and unbind statements for one engine
//!   ([`PostgresDialect`], [`MssqlDialect`]).
//! - [`TenantPool`]: decorates a [`ConnectionSource`]. It binds the session's
//!   tenant on acquire and unbinds before the connection goes back to the
//!   idle set, on every exit path.
//!
//! ```rust
//! use std::sync::Arc;
//! use rowguard_core::memory::MemorySource;
//! use rowguard_core::{PostgresDialect, SessionContext, TenantId, TenantPool};
//!
//! # tokio_test::block_on(async {
//! let pool = TenantPool::new(MemorySource::new(4), Arc::new(PostgresDialect::default()));
//!
//! let result = SessionContext::scope(async {
//!     SessionContext::set(TenantId::from(7_i64))?;
//!     let mut conn = pool.acquire().await?;
//!     conn.execute("SELECT * FROM orders").await?;
//!     conn.release().await
//! })
//! .await;
//! assert!(result.is_ok());
//!
//! // No session, no connection.
//! let denied = SessionContext::scope(pool.acquire()).await;
//! assert!(denied.unwrap_err().is_authorization_failure());
//! # });
//! ```
//!
//! Driver integrations live in `rowguard-postgres` and `rowguard-mssql`; the
//! HTTP side (copying the tenant from a persisted session into the request
//! scope) lives in `rowguard-axum`.

pub mod config;
pub mod dialect;
pub mod error;
pub mod guard;
pub mod logging;
pub mod memory;
pub mod session;
pub mod stats;
pub mod tenant;

pub use config::{EnvSource, MapEnvSource, MssqlSection, PostgresSection, RowGuardConfig, StdEnvSource};
pub use dialect::{
    DEFAULT_MSSQL_KEY, DEFAULT_PG_SETTING, Dialect, DialectKind, DialectSettings,
    MSSQL_UNBOUND_SENTINEL, MssqlDialect, PostgresDialect,
};
pub use error::{RowGuardError, RowGuardResult};
pub use guard::{ConnectionSource, HandleState, SessionConnection, TenantConnection, TenantPool};
pub use session::SessionContext;
pub use stats::{GuardStats, GuardStatsSnapshot};
pub use tenant::{TenantId, TenantIdFormat};

/// Re-exports for glob import.
pub mod prelude {
    pub use crate::config::RowGuardConfig;
    pub use crate::dialect::{Dialect, DialectKind, MssqlDialect, PostgresDialect};
    pub use crate::error::{RowGuardError, RowGuardResult};
    pub use crate::guard::{ConnectionSource, SessionConnection, TenantConnection, TenantPool};
    pub use crate::session::SessionContext;
    pub use crate::tenant::{TenantId, TenantIdFormat};
}
