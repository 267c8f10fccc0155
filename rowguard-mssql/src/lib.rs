//! # rowguard-mssql
//!
//! Microsoft SQL Server integration for rowguard: a bb8/Tiberius pool whose
//! connections carry the session tenant in `SESSION_CONTEXT(N'TenantId')`.
//!
//! SQL Server cannot delete a session-context key, so releasing a connection
//! overwrites the key with `-1`, a value no tenant owns:
//!
//! ```sql
//! CREATE FUNCTION rls.fn_tenant_predicate(@TenantId BIGINT)
//!     RETURNS TABLE WITH SCHEMABINDING
//! AS RETURN SELECT 1 AS allowed
//!     WHERE @TenantId = CAST(SESSION_CONTEXT(N'TenantId') AS BIGINT);
//!
//! CREATE SECURITY POLICY rls.orders_policy
//!     ADD FILTER PREDICATE rls.fn_tenant_predicate(tenant_id) ON dbo.orders
//!     WITH (STATE = ON);
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use rowguard_core::{SessionContext, TenantId};
//! use rowguard_mssql::MssqlPoolBuilder;
//!
//! let pool = MssqlPoolBuilder::new()
//!     .connection_string("Server=localhost;Database=orders;User Id=sa;Password=...")
//!     .build()
//!     .await?;
//!
//! SessionContext::scope_with(TenantId::from(7_i64), async {
//!     let mut conn = pool.acquire().await?;
//!     let rows = conn.query("SELECT id, total FROM dbo.orders", &[]).await?;
//!     // ...
//!     conn.release().await
//! })
//! .await?;
//! ```

pub mod config;
pub mod error;
pub mod pool;

pub use config::{EncryptionMode, MssqlConfig};
pub use error::{MssqlError, MssqlResult};
pub use pool::{
    MssqlClient, MssqlPoolBuilder, MssqlSource, PoolConfig, PoolStatus, SessionClient,
    SessionManager, TdsClient, TenantMssqlPool,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::MssqlConfig;
    pub use crate::error::{MssqlError, MssqlResult};
    pub use crate::pool::{MssqlPoolBuilder, TenantMssqlPool};
}
