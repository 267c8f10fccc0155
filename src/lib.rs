//! # rowguard
//!
//! Tenant-context propagation for databases that enforce row-level security.
//!
//! rowguard keeps one tenant bound to one request, at both layers where
//! reuse happens:
//!
//! - the **worker**: each request runs in its own [`SessionContext`] scope,
//!   which is gone when the request ends;
//! - the **connection**: a [`TenantPool`] binds the scope's tenant when a
//!   connection is handed out and unbinds it before the connection goes
//!   back to the idle set.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rowguard::prelude::*;
//! use rowguard::postgres::PgPoolBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), RowGuardError> {
//!     let pool = PgPoolBuilder::new()
//!         .url("postgresql://app@localhost/shop")
//!         .max_connections(4)
//!         .build()?;
//!
//!     SessionContext::scope(async {
//!         SessionContext::set(TenantId::from(7_i64))?;
//!
//!         // SET app.tenant_id = '7'
//!         let conn = pool.acquire().await?;
//!         let rows = conn.query("SELECT id FROM orders", &[]).await
//!             .map_err(|e| RowGuardError::database(e.to_string()))?;
//!         println!("{} orders", rows.len());
//!
//!         // RESET app.tenant_id
//!         conn.release().await
//!     })
//!     .await
//! }
//! ```
//!
//! ## Features
//!
//! - `postgres` (default): [`postgres`] source over deadpool-postgres
//! - `mssql`: [`mssql`] source over bb8 and Tiberius
//! - `axum`: [`axum`] session bridge layer, extractors and login routes
//! - `tracing-subscriber`: [`logging::init`] installs a subscriber

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use rowguard_core::{config, dialect, error, guard, logging, memory, session, stats, tenant};

/// PostgreSQL connection source.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use rowguard_postgres::*;
}

/// Microsoft SQL Server connection source.
#[cfg(feature = "mssql")]
#[cfg_attr(docsrs, doc(cfg(feature = "mssql")))]
pub mod mssql {
    pub use rowguard_mssql::*;
}

/// Axum integration.
#[cfg(feature = "axum")]
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
pub mod axum {
    pub use rowguard_axum::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use rowguard_core::prelude::*;

    #[cfg(feature = "axum")]
    pub use rowguard_axum::{
        BridgeError, CurrentTenant, MemorySessionStore, RequestSessionBridge, Session,
        SessionBridgeLayer, login_routes,
    };
}

// Re-export key types at the crate root
pub use rowguard_core::{
    ConnectionSource, Dialect, DialectKind, HandleState, MssqlDialect, PostgresDialect,
    RowGuardConfig, RowGuardError, RowGuardResult, SessionConnection, SessionContext,
    TenantConnection, TenantId, TenantIdFormat, TenantPool,
};
