//! Axum integration for rowguard.
//!
//! A logged-in user's tenant lives in a persisted session. The
//! [`SessionBridgeLayer`] copies it into the request's
//! [`SessionContext`](rowguard_core::SessionContext) before the handler runs
//! and drops it when the request ends, so a [`TenantPool`](rowguard_core::TenantPool)
//! used from the handler binds exactly that tenant.
//!
//! # Example
//!
//! ```rust,ignore
//! use axum::{Router, extract::State, routing::get};
//! use rowguard_axum::{BridgeError, CurrentTenant, MemorySessionStore, RequestSessionBridge,
//!     SessionBridgeLayer, login_routes};
//! use rowguard_core::RowGuardError;
//! use rowguard_postgres::{PgPoolBuilder, TenantPgPool};
//!
//! async fn count_orders(
//!     State(pool): State<TenantPgPool>,
//!     CurrentTenant(_tenant): CurrentTenant,
//! ) -> Result<String, BridgeError> {
//!     let conn = pool.acquire().await?;
//!     let row = conn.query_one("SELECT count(*) FROM orders", &[]).await
//!         .map_err(|e| RowGuardError::database(e.to_string()))?;
//!     conn.release().await?;
//!     Ok(row.get::<_, i64>(0).to_string())
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = PgPoolBuilder::new()
//!         .url("postgresql://app@localhost/shop")
//!         .build()
//!         .unwrap();
//!     let bridge = RequestSessionBridge::new(MemorySessionStore::new());
//!
//!     let app = Router::new()
//!         .route("/orders/count", get(count_orders))
//!         .merge(login_routes())
//!         .layer(SessionBridgeLayer::new(bridge))
//!         .with_state(pool);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

pub mod bridge;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod layer;
pub mod store;

pub use bridge::RequestSessionBridge;
pub use error::{BridgeError, BridgeResult};
pub use extract::{CurrentTenant, Session};
pub use handlers::{LoginRequest, LoginResponse, login_routes};
pub use layer::{DEFAULT_COOKIE_NAME, SessionBridgeLayer, SessionBridgeService, SessionHandle};
pub use store::{MemorySessionStore, SessionKey, SessionStore};

/// Prelude for HTTP handlers.
pub mod prelude {
    pub use crate::{
        BridgeError, CurrentTenant, MemorySessionStore, RequestSessionBridge, Session,
        SessionBridgeLayer, login_routes,
    };
    pub use rowguard_core::prelude::*;
}
