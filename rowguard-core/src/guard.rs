//! Tenant-binding connection guard.
//!
//! [`TenantPool`] decorates any [`ConnectionSource`]. Every connection it hands
//! out has already run the dialect's bind statement for the tenant in the
//! caller's [`SessionContext`], and every connection it takes back runs the
//! unbind statement before the physical connection re-enters the idle set.
//!
//! ```text
//!   acquire()                         release() / drop
//!      │                                   │
//!      ▼                                   ▼
//!  [Created] ──bind ok──▶ [Bound] ──unbind──▶ [Released] ──▶ recycle
//!      │                                   │
//!   bind failed / cancelled          unbind failed / cancelled
//!      ▼                                   ▼
//!   discard                             discard
//! ```
//!
//! For any physical connection the statement stream is therefore always
//! `bind(T), <T's statements>*, unbind()` before the next `bind(T')`.
//!
//! A transaction the caller left open is rolled back before the unbind. Run
//! inside that transaction, the unbind could be undone by a later `ROLLBACK`
//! issued on behalf of the next tenant, restoring the previous tenant's value.
//!
//! A handle that goes out of scope without [`TenantConnection::release`]
//! (early `?` return, panic, cancelled future) still unbinds: the drop path
//! moves the physical connection into a background task that runs the same
//! unbind-then-recycle sequence. A connection whose unbind failed, or whose
//! state is unknown because a session statement was interrupted, is always
//! discarded.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::dialect::Dialect;
use crate::error::{RowGuardError, RowGuardResult};
use crate::session::SessionContext;
use crate::stats::{GuardStats, GuardStatsSnapshot};
use crate::tenant::TenantId;

/// A physical connection able to run session statements.
#[async_trait]
pub trait SessionConnection: Send + 'static {
    /// Execute a statement that returns no rows.
    async fn run_statement(&mut self, sql: &str) -> RowGuardResult<()>;

    /// Roll back any transaction left open on the session.
    ///
    /// Called before every unbind. Must succeed on a session with no open
    /// transaction. An error discards the connection.
    async fn rollback_open_transaction(&mut self) -> RowGuardResult<()> {
        Ok(())
    }
}

/// The pool being decorated.
///
/// Implementations keep their own sizing, health-check and eviction policy;
/// the guard only decides whether a returned connection is recycled or
/// discarded.
#[async_trait]
pub trait ConnectionSource: Send + Sync + 'static {
    /// The pooled physical connection type.
    type Connection: SessionConnection;

    /// Borrow a connection, waiting for one if the pool is exhausted.
    async fn acquire(&self) -> RowGuardResult<Self::Connection>;

    /// Return a clean connection to the idle set.
    fn recycle(&self, conn: Self::Connection);

    /// Remove a connection from the pool for good.
    fn discard(&self, conn: Self::Connection);
}

/// Lifecycle of a [`TenantConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Borrowed from the pool, bind statement not yet confirmed.
    Created,
    /// Tenant bound; the handle is usable.
    Bound,
    /// Unbind issued; the physical connection has left the handle.
    Released,
}

/// Connection pool decorator that binds the session tenant on acquire and
/// unbinds it on release.
pub struct TenantPool<S: ConnectionSource> {
    source: Arc<S>,
    dialect: Arc<dyn Dialect>,
    stats: Arc<GuardStats>,
    next_handle: Arc<AtomicU64>,
}

impl<S: ConnectionSource> Clone for TenantPool<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            dialect: Arc::clone(&self.dialect),
            stats: Arc::clone(&self.stats),
            next_handle: Arc::clone(&self.next_handle),
        }
    }
}

impl<S: ConnectionSource> fmt::Debug for TenantPool<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantPool")
            .field("dialect", &self.dialect.name())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl<S: ConnectionSource> TenantPool<S> {
    /// Wrap `source`, binding tenants with `dialect`.
    pub fn new(source: S, dialect: Arc<dyn Dialect>) -> Self {
        info!(dialect = dialect.name(), "Tenant-aware pool initialized");
        Self {
            source: Arc::new(source),
            dialect,
            stats: Arc::new(GuardStats::new()),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Get the decorated source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get the active dialect.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    /// Get a snapshot of the guard counters.
    pub fn stats(&self) -> GuardStatsSnapshot {
        self.stats.snapshot()
    }

    /// Acquire a connection bound to the tenant of the current session.
    ///
    /// Fails with [`RowGuardError::TenantRequired`] when no tenant is bound;
    /// no connection is borrowed and no statement is issued in that case.
    pub async fn acquire(&self) -> RowGuardResult<TenantConnection<S>> {
        let Some(tenant) = SessionContext::get() else {
            self.stats.record_denied();
            warn!(
                dialect = self.dialect.name(),
                "Connection requested without a tenant in the session"
            );
            return Err(RowGuardError::TenantRequired);
        };
        self.acquire_for(tenant).await
    }

    /// Acquire a connection bound to an explicit tenant.
    ///
    /// Intended for background jobs that act for a known tenant outside any
    /// request. Request handlers should use [`acquire`](Self::acquire).
    pub async fn acquire_for(&self, tenant: TenantId) -> RowGuardResult<TenantConnection<S>> {
        // Render first: an unusable identifier never costs a pool round trip.
        let bind_sql = self.dialect.bind_statement(&tenant)?;

        let conn = self.source.acquire().await?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let mut handle = TenantConnection {
            lease: Lease::new(conn, Arc::clone(&self.source), Arc::clone(&self.stats)),
            tenant,
            dialect: Arc::clone(&self.dialect),
            state: HandleState::Created,
            id,
        };
        handle.bind(&bind_sql).await?;
        Ok(handle)
    }

    /// Acquire a connection, run `f` with it, and release it whatever `f`
    /// returns.
    ///
    /// An unbind failure is reported even when `f` succeeded, because the
    /// physical connection was lost.
    ///
    /// ```rust,ignore
    /// let count = pool
    ///     .with_connection(|conn| Box::pin(async move { conn.count_orders().await }))
    ///     .await?;
    /// ```
    pub async fn with_connection<T, F>(&self, f: F) -> RowGuardResult<T>
    where
        F: for<'c> FnOnce(&'c mut TenantConnection<S>) -> BoxFuture<'c, RowGuardResult<T>>,
    {
        let mut conn = self.acquire().await?;
        let result = f(&mut conn).await;
        let released = conn.release().await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(unbind)) => Err(unbind),
            (Err(e), _) => Err(e),
        }
    }
}

/// A physical connection on loan from a [`ConnectionSource`].
///
/// Dropping a lease that still holds its connection discards the connection:
/// a lease is only dropped full when a session statement was interrupted and
/// the session state is unknown.
struct Lease<S: ConnectionSource> {
    conn: Option<S::Connection>,
    source: Arc<S>,
    stats: Arc<GuardStats>,
    bound: bool,
}

impl<S: ConnectionSource> Lease<S> {
    fn new(conn: S::Connection, source: Arc<S>, stats: Arc<GuardStats>) -> Self {
        Self {
            conn: Some(conn),
            source,
            stats,
            bound: false,
        }
    }

    /// Move the connection into a new lease, leaving this one empty.
    fn split_off(&mut self) -> Self {
        Self {
            conn: self.conn.take(),
            source: Arc::clone(&self.source),
            stats: Arc::clone(&self.stats),
            bound: self.bound,
        }
    }

    fn recycle(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.source.recycle(conn);
        }
    }

    fn discard(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.source.discard(conn);
        }
    }
}

impl<S: ConnectionSource> Drop for Lease<S> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                bound = self.bound,
                "Session statement interrupted, discarding connection"
            );
            self.source.discard(conn);
            if self.bound {
                self.stats.record_orphan_discard();
            } else {
                self.stats.record_bind_failure();
            }
        }
    }
}

/// Run the unbind statement on `lease` and hand the connection back.
async fn unbind_and_return<S: ConnectionSource>(
    mut lease: Lease<S>,
    dialect: Arc<dyn Dialect>,
    tenant: TenantId,
    handle: u64,
) -> RowGuardResult<()> {
    let Some(conn) = lease.conn.as_mut() else {
        return Ok(());
    };

    let sql = dialect.unbind_statement();
    debug!(handle, tenant = %tenant, sql = %sql, "Unbinding tenant");

    let result = match conn.rollback_open_transaction().await {
        Ok(()) => conn.run_statement(&sql).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            lease.recycle();
            lease.stats.record_release();
            debug!(handle, tenant = %tenant, "Connection returned to pool");
            Ok(())
        }
        Err(e) => {
            lease.discard();
            lease.stats.record_unbind_failure();
            error!(
                handle,
                tenant = %tenant,
                error = %e,
                "Unbind failed, connection discarded"
            );
            Err(RowGuardError::Unbind {
                tenant: tenant.to_string(),
                message: e.to_string(),
            })
        }
    }
}

/// A pooled connection bound to one tenant.
///
/// Dereferences to the physical connection, so every ordinary operation is a
/// plain pass-through. Only [`release`](Self::release) (and the drop path)
/// touch the session state. Inspection through [`tenant`](Self::tenant),
/// [`state`](Self::state), equality and `Debug` never issues a statement.
pub struct TenantConnection<S: ConnectionSource> {
    lease: Lease<S>,
    tenant: TenantId,
    dialect: Arc<dyn Dialect>,
    state: HandleState,
    id: u64,
}

impl<S: ConnectionSource> TenantConnection<S> {
    async fn bind(&mut self, sql: &str) -> RowGuardResult<()> {
        let Some(conn) = self.lease.conn.as_mut() else {
            return Err(RowGuardError::pool("connection left the handle before bind"));
        };

        debug!(handle = self.id, tenant = %self.tenant, sql = %sql, "Binding tenant");
        let result = conn.run_statement(sql).await;
        match result {
            Ok(()) => {
                self.lease.bound = true;
                self.state = HandleState::Bound;
                self.lease.stats.record_acquire();
                info!(handle = self.id, tenant = %self.tenant, "Tenant bound to connection");
                Ok(())
            }
            Err(e) => {
                self.lease.discard();
                self.lease.stats.record_bind_failure();
                warn!(
                    handle = self.id,
                    tenant = %self.tenant,
                    error = %e,
                    "Bind failed, connection discarded"
                );
                Err(RowGuardError::Bind {
                    tenant: self.tenant.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Unbind the tenant and return the connection to the pool.
    ///
    /// If the unbind statement fails the physical connection is discarded and
    /// [`RowGuardError::Unbind`] is returned.
    pub async fn release(mut self) -> RowGuardResult<()> {
        let lease = self.lease.split_off();
        self.state = HandleState::Released;
        unbind_and_return(lease, Arc::clone(&self.dialect), self.tenant.clone(), self.id).await
    }

    /// The tenant bound to this connection.
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Check whether a tenant is currently bound.
    pub fn is_bound(&self) -> bool {
        self.state == HandleState::Bound
    }

    /// Process-unique handle number, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the physical connection.
    pub fn get_ref(&self) -> &S::Connection {
        self.conn()
    }

    /// Get the physical connection mutably.
    pub fn get_mut(&mut self) -> &mut S::Connection {
        self.conn_mut()
    }

    fn conn(&self) -> &S::Connection {
        self.lease
            .conn
            .as_ref()
            .expect("connection is present until the handle is released")
    }

    fn conn_mut(&mut self) -> &mut S::Connection {
        self.lease
            .conn
            .as_mut()
            .expect("connection is present until the handle is released")
    }
}

impl<S: ConnectionSource> Deref for TenantConnection<S> {
    type Target = S::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn()
    }
}

impl<S: ConnectionSource> DerefMut for TenantConnection<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn_mut()
    }
}

impl<S: ConnectionSource> PartialEq for TenantConnection<S> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<S: ConnectionSource> Eq for TenantConnection<S> {}

impl<S: ConnectionSource> fmt::Debug for TenantConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantConnection")
            .field("id", &self.id)
            .field("tenant", &self.tenant)
            .field("state", &self.state)
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

impl<S: ConnectionSource> Drop for TenantConnection<S> {
    fn drop(&mut self) {
        // Created: the lease's own drop discards. Released: nothing left.
        if self.state != HandleState::Bound || self.lease.conn.is_none() {
            return;
        }
        self.state = HandleState::Released;
        let lease = self.lease.split_off();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!(
                    handle = self.id,
                    tenant = %self.tenant,
                    "Connection dropped without release, unbinding in background"
                );
                lease.stats.record_background_release();
                let dialect = Arc::clone(&self.dialect);
                let tenant = self.tenant.clone();
                let id = self.id;
                runtime.spawn(async move {
                    // Failures are logged and counted inside.
                    let _ = unbind_and_return(lease, dialect, tenant, id).await;
                });
            }
            Err(_) => {
                error!(
                    handle = self.id,
                    tenant = %self.tenant,
                    "Connection dropped outside a runtime, discarding"
                );
                // The lease discards on drop.
                drop(lease);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::PostgresDialect;
    use crate::memory::{MemoryEvent, MemorySource};
    use pretty_assertions::assert_eq;

    fn pool(capacity: usize) -> TenantPool<MemorySource> {
        TenantPool::new(MemorySource::new(capacity), Arc::new(PostgresDialect::default()))
    }

    #[tokio::test]
    async fn test_acquire_binds_before_anything_else() {
        let pool = pool(1);
        let conn = pool.acquire_for(TenantId::from(7_i64)).await.unwrap();
        assert_eq!(conn.state(), HandleState::Bound);
        assert_eq!(
            pool.source().statements(conn.connection_id()),
            vec!["SET app.tenant_id = '7'".to_string()]
        );
        conn.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_acquire_without_session_is_denied() {
        let pool = pool(1);
        let err = SessionContext::scope(pool.acquire()).await.unwrap_err();
        assert!(err.is_authorization_failure());
        assert!(pool.source().events().is_empty());
        assert_eq!(pool.stats().denied, 1);
    }

    #[tokio::test]
    async fn test_invalid_tenant_never_borrows() {
        let pool = pool(1);
        let err = pool
            .acquire_for(TenantId::new("1; DROP TABLE orders").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RowGuardError::InvalidTenant(_)));
        assert!(pool.source().events().is_empty());
    }

    #[tokio::test]
    async fn test_inspection_does_not_issue_statements() {
        let pool = pool(1);
        let conn = pool.acquire_for(TenantId::from(3_i64)).await.unwrap();
        let before = pool.source().events().len();

        let _ = format!("{:?}", conn);
        assert!(PartialEq::eq(&conn, &conn));
        assert!(conn.is_bound());
        assert_eq!(conn.tenant().as_str(), "3");
        let _ = conn.get_ref();

        assert_eq!(pool.source().events().len(), before);
        conn.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_discards() {
        let pool = pool(1);
        pool.source().fail_next("SET ", 1);

        let err = pool.acquire_for(TenantId::from(1_i64)).await.unwrap_err();
        assert!(matches!(err, RowGuardError::Bind { .. }));
        assert_eq!(pool.source().discarded(), vec![1]);
        assert_eq!(pool.source().idle_count(), 0);

        let snap = pool.stats();
        assert_eq!(snap.bind_failures, 1);
        assert_eq!(snap.acquired, 0);
        assert_eq!(snap.active, 0);
    }

    #[tokio::test]
    async fn test_open_transaction_rolled_back_before_unbind() {
        let pool = pool(1);
        let mut conn = pool.acquire_for(TenantId::from(1_i64)).await.unwrap();
        conn.execute("BEGIN").await.unwrap();
        conn.execute("UPDATE orders SET total = 0").await.unwrap();
        conn.release().await.unwrap();

        let conn = pool.acquire_for(TenantId::from(2_i64)).await.unwrap();
        assert!(!conn.in_transaction());
        conn.release().await.unwrap();

        assert_eq!(
            pool.source().statements(1),
            vec![
                "SET app.tenant_id = '1'".to_string(),
                "BEGIN".to_string(),
                "UPDATE orders SET total = 0".to_string(),
                "ROLLBACK".to_string(),
                "RESET app.tenant_id".to_string(),
                "SET app.tenant_id = '2'".to_string(),
                "RESET app.tenant_id".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_rollback_discards_without_unbind() {
        let pool = pool(1);
        pool.source().fail_next("ROLLBACK", 1);

        let mut conn = pool.acquire_for(TenantId::from(1_i64)).await.unwrap();
        conn.execute("BEGIN").await.unwrap();
        let err = conn.release().await.unwrap_err();

        assert!(matches!(err, RowGuardError::Unbind { .. }));
        assert_eq!(pool.source().discarded(), vec![1]);
        assert_eq!(pool.source().idle_count(), 0);
        assert_eq!(
            pool.source().statements(1).last().map(String::as_str),
            Some("ROLLBACK")
        );
    }

    #[tokio::test]
    async fn test_dropped_handle_rolls_back_in_background() {
        let pool = pool(1);
        let mut conn = pool.acquire_for(TenantId::from(1_i64)).await.unwrap();
        conn.execute("BEGIN").await.unwrap();
        drop(conn);

        // Capacity 1: waits for the background release.
        let conn = pool.acquire_for(TenantId::from(2_i64)).await.unwrap();
        conn.release().await.unwrap();

        assert_eq!(
            &pool.source().statements(1)[..4],
            &[
                "SET app.tenant_id = '1'".to_string(),
                "BEGIN".to_string(),
                "ROLLBACK".to_string(),
                "RESET app.tenant_id".to_string(),
            ]
        );
    }

    #[test]
    fn test_drop_outside_runtime_discards() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let pool = pool(1);
        let conn = runtime
            .block_on(pool.acquire_for(TenantId::from(1_i64)))
            .unwrap();

        // No runtime is entered here, so nothing can run the unbind.
        drop(conn);

        assert_eq!(pool.source().discarded(), vec![1]);
        assert_eq!(pool.source().idle_count(), 0);
        assert_eq!(
            pool.source().statements(1),
            vec!["SET app.tenant_id = '1'".to_string()]
        );
        let snap = pool.stats();
        assert_eq!(snap.active, 0);
        assert_eq!(snap.discarded, 1);
        assert_eq!(snap.background_releases, 0);
    }

    #[tokio::test]
    async fn test_background_unbind_failure_discards() {
        let pool = pool(1);
        pool.source().fail_next("RESET", 1);

        let conn = pool.acquire_for(TenantId::from(1_i64)).await.unwrap();
        drop(conn);

        for _ in 0..100 {
            if !pool.source().discarded().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(pool.source().discarded(), vec![1]);
        assert_eq!(pool.source().idle_count(), 0);
        let snap = pool.stats();
        assert_eq!(snap.background_releases, 1);
        assert_eq!(snap.unbind_failures, 1);
        assert_eq!(snap.released, 0);
        assert_eq!(snap.active, 0);
    }

    #[tokio::test]
    async fn test_with_connection_releases_on_error() {
        let pool = pool(1);
        let result: RowGuardResult<()> = SessionContext::scope_with(TenantId::from(9_i64), async {
            pool.with_connection(|conn| {
                Box::pin(async move {
                    conn.execute("SELECT * FROM orders").await?;
                    Err(RowGuardError::database("boom"))
                })
            })
            .await
        })
        .await;

        assert!(matches!(result, Err(RowGuardError::Database(_))));
        let events = pool.source().events();
        assert_eq!(events.last(), Some(&MemoryEvent::Recycled { conn: 1 }));
        assert_eq!(pool.stats().released, 1);
    }
}
