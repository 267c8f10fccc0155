//! Request-scoped tenant context.
//!
//! The tenant for the request currently being served lives in a task-local
//! slot that exists only while a [`SessionContext::scope`] future is being
//! polled. The slot is created empty when the scope starts and disappears
//! when the scope future completes, fails, or is dropped, so a worker that
//! picks up the next request can never observe the previous one's tenant.
//!
//! ```rust,ignore
//! use rowguard_core::{SessionContext, TenantId};
//!
//! SessionContext::scope(async {
//!     SessionContext::set(TenantId::from(7_i64))?;
//!     let conn = pool.acquire().await?; // binds tenant 7
//!     // ...
//!     conn.release().await
//! })
//! .await?;
//!
//! // Outside the scope there is no tenant at all.
//! assert!(SessionContext::get().is_none());
//! ```
//!
//! Tokio does not copy task-locals into spawned tasks. A child task sees the
//! parent's tenant only when the parent hands it over explicitly with
//! [`SessionContext::propagate`].

use std::cell::RefCell;
use std::future::Future;

use tracing::{debug, info, trace};

use crate::error::{RowGuardError, RowGuardResult};
use crate::tenant::TenantId;

tokio::task_local! {
    /// Tenant slot for the current request.
    static SESSION: RefCell<Option<TenantId>>;
}

/// Accessor for the tenant bound to the current execution unit.
///
/// All operations act on the innermost active scope of the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionContext;

impl SessionContext {
    /// Run `fut` inside a fresh, empty session scope.
    pub fn scope<F>(fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        SESSION.scope(RefCell::new(None), fut)
    }

    /// Run `fut` inside a fresh scope pre-populated with `tenant`.
    pub fn scope_with<F>(tenant: TenantId, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        SESSION.scope(RefCell::new(Some(tenant)), fut)
    }

    /// Wrap `fut` so that it runs with a copy of the caller's current tenant.
    ///
    /// Use this when spawning a child task that must act for the same tenant:
    ///
    /// ```rust,ignore
    /// tokio::spawn(SessionContext::propagate(async move {
    ///     let conn = pool.acquire().await?;
    ///     // ...
    /// }));
    /// ```
    ///
    /// The copy lives exactly as long as the child future. Changes made by the
    /// child do not flow back to the parent.
    pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let current = Self::get();
        if let Some(ref tenant) = current {
            debug!(tenant = %tenant, "Propagating session to child task");
        }
        SESSION.scope(RefCell::new(current), fut)
    }

    /// Like [`propagate`](Self::propagate), for closures handed to
    /// `tokio::task::spawn_blocking`.
    pub fn propagate_blocking<F, R>(f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        let current = Self::get();
        move || SESSION.sync_scope(RefCell::new(current), f)
    }

    /// Bind `tenant` to the current scope, returning the previous tenant.
    ///
    /// Fails with [`RowGuardError::NoSessionScope`] when called outside a
    /// scope, so an identity can never be parked on a bare worker.
    pub fn set(tenant: TenantId) -> RowGuardResult<Option<TenantId>> {
        info!(tenant = %tenant, "Session tenant set");
        SESSION
            .try_with(move |slot| slot.borrow_mut().replace(tenant))
            .map_err(|_| RowGuardError::NoSessionScope)
    }

    /// Get the tenant bound to the current scope.
    #[inline]
    pub fn get() -> Option<TenantId> {
        let tenant = SESSION.try_with(|slot| slot.borrow().clone()).ok().flatten();
        trace!(bound = tenant.is_some(), "Session tenant lookup");
        tenant
    }

    /// Get the current tenant or fail with [`RowGuardError::TenantRequired`].
    pub fn require() -> RowGuardResult<TenantId> {
        Self::get().ok_or(RowGuardError::TenantRequired)
    }

    /// Remove the tenant from the current scope.
    ///
    /// Returns the tenant that was bound. Calling this outside a scope, or on
    /// an empty scope, is a no-op.
    pub fn clear() -> Option<TenantId> {
        let previous = SESSION
            .try_with(|slot| slot.borrow_mut().take())
            .ok()
            .flatten();
        if let Some(ref tenant) = previous {
            info!(tenant = %tenant, "Session tenant cleared");
        }
        previous
    }

    /// Check whether the calling task is inside a session scope.
    pub fn is_scoped() -> bool {
        SESSION.try_with(|_| ()).is_ok()
    }
}
