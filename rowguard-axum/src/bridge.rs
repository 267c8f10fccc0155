//! Moves the tenant between the persisted session and the request scope.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use rowguard_core::{RowGuardResult, SessionContext, TenantId, TenantIdFormat};
use tracing::{debug, info, warn};

use crate::store::{SessionKey, SessionStore};

/// Loads the tenant at request start and clears it at request end.
///
/// Every request runs in its own [`SessionContext`] scope. Whatever the
/// handler does (completes, fails, panics, or is cancelled), the scope ends
/// with the request, so the worker that runs it comes back with no tenant.
///
/// Logins are checked against a [`TenantIdFormat`] (integers unless set with
/// [`tenant_format`](Self::tenant_format)), so a session never stores a
/// tenant the pool would refuse to bind.
#[derive(Clone)]
pub struct RequestSessionBridge {
    store: Arc<dyn SessionStore>,
    format: TenantIdFormat,
}

impl fmt::Debug for RequestSessionBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestSessionBridge")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl RequestSessionBridge {
    /// Create a bridge over `store`.
    pub fn new(store: impl SessionStore) -> Self {
        Self::with_store(Arc::new(store))
    }

    /// Create a bridge over a shared store.
    pub fn with_store(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            format: TenantIdFormat::default(),
        }
    }

    /// Only accept logins for tenants of `format`.
    ///
    /// Use the same format the pool's dialect was built with.
    pub fn tenant_format(mut self, format: TenantIdFormat) -> Self {
        self.format = format;
        self
    }

    /// The accepted tenant format.
    pub fn format(&self) -> TenantIdFormat {
        self.format
    }

    /// The backing session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Run `fut` as one request belonging to the session `key`.
    ///
    /// A missing key, a key with no stored tenant, and a failing store all
    /// start the request unauthenticated.
    pub fn run<F>(&self, key: Option<SessionKey>, fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        let store = Arc::clone(&self.store);
        SessionContext::scope(async move {
            load(store.as_ref(), key.as_ref()).await;
            let output = fut.await;
            if let Some(tenant) = SessionContext::clear() {
                debug!(tenant = %tenant, "Request finished");
            }
            output
        })
    }

    /// Record a successful login.
    ///
    /// The tenant is stored under a fresh key, which the caller hands back
    /// to the client. Any previous session is removed. Inside a request
    /// scope the tenant also becomes current for the rest of the request.
    ///
    /// A tenant that does not match the bridge's format fails with
    /// [`RowGuardError::InvalidTenant`](rowguard_core::RowGuardError::InvalidTenant)
    /// and leaves the store untouched.
    pub async fn login(
        &self,
        previous: Option<&SessionKey>,
        tenant: TenantId,
    ) -> RowGuardResult<SessionKey> {
        self.format.validate(&tenant)?;

        if let Some(old) = previous {
            self.store.remove(old).await?;
        }

        let key = SessionKey::generate();
        self.store.put(&key, tenant.clone()).await?;
        info!(tenant = %tenant, "Tenant stored in session");

        if SessionContext::is_scoped() {
            SessionContext::set(tenant)?;
        }
        Ok(key)
    }

    /// Remove the session and clear the current scope.
    ///
    /// Returns the tenant the session held, if any.
    pub async fn logout(&self, key: Option<&SessionKey>) -> RowGuardResult<Option<TenantId>> {
        let removed = match key {
            Some(key) => self.store.remove(key).await?,
            None => None,
        };
        SessionContext::clear();
        info!(had_session = removed.is_some(), "Session removed");
        Ok(removed)
    }
}

async fn load(store: &dyn SessionStore, key: Option<&SessionKey>) {
    let Some(key) = key else {
        debug!("Request has no session");
        return;
    };

    match store.get(key).await {
        Ok(Some(tenant)) => {
            debug!(tenant = %tenant, "Loaded tenant from session");
            // Always inside the scope opened by `run`.
            if let Err(e) = SessionContext::set(tenant) {
                warn!(error = %e, "Could not bind session tenant");
            }
        }
        Ok(None) => debug!("Session holds no tenant"),
        Err(e) => warn!(error = %e, "Session store lookup failed, continuing unauthenticated"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use rowguard_core::RowGuardError;

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn get(&self, _key: &SessionKey) -> RowGuardResult<Option<TenantId>> {
            Err(RowGuardError::session_store("unavailable"))
        }

        async fn put(&self, _key: &SessionKey, _tenant: TenantId) -> RowGuardResult<()> {
            Err(RowGuardError::session_store("unavailable"))
        }

        async fn remove(&self, _key: &SessionKey) -> RowGuardResult<Option<TenantId>> {
            Err(RowGuardError::session_store("unavailable"))
        }
    }

    #[tokio::test]
    async fn test_run_loads_stored_tenant() {
        let store = MemorySessionStore::new();
        let key = SessionKey::generate();
        store.put(&key, TenantId::from(7_i64)).await.unwrap();
        let bridge = RequestSessionBridge::new(store);

        let seen = bridge.run(Some(key), async { SessionContext::get() }).await;
        assert_eq!(seen, Some(TenantId::from(7_i64)));
        assert!(SessionContext::get().is_none());
    }

    #[tokio::test]
    async fn test_run_without_session() {
        let bridge = RequestSessionBridge::new(MemorySessionStore::new());

        let seen = bridge.run(None, async { SessionContext::get() }).await;
        assert_eq!(seen, None);

        let unknown = SessionKey::generate();
        let seen = bridge.run(Some(unknown), async { SessionContext::get() }).await;
        assert_eq!(seen, None);
    }

    #[tokio::test]
    async fn test_store_failure_runs_unauthenticated() {
        let bridge = RequestSessionBridge::new(FailingStore);
        let key = SessionKey::generate();

        let seen = bridge.run(Some(key), async { SessionContext::require() }).await;
        assert!(matches!(seen, Err(RowGuardError::TenantRequired)));
    }

    #[tokio::test]
    async fn test_login_rotates_key() {
        let store = MemorySessionStore::new();
        let bridge = RequestSessionBridge::new(store.clone());

        let first = bridge
            .run(None, bridge.login(None, TenantId::from(1_i64)))
            .await
            .unwrap();
        let second = bridge
            .run(
                Some(first.clone()),
                bridge.login(Some(&first), TenantId::from(2_i64)),
            )
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first).await.unwrap(), None);
        assert_eq!(store.get(&second).await.unwrap(), Some(TenantId::from(2_i64)));
    }

    #[tokio::test]
    async fn test_login_checks_tenant_format() {
        let store = MemorySessionStore::new();
        let bridge = RequestSessionBridge::new(store.clone());
        let first = bridge.login(None, TenantId::from(1_i64)).await.unwrap();

        let err = bridge
            .login(Some(&first), TenantId::new("abc").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RowGuardError::InvalidTenant(_)));
        // The earlier session survives a rejected login.
        assert_eq!(store.get(&first).await.unwrap(), Some(TenantId::from(1_i64)));
        assert_eq!(store.len(), 1);

        let text = RequestSessionBridge::new(MemorySessionStore::new())
            .tenant_format(TenantIdFormat::Text);
        assert!(text.login(None, TenantId::new("abc").unwrap()).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_sets_current_tenant() {
        let bridge = RequestSessionBridge::new(MemorySessionStore::new());

        let seen = bridge
            .run(None, async {
                bridge.login(None, TenantId::from(9_i64)).await.unwrap();
                SessionContext::get()
            })
            .await;
        assert_eq!(seen, Some(TenantId::from(9_i64)));
    }

    #[tokio::test]
    async fn test_logout_clears_store_and_scope() {
        let store = MemorySessionStore::new();
        let key = SessionKey::generate();
        store.put(&key, TenantId::from(3_i64)).await.unwrap();
        let bridge = RequestSessionBridge::new(store.clone());

        let (removed, after) = bridge
            .run(Some(key.clone()), async {
                let removed = bridge.logout(Some(&key)).await.unwrap();
                (removed, SessionContext::get())
            })
            .await;

        assert_eq!(removed, Some(TenantId::from(3_i64)));
        assert_eq!(after, None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_logout_without_session() {
        let bridge = RequestSessionBridge::new(MemorySessionStore::new());
        assert_eq!(bridge.logout(None).await.unwrap(), None);
    }
}
