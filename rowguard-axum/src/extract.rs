//! Request extractors.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use rowguard_core::{RowGuardResult, SessionContext, TenantId};

use crate::error::BridgeError;
use crate::layer::SessionHandle;
use crate::store::SessionKey;

/// The authenticated tenant of the current request.
///
/// Rejects with `401 Unauthorized` when the request has none.
///
/// ```rust,ignore
/// async fn whoami(CurrentTenant(tenant): CurrentTenant) -> String {
///     tenant.to_string()
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentTenant(pub TenantId);

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = BridgeError;

    async fn from_request_parts(_parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        SessionContext::require()
            .map(CurrentTenant)
            .map_err(BridgeError::from)
    }
}

/// Access to the request's persisted session, for login and logout.
///
/// Requires [`SessionBridgeLayer`](crate::SessionBridgeLayer).
#[derive(Debug, Clone)]
pub struct Session {
    handle: SessionHandle,
}

impl Session {
    /// The session key the request arrived with.
    pub fn key(&self) -> Option<&SessionKey> {
        self.handle.key.as_ref()
    }

    /// Name of the session cookie.
    pub fn cookie_name(&self) -> &str {
        &self.handle.cookie_name
    }

    /// Store `tenant` under a fresh session key and make it current.
    pub async fn login(&self, tenant: TenantId) -> RowGuardResult<SessionKey> {
        self.handle.bridge.login(self.key(), tenant).await
    }

    /// Drop the session and clear the current tenant.
    pub async fn logout(&self) -> RowGuardResult<Option<TenantId>> {
        self.handle.bridge.logout(self.key()).await
    }

    /// `Set-Cookie` value carrying `key`.
    pub fn cookie(&self, key: &SessionKey) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            self.cookie_name(),
            key
        )
    }

    /// `Set-Cookie` value that expires the session cookie.
    pub fn expired_cookie(&self) -> String {
        format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0",
            self.cookie_name()
        )
    }
}

impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = BridgeError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .map(|handle| Session { handle })
            .ok_or(BridgeError::MissingLayer)
    }
}
