//! Login and logout endpoints.

use axum::Json;
use axum::Router;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use rowguard_core::{RowGuardError, TenantId};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::BridgeError;
use crate::extract::Session;

/// Body of `POST /rls/login`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    /// Tenant to authenticate as. Accepts a JSON number or string.
    pub tenant_id: Option<TenantId>,
    /// Display name of the user. Only checked for presence.
    pub username: Option<String>,
}

/// Body returned by the login and logout endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Human-readable outcome.
    pub message: String,
}

impl LoginResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
        }
    }
}

fn rejected(reason: &str) -> Response {
    warn!(reason, "Login rejected");
    let err = BridgeError::InvalidLogin;
    (err.status(), Json(LoginResponse::failed("Invalid credentials"))).into_response()
}

/// Routes for `POST /rls/login` and `POST /rls/logout`.
pub fn login_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/rls/login", post(login))
        .route("/rls/logout", post(logout))
}

/// Authenticate as a tenant.
///
/// There is no password check: any non-blank username is accepted. The
/// tenant must match the session bridge's format.
pub async fn login(session: Session, Json(request): Json<LoginRequest>) -> Response {
    let username = request
        .username
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    let (Some(tenant), Some(username)) = (request.tenant_id, username) else {
        return rejected("missing tenant or username");
    };

    match session.login(tenant.clone()).await {
        Ok(key) => {
            info!(tenant = %tenant, username = %username, "Login successful");
            (
                StatusCode::OK,
                [(header::SET_COOKIE, session.cookie(&key))],
                Json(LoginResponse::ok("Login successful")),
            )
                .into_response()
        }
        Err(RowGuardError::InvalidTenant(_)) => rejected("tenant has the wrong format"),
        Err(e) => {
            error!(tenant = %tenant, error = %e, "Login failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LoginResponse::failed("Internal server error")),
            )
                .into_response()
        }
    }
}

/// End the session.
pub async fn logout(session: Session) -> Response {
    match session.logout().await {
        Ok(tenant) => {
            info!(had_tenant = tenant.is_some(), "Logout successful");
            (
                StatusCode::OK,
                [(header::SET_COOKIE, session.expired_cookie())],
                Json(LoginResponse::ok("Logout successful")),
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Logout failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LoginResponse::failed("Internal server error")),
            )
                .into_response()
        }
    }
}
