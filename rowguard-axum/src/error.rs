//! Errors surfaced to HTTP clients.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rowguard_core::RowGuardError;
use thiserror::Error;

/// Result type for the HTTP integration.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the session bridge, its extractors and handlers.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The request carries no authenticated tenant.
    #[error("authentication required")]
    TenantRequired,

    /// Login without a tenant or a username, or with a tenant that does not
    /// match the configured format.
    #[error("invalid credentials")]
    InvalidLogin,

    /// A handler needing the session ran outside [`SessionBridgeLayer`](crate::SessionBridgeLayer).
    #[error("session layer is not installed")]
    MissingLayer,

    /// The persisted session store failed.
    #[error("session store error: {0}")]
    Store(String),

    /// Any other guard error.
    #[error(transparent)]
    Guard(RowGuardError),
}

impl BridgeError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::TenantRequired | Self::InvalidLogin => StatusCode::UNAUTHORIZED,
            Self::MissingLayer | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Guard(RowGuardError::InvalidTenant(_)) => StatusCode::BAD_REQUEST,
            Self::Guard(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Guard(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RowGuardError> for BridgeError {
    fn from(err: RowGuardError) -> Self {
        match err {
            RowGuardError::TenantRequired => Self::TenantRequired,
            RowGuardError::SessionStore(msg) => Self::Store(msg),
            other => Self::Guard(other),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs.
        let body = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            status
                .canonical_reason()
                .unwrap_or("internal server error")
                .to_string()
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}
