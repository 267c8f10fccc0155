//! Tower middleware that runs each request inside a session scope.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{HeaderMap, Request, header};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::trace;

use crate::bridge::RequestSessionBridge;
use crate::store::SessionKey;

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "RLS_SESSION";

/// Per-request session handle, stored in the request extensions.
///
/// Handlers normally reach it through the [`Session`](crate::Session)
/// extractor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub(crate) bridge: RequestSessionBridge,
    pub(crate) key: Option<SessionKey>,
    pub(crate) cookie_name: Arc<str>,
}

/// Layer that installs the [`RequestSessionBridge`] around every request.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/orders", get(list_orders))
///     .merge(login_routes())
///     .layer(SessionBridgeLayer::new(RequestSessionBridge::new(MemorySessionStore::new())))
///     .with_state(pool);
/// ```
#[derive(Debug, Clone)]
pub struct SessionBridgeLayer {
    bridge: RequestSessionBridge,
    cookie_name: Arc<str>,
}

impl SessionBridgeLayer {
    /// Create a layer using the default cookie name.
    pub fn new(bridge: RequestSessionBridge) -> Self {
        Self {
            bridge,
            cookie_name: Arc::from(DEFAULT_COOKIE_NAME),
        }
    }

    /// Use a different session cookie.
    pub fn cookie_name(mut self, name: impl AsRef<str>) -> Self {
        self.cookie_name = Arc::from(name.as_ref());
        self
    }
}

impl<S> Layer<S> for SessionBridgeLayer {
    type Service = SessionBridgeService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionBridgeService {
            inner,
            bridge: self.bridge.clone(),
            cookie_name: Arc::clone(&self.cookie_name),
        }
    }
}

/// Service produced by [`SessionBridgeLayer`].
#[derive(Debug, Clone)]
pub struct SessionBridgeService<S> {
    inner: S,
    bridge: RequestSessionBridge,
    cookie_name: Arc<str>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for SessionBridgeService<S>
where
    S: Service<Request<ReqBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let key = session_key(request.headers(), &self.cookie_name);
        trace!(has_session = key.is_some(), "Session bridge handling request");

        request.extensions_mut().insert(SessionHandle {
            bridge: self.bridge.clone(),
            key: key.clone(),
            cookie_name: Arc::clone(&self.cookie_name),
        });

        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let bridge = self.bridge.clone();

        Box::pin(async move {
            bridge
                .run(key, async move { inner.call(request).await })
                .await
        })
    }
}

/// Find the session key in the request's `Cookie` headers.
pub(crate) fn session_key(headers: &HeaderMap, cookie_name: &str) -> Option<SessionKey> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .and_then(|(_, value)| SessionKey::parse(value.trim_matches('"')))
}
