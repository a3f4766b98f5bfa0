//! HTTP handler trait and request-scoped connection metadata.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::{Body, Request, Response};

/// Terminal or intermediate request handler. Handlers are infallible; error
/// conditions surface as HTTP responses.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn serve(&self, req: Request<Body>) -> Response<Body>;
}

/// Shared handler reference used throughout routers and middlewares.
pub type SharedHandler = Arc<dyn HttpHandler>;

/// Adapter turning an async closure into an [`HttpHandler`].
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> HttpHandler for HandlerFn<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<Body>> + Send,
{
    async fn serve(&self, req: Request<Body>) -> Response<Body> {
        (self.0)(req).await
    }
}

/// Convenience constructor for closure handlers.
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<Body>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

/// Connection metadata the runtime attaches to every request before
/// dispatch. What the original kept on the request itself (remote address,
/// negotiated TLS) travels as an extension here.
#[derive(Debug, Clone, Copy)]
pub struct ConnInfo {
    pub peer: SocketAddr,
    pub tls: bool,
}

impl ConnInfo {
    /// Read back the metadata from a request; absent on requests that never
    /// went through the runtime (treated as cleartext from an unknown peer).
    pub fn of(req: &Request<Body>) -> Option<ConnInfo> {
        req.extensions().get::<ConnInfo>().copied()
    }
}

/// The host the client asked for: URI authority first (HTTP/2, absolute
/// form), then the Host header.
pub fn request_host(req: &Request<Body>) -> Option<&str> {
    req.uri()
        .authority()
        .map(|a| a.as_str())
        .or_else(|| {
            req.headers()
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
        })
}

/// Path and query of the request, `/` when absent.
pub fn request_uri(req: &Request<Body>) -> &str {
    req.uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
}
