//! Built-in middlewares.

use hyper::header::{HeaderValue, LOCATION};
use hyper::http::uri::{PathAndQuery, Uri};
use hyper::{Body, Request, Response, StatusCode};

use super::handler::{handler_fn, request_host, request_uri, ConnInfo, SharedHandler};
use super::middleware::Middleware;

pub(crate) const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub(crate) const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub(crate) const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub(crate) const FORWARDED: &str = "forwarded";

/// Logs `"{prefix}{proto} {method} {path}"`, then calls the next handler.
pub struct Logging {
    prefix: String,
}

impl Logging {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Middleware for Logging {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        let prefix = self.prefix.clone();
        handler_fn(move |req| {
            let next = next.clone();
            let prefix = prefix.clone();
            async move {
                tracing::info!(
                    "{}{:?} {} {}",
                    prefix,
                    req.version(),
                    req.method(),
                    req.uri().path()
                );
                next.serve(req).await
            }
        })
    }
}

/// Rewrites the path by removing a leading prefix before the next handler
/// sees the request; requests that do not carry the prefix pass through
/// untouched. A fully stripped path becomes `/`, so a second application
/// with the same prefix leaves the request unchanged.
pub struct StripPrefix {
    prefix: String,
}

impl StripPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Middleware for StripPrefix {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        let prefix = self.prefix.clone();
        handler_fn(move |mut req: Request<Body>| {
            let next = next.clone();
            let prefix = prefix.clone();
            async move {
                if let Some(rest) = req.uri().path().strip_prefix(prefix.as_str()) {
                    let new_path = match rest {
                        "" => "/".to_string(),
                        r if r.starts_with('/') => r.to_string(),
                        r => format!("/{r}"),
                    };
                    let pq = match req.uri().query() {
                        Some(q) => format!("{new_path}?{q}"),
                        None => new_path,
                    };
                    if let Ok(pq) = pq.parse::<PathAndQuery>() {
                        let mut parts = req.uri().clone().into_parts();
                        parts.path_and_query = Some(pq);
                        if let Ok(uri) = Uri::from_parts(parts) {
                            *req.uri_mut() = uri;
                        }
                    }
                }
                next.serve(req).await
            }
        })
    }
}

/// Redirects cleartext requests to their HTTPS equivalent (301); TLS
/// requests pass through.
pub struct RequireSecure;

impl Middleware for RequireSecure {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        handler_fn(move |req: Request<Body>| {
            let next = next.clone();
            async move {
                let tls = ConnInfo::of(&req).map(|c| c.tls).unwrap_or(false);
                if !tls {
                    let host = request_host(&req).unwrap_or_default().to_string();
                    let target = format!("https://{}{}", host, request_uri(&req));
                    return redirect_response(&target);
                }
                next.serve(req).await
            }
        })
    }
}

/// Stamps the standard forwarding headers before the request leaves for an
/// upstream: `X-Forwarded-For` (appending to an existing chain),
/// `X-Forwarded-Proto`, `X-Forwarded-Host` and the RFC 7239 `Forwarded`
/// header. The client IP is the peer address without its port.
pub struct SetForwardingHeaders;

impl Middleware for SetForwardingHeaders {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        handler_fn(move |mut req: Request<Body>| {
            let next = next.clone();
            async move {
                let info = ConnInfo::of(&req);
                let client_ip = info.map(|c| c.peer.ip().to_string()).unwrap_or_default();
                let proto = if info.map(|c| c.tls).unwrap_or(false) {
                    "https"
                } else {
                    "http"
                };
                let host = request_host(&req).unwrap_or_default().to_string();

                let xff = match req
                    .headers()
                    .get(X_FORWARDED_FOR)
                    .and_then(|v| v.to_str().ok())
                {
                    Some(existing) if !existing.is_empty() => {
                        format!("{existing}, {client_ip}")
                    }
                    _ => client_ip.clone(),
                };

                let headers = req.headers_mut();
                if let Ok(v) = HeaderValue::from_str(&xff) {
                    headers.insert(X_FORWARDED_FOR, v);
                }
                headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
                if let Ok(v) = HeaderValue::from_str(&host) {
                    headers.insert(X_FORWARDED_HOST, v);
                }
                let forwarded = format!("for={client_ip}; proto={proto}; host={host}");
                if let Ok(v) = HeaderValue::from_str(&forwarded) {
                    headers.insert(FORWARDED, v);
                }

                next.serve(req).await
            }
        })
    }
}

pub(crate) fn redirect_response(location: &str) -> Response<Body> {
    let mut builder = Response::builder().status(StatusCode::MOVED_PERMANENTLY);
    if let Ok(v) = HeaderValue::from_str(location) {
        builder = builder.header(LOCATION, v);
    }
    builder.body(Body::empty()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain;
    use crate::http::handler::HttpHandler;
    use std::sync::{Arc, Mutex};

    fn capture_handler() -> (SharedHandler, Arc<Mutex<Option<Request<Body>>>>) {
        let seen: Arc<Mutex<Option<Request<Body>>>> = Arc::new(Mutex::new(None));
        let captured = seen.clone();
        let handler = handler_fn(move |req| {
            let captured = captured.clone();
            async move {
                *captured.lock().unwrap() = Some(req);
                Response::new(Body::empty())
            }
        });
        (handler, seen)
    }

    fn with_conn_info(mut req: Request<Body>, tls: bool) -> Request<Body> {
        req.extensions_mut().insert(ConnInfo {
            peer: "10.1.2.3:41000".parse().unwrap(),
            tls,
        });
        req
    }

    #[tokio::test]
    async fn strip_prefix_rewrites_path_and_keeps_query() {
        let (handler, seen) = capture_handler();
        let stripped = StripPrefix::new("/files").wrap(handler);

        let req = Request::builder()
            .uri("/files/a.txt?x=1")
            .body(Body::empty())
            .unwrap();
        stripped.serve(req).await;
        let got = seen.lock().unwrap().take().unwrap();
        assert_eq!(got.uri().path(), "/a.txt");
        assert_eq!(got.uri().query(), Some("x=1"));
    }

    #[tokio::test]
    async fn strip_prefix_applied_twice_leaves_stripped_path_alone() {
        let (handler, seen) = capture_handler();
        let twice =
            StripPrefix::new("/files").wrap(StripPrefix::new("/files").wrap(handler));
        let req = Request::builder()
            .uri("/files/a.txt")
            .body(Body::empty())
            .unwrap();
        twice.serve(req).await;
        assert_eq!(seen.lock().unwrap().take().unwrap().uri().path(), "/a.txt");
    }

    #[tokio::test]
    async fn strip_prefix_of_bare_prefix_is_root() {
        let (handler, seen) = capture_handler();
        let stripped = StripPrefix::new("/files").wrap(handler);
        let req = Request::builder()
            .uri("/files")
            .body(Body::empty())
            .unwrap();
        stripped.serve(req).await;
        assert_eq!(seen.lock().unwrap().take().unwrap().uri().path(), "/");
    }

    #[tokio::test]
    async fn strip_prefix_passes_through_non_matching_paths() {
        let (handler, seen) = capture_handler();
        let stripped = StripPrefix::new("/files").wrap(handler);
        let req = Request::builder()
            .uri("/other/a.txt")
            .body(Body::empty())
            .unwrap();
        stripped.serve(req).await;
        assert_eq!(
            seen.lock().unwrap().take().unwrap().uri().path(),
            "/other/a.txt"
        );
    }

    #[tokio::test]
    async fn require_secure_redirects_cleartext() {
        let (handler, _) = capture_handler();
        let secured = RequireSecure.wrap(handler);
        let req = Request::builder()
            .uri("/abc/ping")
            .header(hyper::header::HOST, "h.test")
            .body(Body::empty())
            .unwrap();
        let resp = secured.serve(with_conn_info(req, false)).await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            resp.headers().get(LOCATION).unwrap(),
            "https://h.test/abc/ping"
        );
    }

    #[tokio::test]
    async fn require_secure_passes_tls_through() {
        let (handler, seen) = capture_handler();
        let secured = RequireSecure.wrap(handler);
        let req = Request::builder().uri("/x").body(Body::empty()).unwrap();
        let resp = secured.serve(with_conn_info(req, true)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(seen.lock().unwrap().take().is_some());
    }

    #[tokio::test]
    async fn forwarding_headers_are_stamped() {
        let (handler, seen) = capture_handler();
        let wrapped = SetForwardingHeaders.wrap(handler);
        let req = Request::builder()
            .uri("/abc/ping")
            .header(hyper::header::HOST, "h.test")
            .body(Body::empty())
            .unwrap();
        wrapped.serve(with_conn_info(req, true)).await;

        let got = seen.lock().unwrap().take().unwrap();
        assert_eq!(got.headers().get(X_FORWARDED_FOR).unwrap(), "10.1.2.3");
        assert_eq!(got.headers().get(X_FORWARDED_PROTO).unwrap(), "https");
        assert_eq!(got.headers().get(X_FORWARDED_HOST).unwrap(), "h.test");
        assert_eq!(
            got.headers().get(FORWARDED).unwrap(),
            "for=10.1.2.3; proto=https; host=h.test"
        );
    }

    #[tokio::test]
    async fn forwarding_headers_append_to_existing_chain() {
        let (handler, seen) = capture_handler();
        let wrapped = SetForwardingHeaders.wrap(handler);
        let req = Request::builder()
            .uri("/")
            .header(X_FORWARDED_FOR, "192.0.2.1")
            .body(Body::empty())
            .unwrap();
        wrapped.serve(with_conn_info(req, false)).await;

        let got = seen.lock().unwrap().take().unwrap();
        assert_eq!(
            got.headers().get(X_FORWARDED_FOR).unwrap(),
            "192.0.2.1, 10.1.2.3"
        );
        assert_eq!(got.headers().get(X_FORWARDED_PROTO).unwrap(), "http");
    }

    #[tokio::test]
    async fn chain_of_secure_and_forwarding_redirects_first() {
        let (handler, seen) = capture_handler();
        let composed = chain![RequireSecure, SetForwardingHeaders].wrap(handler);
        let req = Request::builder()
            .uri("/abc/ping")
            .header(hyper::header::HOST, "h.test")
            .body(Body::empty())
            .unwrap();
        let resp = composed.serve(with_conn_info(req, false)).await;
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert!(seen.lock().unwrap().take().is_none());
    }
}
