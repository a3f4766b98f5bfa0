//! Middleware composition.

use std::sync::Arc;

use super::handler::SharedHandler;

/// A function from handler to handler.
pub trait Middleware: Send + Sync {
    fn wrap(&self, next: SharedHandler) -> SharedHandler;
}

/// Right-to-left composition of middlewares:
/// `Chain([a, b, c]).wrap(h) == a.wrap(b.wrap(c.wrap(h)))`, so the leftmost
/// middleware runs outermost.
#[derive(Clone, Default)]
pub struct Chain {
    mws: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(mws: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        Self {
            mws: mws.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mws.is_empty()
    }
}

impl Middleware for Chain {
    fn wrap(&self, next: SharedHandler) -> SharedHandler {
        self.mws.iter().rev().fold(next, |h, mw| mw.wrap(h))
    }
}

/// Build a chain from middleware values.
#[macro_export]
macro_rules! chain {
    ($($mw:expr),* $(,)?) => {
        $crate::http::Chain::new([
            $(::std::sync::Arc::new($mw) as ::std::sync::Arc<dyn $crate::http::Middleware>),*
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::{handler_fn, HttpHandler};
    use hyper::{header::HeaderValue, Body, Request, Response};

    /// Appends its tag to a response header, so composition order is
    /// observable: outermost middleware appends last on the way out.
    struct Tag(&'static str);

    impl Middleware for Tag {
        fn wrap(&self, next: SharedHandler) -> SharedHandler {
            let tag = self.0;
            handler_fn(move |req| {
                let next = next.clone();
                async move {
                    let mut resp = next.serve(req).await;
                    let prior = resp
                        .headers()
                        .get("x-trace")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let merged = if prior.is_empty() {
                        tag.to_string()
                    } else {
                        format!("{prior},{tag}")
                    };
                    resp.headers_mut()
                        .insert("x-trace", HeaderValue::from_str(&merged).unwrap());
                    resp
                }
            })
        }
    }

    fn terminal() -> SharedHandler {
        handler_fn(|_req| async { Response::new(Body::empty()) })
    }

    async fn trace_of(chain: Chain) -> String {
        let handler = chain.wrap(terminal());
        let resp = handler
            .serve(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await;
        resp.headers()
            .get("x-trace")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    }

    #[tokio::test]
    async fn leftmost_runs_outermost() {
        let trace = trace_of(chain![Tag("a"), Tag("b"), Tag("c")]).await;
        // Innermost (c) appends first on the way out.
        assert_eq!(trace, "c,b,a");
    }

    #[tokio::test]
    async fn chain_is_associative() {
        let flat = trace_of(chain![Tag("a"), Tag("b"), Tag("c")]).await;

        let right = trace_of(Chain::new([
            Arc::new(Tag("a")) as Arc<dyn Middleware>,
            Arc::new(chain![Tag("b"), Tag("c")]) as Arc<dyn Middleware>,
        ]))
        .await;

        let left = trace_of(Chain::new([
            Arc::new(chain![Tag("a"), Tag("b")]) as Arc<dyn Middleware>,
            Arc::new(Tag("c")) as Arc<dyn Middleware>,
        ]))
        .await;

        assert_eq!(flat, right);
        assert_eq!(flat, left);
    }

    #[tokio::test]
    async fn empty_chain_is_identity() {
        assert_eq!(trace_of(Chain::default()).await, "");
    }
}
