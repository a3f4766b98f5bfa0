//! HTTP routes, routers and the handler compiler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hyper::{Body, Request, Response, StatusCode};

use super::handler::{HttpHandler, SharedHandler};
use super::middleware::{Chain, Middleware};
use super::services::status_response;
use crate::rule::Rule;

/// A rule, an optional middleware chain, and the id of the terminal service.
#[derive(Clone)]
pub struct HttpRoute {
    pub rule: Rule,
    pub middleware: Option<Chain>,
    pub service_id: String,
}

impl HttpRoute {
    pub fn new(rule: Rule, service_id: impl Into<String>) -> Self {
        Self {
            rule,
            middleware: None,
            service_id: service_id.into(),
        }
    }

    pub fn with_middleware(mut self, middleware: Chain) -> Self {
        self.middleware = Some(middleware);
        self
    }
}

/// A named, insertion-ordered collection of routes plus one optional
/// router-level middleware. First matching route wins.
#[derive(Clone, Default)]
pub struct HttpRouter {
    routes: Vec<(String, HttpRoute)>,
    middleware: Option<Chain>,
}

impl HttpRouter {
    pub fn register_route(&mut self, id: impl Into<String>, route: HttpRoute) -> &mut Self {
        let id = id.into();
        self.routes.retain(|(existing, _)| *existing != id);
        self.routes.push((id, route));
        self
    }

    pub fn deregister_route(&mut self, id: &str) {
        self.routes.retain(|(existing, _)| existing != id);
    }

    pub fn set_middleware(&mut self, middleware: Chain) -> &mut Self {
        self.middleware = Some(middleware);
        self
    }

    pub fn middleware(&self) -> Option<&Chain> {
        self.middleware.as_ref()
    }

    /// First route whose rule matches, in registration order.
    pub fn match_route(&self, req: &Request<Body>) -> Option<(&str, &HttpRoute)> {
        self.routes
            .iter()
            .find(|(_, route)| route.rule.matches_http(req))
            .map(|(id, route)| (id.as_str(), route))
    }
}

/// Owns routers and services by id and compiles them into dispatchable
/// handlers.
#[derive(Default)]
pub struct HttpHandlerCompiler {
    routers: HashMap<String, HttpRouter>,
    services: HashMap<String, SharedHandler>,
}

impl HttpHandlerCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(
        &mut self,
        id: impl Into<String>,
        service: SharedHandler,
    ) -> &mut Self {
        self.services.insert(id.into(), service);
        self
    }

    pub fn deregister_service(&mut self, id: &str) {
        self.services.remove(id);
    }

    pub fn register_router(&mut self, id: impl Into<String>) -> &mut HttpRouter {
        self.routers.entry(id.into()).or_default()
    }

    pub fn deregister_router(&mut self, id: &str) {
        self.routers.remove(id);
    }

    pub fn router(&mut self, id: &str) -> Option<&mut HttpRouter> {
        self.routers.get_mut(id)
    }

    /// Compile a handler that tries the given routers in order, first match
    /// across all. A miss is a 404; a matched route whose service id does
    /// not resolve is a 502.
    pub fn compile<I, S>(&self, router_ids: I) -> SharedHandler
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let routers: Vec<(String, HttpRouter)> = router_ids
            .into_iter()
            .filter_map(|id| {
                let id = id.as_ref();
                self.routers
                    .get(id)
                    .map(|router| (id.to_string(), router.clone()))
            })
            .collect();

        Arc::new(CompiledHttpHandler {
            routers,
            services: self.services.clone(),
        })
    }
}

struct CompiledHttpHandler {
    routers: Vec<(String, HttpRouter)>,
    services: HashMap<String, SharedHandler>,
}

#[async_trait]
impl HttpHandler for CompiledHttpHandler {
    async fn serve(&self, req: Request<Body>) -> Response<Body> {
        for (router_id, router) in &self.routers {
            let Some((route_id, route)) = router.match_route(&req) else {
                continue;
            };
            tracing::debug!(
                router = %router_id,
                route = %route_id,
                service = %route.service_id,
                "HTTP router matched route"
            );

            let Some(service) = self.services.get(&route.service_id).cloned() else {
                tracing::warn!(
                    route = %route_id,
                    service = %route.service_id,
                    "matched route names an unknown service"
                );
                return status_response(StatusCode::BAD_GATEWAY);
            };

            // Router middleware wraps route middleware wraps the service.
            let handler = match (router.middleware(), &route.middleware) {
                (Some(router_mw), Some(route_mw)) => router_mw.wrap(route_mw.wrap(service)),
                (Some(router_mw), None) => router_mw.wrap(service),
                (None, Some(route_mw)) => route_mw.wrap(service),
                (None, None) => service,
            };
            return handler.serve(req).await;
        }

        status_response(StatusCode::NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use crate::rule;

    fn fixed(body: &'static str) -> SharedHandler {
        handler_fn(move |_req| async move { Response::new(Body::from(body)) })
    }

    async fn body_of(resp: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn first_matching_route_wins_in_registration_order() {
        let mut compiler = HttpHandlerCompiler::new();
        compiler
            .register_service("broad", fixed("broad"))
            .register_service("narrow", fixed("narrow"));
        compiler
            .register_router("web")
            .register_route(
                "catch-all",
                HttpRoute::new(rule::path_prefix("/"), "broad"),
            )
            .register_route(
                "api",
                HttpRoute::new(rule::path_prefix("/api"), "narrow"),
            );

        let handler = compiler.compile(["web"]);
        // Both rules match /api; the earlier registration wins.
        assert_eq!(body_of(handler.serve(get("/api/x")).await).await, "broad");
    }

    #[tokio::test]
    async fn miss_is_404_and_unknown_service_is_502() {
        let mut compiler = HttpHandlerCompiler::new();
        compiler
            .register_router("web")
            .register_route("api", HttpRoute::new(rule::path_prefix("/api"), "ghost"));

        let handler = compiler.compile(["web"]);
        assert_eq!(
            handler.serve(get("/other")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            handler.serve(get("/api/x")).await.status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn compile_tries_routers_in_given_order() {
        let mut compiler = HttpHandlerCompiler::new();
        compiler
            .register_service("one", fixed("one"))
            .register_service("two", fixed("two"));
        compiler
            .register_router("first")
            .register_route("r", HttpRoute::new(rule::path_prefix("/x"), "one"));
        compiler
            .register_router("second")
            .register_route("r", HttpRoute::new(rule::any(), "two"));

        let handler = compiler.compile(["first", "second"]);
        assert_eq!(body_of(handler.serve(get("/x")).await).await, "one");
        assert_eq!(body_of(handler.serve(get("/y")).await).await, "two");

        // Unknown router ids are skipped.
        let handler = compiler.compile(["missing", "second"]);
        assert_eq!(body_of(handler.serve(get("/x")).await).await, "two");
    }

    #[tokio::test]
    async fn route_registration_is_idempotent_per_id() {
        let mut compiler = HttpHandlerCompiler::new();
        compiler
            .register_service("a", fixed("a"))
            .register_service("b", fixed("b"));
        compiler
            .register_router("web")
            .register_route("r", HttpRoute::new(rule::any(), "a"))
            .register_route("r", HttpRoute::new(rule::any(), "b"));

        let handler = compiler.compile(["web"]);
        assert_eq!(body_of(handler.serve(get("/")).await).await, "b");
    }
}
