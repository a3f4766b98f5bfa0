//! TCP routes, routers and the handler compiler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::context::TcpContext;
use super::runtime::TcpHandler;
use super::services::SharedTcpService;
use crate::conn::{SharedConn, TcpConn};
use crate::rule::Rule;

/// A rule and the id of the terminal service.
#[derive(Clone)]
pub struct TcpRoute {
    pub rule: Rule,
    pub service_id: String,
}

impl TcpRoute {
    pub fn new(rule: Rule, service_id: impl Into<String>) -> Self {
        Self {
            rule,
            service_id: service_id.into(),
        }
    }
}

/// A named, insertion-ordered collection of TCP routes. First matching
/// route wins.
#[derive(Clone, Default)]
pub struct TcpRouter {
    routes: Vec<(String, TcpRoute)>,
}

impl TcpRouter {
    pub fn register_route(&mut self, id: impl Into<String>, route: TcpRoute) -> &mut Self {
        let id = id.into();
        self.routes.retain(|(existing, _)| *existing != id);
        self.routes.push((id, route));
        self
    }

    pub fn deregister_route(&mut self, id: &str) {
        self.routes.retain(|(existing, _)| existing != id);
    }

    pub fn routes(&self) -> impl Iterator<Item = &TcpRoute> {
        self.routes.iter().map(|(_, route)| route)
    }

    /// First route whose rule matches, in registration order.
    pub async fn match_route(&self, ctx: &TcpContext) -> Option<(&str, &TcpRoute)> {
        for (id, route) in &self.routes {
            if route.rule.matches_tcp(ctx).await {
                return Some((id.as_str(), route));
            }
        }
        None
    }
}

/// Owns TCP routers and services by id and compiles them into a single
/// claimable handler.
#[derive(Default)]
pub struct TcpHandlerCompiler {
    routers: HashMap<String, TcpRouter>,
    services: HashMap<String, SharedTcpService>,
}

impl TcpHandlerCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_service(
        &mut self,
        id: impl Into<String>,
        service: SharedTcpService,
    ) -> &mut Self {
        self.services.insert(id.into(), service);
        self
    }

    pub fn deregister_service(&mut self, id: &str) {
        self.services.remove(id);
    }

    pub fn register_router(&mut self, id: impl Into<String>) -> &mut TcpRouter {
        self.routers.entry(id.into()).or_default()
    }

    pub fn deregister_router(&mut self, id: &str) {
        self.routers.remove(id);
    }

    pub fn router(&mut self, id: &str) -> Option<&mut TcpRouter> {
        self.routers.get_mut(id)
    }

    /// Compile the given routers into one handler. The handler's claim rule
    /// is the disjunction of every route rule it contains; dispatch
    /// re-iterates the routers in order to find the winning route.
    pub fn compile<I, S>(&self, router_ids: I) -> Arc<dyn TcpHandler>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let routers: Vec<(String, TcpRouter)> = router_ids
            .into_iter()
            .filter_map(|id| {
                let id = id.as_ref();
                self.routers
                    .get(id)
                    .map(|router| (id.to_string(), router.clone()))
            })
            .collect();

        let rules: Vec<Rule> = routers
            .iter()
            .flat_map(|(_, router)| router.routes().map(|route| route.rule.clone()))
            .collect();

        Arc::new(CompiledTcpHandler {
            rule: Rule::Either(rules),
            routers,
            services: self.services.clone(),
        })
    }
}

struct CompiledTcpHandler {
    rule: Rule,
    routers: Vec<(String, TcpRouter)>,
    services: HashMap<String, SharedTcpService>,
}

#[async_trait]
impl TcpHandler for CompiledTcpHandler {
    fn rule(&self) -> &Rule {
        &self.rule
    }

    async fn serve(&self, conn: TcpConn) {
        let peer = conn.peer_addr();

        // Re-seat the connection so route rules can peek it again.
        let seat = SharedConn::new(conn.into_stream());
        let ctx = match TcpContext::capture(&seat).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::debug!(peer = %peer, error = %e, "TCP dispatch context failed");
                return;
            }
        };

        for (router_id, router) in &self.routers {
            let Some((route_id, route)) = router.match_route(&ctx).await else {
                continue;
            };
            tracing::info!(
                peer = %peer,
                router = %router_id,
                route = %route_id,
                "TCP router routing connection"
            );

            let Some(service) = self.services.get(&route.service_id).cloned() else {
                tracing::warn!(
                    peer = %peer,
                    route = %route_id,
                    service = %route.service_id,
                    "matched TCP route names an unknown service"
                );
                return;
            };

            let Some(stream) = seat.take().await else {
                return;
            };
            let conn = match TcpConn::new(stream) {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::debug!(peer = %peer, error = %e, "failed to promote TCP connection");
                    return;
                }
            };

            tracing::info!(
                peer = %peer,
                route = %route_id,
                service = %route.service_id,
                "serving TCP service"
            );
            service.serve(conn).await;
            return;
        }

        tracing::debug!(peer = %peer, "no TCP route matched, closing");
    }
}
