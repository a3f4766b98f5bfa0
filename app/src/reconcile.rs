//! Config reconciliation: turn configuration deltas into server
//! register/deregister calls.
//!
//! Reconciliation is best-effort: entrypoint changes rebind listeners,
//! handler tables are rebuilt and swapped whole, and in-flight connections
//! finish on whatever tables they started with.

use std::collections::BTreeMap;
use std::sync::Arc;

use mg_config::{diff, parse_listen_addr, parse_rule, rule_expr, Config, RouteConfig};
use mg_core::http::{
    http_load_balancer, http_reverse_proxy, HttpHandlerCompiler, HttpRoute,
};
use mg_core::{EntryPoint, Server};
use mg_tls::SingleCertResolver;

pub struct Reconciler {
    server: Arc<Server>,
    config: Config,
}

impl Reconciler {
    pub fn new(server: Arc<Server>) -> Self {
        Self {
            server,
            config: Config::default(),
        }
    }

    /// Apply a new configuration: deleted ids deregister, new-or-changed
    /// ids register.
    pub async fn apply(&mut self, new: Config) {
        let (updated, deleted) = diff::changed_items(&self.config.entrypoints, &new.entrypoints);

        for (id, _) in deleted {
            tracing::info!(entrypoint = %id, "removing entrypoint");
            self.server.deregister_entry_point(id).await;
        }

        for (id, address) in updated {
            let addr = match parse_listen_addr(&address) {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!(entrypoint = %id, error = %e, "skipping entrypoint");
                    continue;
                }
            };
            // A changed address needs the old listener gone first;
            // registering an already-bound id is a no-op.
            if self.config.entrypoints.contains_key(&id) {
                self.server.deregister_entry_point(id.clone()).await;
            }
            tracing::info!(entrypoint = %id, addr = %addr, "registering entrypoint");
            self.server
                .register_entry_point(EntryPoint::tcp(id, addr))
                .await;
        }

        if self.config.http != new.http {
            self.apply_http(&new);
        }

        self.config = new;
    }

    /// Rebuild the HTTP side wholesale and swap the per-entrypoint handlers.
    fn apply_http(&self, new: &Config) {
        let mut compiler = HttpHandlerCompiler::new();

        for (id, service) in &new.http.services {
            let handler = if let Some(url) = &service.reverse_proxy {
                http_reverse_proxy(url)
            } else if let Some(lb) = &service.load_balancer {
                if let Some(method) = lb.method.as_deref() {
                    if method != "random" {
                        tracing::warn!(service = %id, method, "unknown load-balancer method, using random");
                    }
                }
                http_load_balancer(
                    lb.services
                        .iter()
                        .map(|t| http_reverse_proxy(&t.reverse_proxy))
                        .collect(),
                )
            } else {
                tracing::warn!(service = %id, "service defines no backend, skipping");
                continue;
            };
            compiler.register_service(id.clone(), handler);
        }

        let mut by_entrypoint: BTreeMap<&str, Vec<(&String, &RouteConfig)>> = BTreeMap::new();
        for (route_id, route) in &new.http.routes {
            for entrypoint in &route.entrypoints {
                by_entrypoint
                    .entry(entrypoint.as_str())
                    .or_default()
                    .push((route_id, route));
            }
        }

        for (entrypoint, routes) in &by_entrypoint {
            let router = compiler.register_router(*entrypoint);
            for (route_id, route_config) in routes {
                let rule = match parse_rule(&route_config.rule) {
                    Ok(rule) => rule,
                    Err(e) => {
                        tracing::warn!(route = %route_id, error = %e, "bad rule, skipping route");
                        continue;
                    }
                };
                let mut route = HttpRoute::new(rule, route_config.service.clone());
                if !route_config.middlewares.is_empty() {
                    match rule_expr::parse_middlewares(&route_config.middlewares) {
                        Ok(chain) => route = route.with_middleware(chain),
                        Err(e) => {
                            tracing::warn!(route = %route_id, error = %e, "bad middleware, skipping route");
                            continue;
                        }
                    }
                }
                router.register_route((*route_id).clone(), route);
            }
        }

        for entrypoint in by_entrypoint.keys() {
            self.server
                .register_http_handler(*entrypoint, compiler.compile([*entrypoint]));
        }

        for (route_id, route) in &new.http.routes {
            let Some(tls) = &route.tls else { continue };
            match SingleCertResolver::from_pem_files(&tls.cert, &tls.key) {
                Ok(resolver) => {
                    let resolver = Arc::new(resolver);
                    for entrypoint in &route.entrypoints {
                        self.server
                            .register_tls_config_handler(entrypoint.clone(), resolver.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(route = %route_id, error = %e, "failed to load TLS material");
                }
            }
        }
    }
}
