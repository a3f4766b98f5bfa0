//! HTTP side of the dispatcher: runtime, router/compiler, middlewares and
//! built-in services.

mod handler;
mod middleware;
mod middlewares;
mod router;
mod runtime;
mod services;

pub use handler::{handler_fn, request_host, request_uri, ConnInfo, HandlerFn, HttpHandler, SharedHandler};
pub use middleware::{Chain, Middleware};
pub use middlewares::{Logging, RequireSecure, SetForwardingHeaders, StripPrefix};
pub use router::{HttpHandlerCompiler, HttpRoute, HttpRouter};
pub use runtime::HttpRuntime;
pub use services::{
    file_server, http_load_balancer, http_reverse_proxy, path_redirect, redirect,
    upgrade_to_secure,
};
