//! TCP side of the dispatcher: dispatch context, runtime, router/compiler
//! and built-in services.

mod context;
mod router;
mod runtime;
mod services;

pub use context::{ConnProtocol, TcpContext};
pub use router::{TcpHandlerCompiler, TcpRoute, TcpRouter};
pub use runtime::{TcpHandler, TcpRuntime};
pub use services::{
    tcp_load_balancer, tcp_reverse_proxy, tcp_service_fn, SharedTcpService, TcpService,
    TcpServiceFn,
};
