//! muxgate core: a programmable reverse proxy that multiplexes cleartext
//! HTTP, TLS-wrapped HTTP and raw TCP on single listeners.
//!
//! A [`Server`] accepts connections on registered entrypoints, classifies
//! each one by peeking its first bytes, and routes it through rule-driven
//! routers to user-configured services. See the `http` and `tcp` modules
//! for the per-protocol runtimes, routers and built-in services.

pub mod conn;
pub mod entrypoint;
pub mod error;
pub mod filter;
pub mod http;
pub mod minecraft;
pub mod rule;
pub mod server;
pub mod sniff;
pub mod tcp;

pub use conn::{PeekableStream, SharedConn, TcpConn};
pub use entrypoint::{EntryPoint, Transport};
pub use error::{Error, Result};
pub use filter::{ConnFilter, ConnFilterFn};
pub use rule::Rule;
pub use server::Server;
