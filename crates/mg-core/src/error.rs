//! Unified error model for the dispatcher.
//!
//! Everything except [`Error::Bind`] is connection-scoped: the server logs
//! it, closes the socket and keeps accepting. `Bind` leaves the entrypoint
//! unregistered. `Cancelled` makes the containing accept loop or handler
//! exit quietly.

use std::io;

use thiserror::Error;

use crate::entrypoint::Transport;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The entrypoint listener could not bind.
    #[error("failed to bind entrypoint {entrypoint}: {source}")]
    Bind {
        entrypoint: String,
        #[source]
        source: io::Error,
    },

    /// Short read or closed stream before the connection was classified.
    #[error("peek failed before classification: {0}")]
    Peek(#[source] io::Error),

    /// A TLS stream arrived on an entrypoint with no config resolver.
    #[error("no TLS config resolver registered for entrypoint {0:?}")]
    NoTlsConfig(String),

    /// ClientHello capture, config resolution or the handshake itself failed.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(#[source] mg_tls::TlsError),

    /// The runtime has no handler for the entrypoint.
    #[error("no handler registered for entrypoint {0:?}")]
    NoHandler(String),

    /// The transport tag is reserved but not dispatchable.
    #[error("unsupported transport protocol {0}")]
    UnsupportedTransport(Transport),

    /// A layer-7 sniffer hit a malformed frame (VarInt oversize, frame cap).
    #[error("bad wire format: {0}")]
    BadWireFormat(String),

    /// Dialing an upstream failed.
    #[error("upstream dial failed: {0}")]
    Upstream(#[source] io::Error),

    /// The ambient context was cancelled.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn bad_wire(what: impl Into<String>) -> Self {
        Error::BadWireFormat(what.into())
    }
}
