//! Entrypoints: named bind points accepting client connections.

use std::fmt;
use std::net::SocketAddr;

/// Transport tag of an entrypoint. Only TCP is dispatchable; the remaining
/// tags are reserved and rejected with `Error::UnsupportedTransport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
    Unix,
    Unsupported,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
            Transport::Unix => "unix",
            Transport::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// A named bind point. Owns exactly one active listener while registered.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub id: String,
    pub addr: SocketAddr,
    pub transport: Transport,
}

impl EntryPoint {
    /// TCP entrypoint, the only transport the dispatcher serves.
    pub fn tcp(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            transport: Transport::Tcp,
        }
    }
}
