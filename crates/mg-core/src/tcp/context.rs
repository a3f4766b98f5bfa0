//! Per-connection TCP dispatch context.

use std::io;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use mg_tls::ClientHelloInfo;

use crate::conn::SharedConn;
use crate::error::Error;
use crate::sniff;

/// Protocol tag of a dispatched stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnProtocol {
    Tcp,
    Tls,
}

impl ConnProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnProtocol::Tcp => "TCP",
            ConnProtocol::Tls => "TLS",
        }
    }
}

/// Snapshot derived from a buffered connection at dispatch time.
///
/// Built once per routing decision and immutable afterwards, except that
/// [`TcpContext::peek`] may pull more bytes into the connection's peek
/// buffer (non-consuming, so rule evaluation never eats the stream).
#[derive(Clone)]
pub struct TcpContext {
    sni: String,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    remote_ip: IpAddr,
    claimed_port: u16,
    protocol: ConnProtocol,
    hello: Option<ClientHelloInfo>,
    conn: SharedConn,
}

impl TcpContext {
    /// Inspect the seated connection and capture the routing snapshot.
    ///
    /// A leading TLS handshake record is parsed for its ClientHello; on any
    /// parse failure the context simply stays tagged `TCP` with an empty
    /// SNI, which makes SNI rules fall through.
    pub async fn capture(conn: &SharedConn) -> Result<Self, Error> {
        let (local_addr, peer_addr) = conn.addrs().await.map_err(Error::Peek)?;

        let mut ctx = Self {
            sni: String::new(),
            local_addr,
            peer_addr,
            remote_ip: peer_addr.ip(),
            claimed_port: local_addr.port(),
            protocol: ConnProtocol::Tcp,
            hello: None,
            conn: conn.clone(),
        };

        let first = conn.peek(1).await.map_err(Error::Peek)?;
        if first.first() == Some(&sniff::TLS_HANDSHAKE_BYTE) {
            if let Ok(record) = peek_tls_record(conn).await {
                if let Ok(hello) = mg_tls::capture_client_hello(&record) {
                    ctx.sni = hello.server_name.clone().unwrap_or_default();
                    ctx.protocol = ConnProtocol::Tls;
                    ctx.hello = Some(hello);
                }
            }
        }

        Ok(ctx)
    }

    /// SNI from the ClientHello; empty unless the stream is TLS.
    pub fn sni(&self) -> &str {
        &self.sni
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    /// Local port the client dialed.
    pub fn claimed_port(&self) -> u16 {
        self.claimed_port
    }

    pub fn protocol(&self) -> ConnProtocol {
        self.protocol
    }

    /// Captured ClientHello, when the stream is TLS.
    pub fn client_hello(&self) -> Option<&ClientHelloInfo> {
        self.hello.as_ref()
    }

    /// Re-inspect the stream without consuming it. A shorter buffer than
    /// requested means the stream ended early.
    pub async fn peek(&self, n: usize) -> io::Result<Bytes> {
        self.conn.peek(n).await
    }
}

/// Peek the whole first TLS record (header plus payload) off the seat.
async fn peek_tls_record(conn: &SharedConn) -> Result<Bytes, Error> {
    let header = conn
        .peek(sniff::TLS_RECORD_HEADER_LEN)
        .await
        .map_err(Error::Peek)?;
    let total = sniff::tls_record_len(&header)
        .ok_or_else(|| Error::TlsHandshake(mg_tls::TlsError::Truncated))?;
    let record = conn.peek(total).await.map_err(Error::Peek)?;
    if record.len() < total {
        return Err(Error::TlsHandshake(mg_tls::TlsError::Truncated));
    }
    Ok(record)
}
