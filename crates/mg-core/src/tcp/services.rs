//! Built-in TCP services.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::net::TcpStream;

use crate::conn::TcpConn;

/// Terminal handler for a routed TCP connection. The service owns the
/// connection; dropping it closes the stream.
#[async_trait]
pub trait TcpService: Send + Sync {
    async fn serve(&self, conn: TcpConn);
}

/// Shared service reference stored in compilers.
pub type SharedTcpService = Arc<dyn TcpService>;

/// Adapter turning an async closure into a [`TcpService`].
pub struct TcpServiceFn<F>(pub F);

#[async_trait]
impl<F, Fut> TcpService for TcpServiceFn<F>
where
    F: Fn(TcpConn) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn serve(&self, conn: TcpConn) {
        (self.0)(conn).await
    }
}

/// Convenience constructor for closure services.
pub fn tcp_service_fn<F, Fut>(f: F) -> SharedTcpService
where
    F: Fn(TcpConn) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(TcpServiceFn(f))
}

struct TcpReverseProxy {
    address: String,
}

#[async_trait]
impl TcpService for TcpReverseProxy {
    async fn serve(&self, conn: TcpConn) {
        let peer = conn.peer_addr();
        let upstream = match TcpStream::connect(&self.address).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    upstream = %self.address,
                    error = %e,
                    "TCP reverse proxy failed to dial upstream"
                );
                return;
            }
        };

        // Two concurrent copies; the session ends as soon as either
        // direction finishes, closing both sockets.
        let (mut client_read, mut client_write) = tokio::io::split(conn);
        let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);
        tokio::select! {
            r = tokio::io::copy(&mut client_read, &mut upstream_write) => {
                if let Err(e) = r {
                    tracing::debug!(peer = %peer, error = %e, "client to upstream copy ended");
                }
            }
            r = tokio::io::copy(&mut upstream_read, &mut client_write) => {
                if let Err(e) = r {
                    tracing::debug!(peer = %peer, error = %e, "upstream to client copy ended");
                }
            }
        }
    }
}

/// Dial `address` and copy bytes in both directions until either side
/// closes. Peeked-but-unconsumed bytes (a sniffed Minecraft handshake, a
/// raw TLS ClientHello) are forwarded verbatim.
pub fn tcp_reverse_proxy(address: impl Into<String>) -> SharedTcpService {
    Arc::new(TcpReverseProxy {
        address: address.into(),
    })
}

struct TcpLoadBalancer {
    targets: Vec<SharedTcpService>,
}

#[async_trait]
impl TcpService for TcpLoadBalancer {
    async fn serve(&self, conn: TcpConn) {
        if self.targets.is_empty() {
            tracing::warn!("TCP load balancer has no targets, dropping connection");
            return;
        }
        let idx = rand::thread_rng().gen_range(0..self.targets.len());
        self.targets[idx].serve(conn).await;
    }
}

/// Uniform-random choice among TCP services, per connection.
pub fn tcp_load_balancer(targets: Vec<SharedTcpService>) -> SharedTcpService {
    Arc::new(TcpLoadBalancer { targets })
}
