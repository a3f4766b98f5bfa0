//! HTTP runtime: per-entrypoint handlers, one hyper connection per
//! delegated stream.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::server::conn::Http;
use hyper::service::service_fn;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::handler::{ConnInfo, SharedHandler};
use crate::conn::PeekableStream;
use crate::error::{Error, Result};
use crate::sniff;

/// Maintains the entrypoint-id → request handler table and serves delegated
/// connections as HTTP/1.x (with HTTP/2 fallback when the transport
/// negotiated it).
#[derive(Default)]
pub struct HttpRuntime {
    handlers: RwLock<HashMap<String, SharedHandler>>,
}

impl HttpRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, entrypoint: impl Into<String>, handler: SharedHandler) {
        self.handlers.write().insert(entrypoint.into(), handler);
    }

    pub fn deregister_handler(&self, entrypoint: &str) {
        self.handlers.write().remove(entrypoint);
    }

    pub fn is_handler_registered(&self, entrypoint: &str) -> bool {
        self.handlers.read().contains_key(entrypoint)
    }

    /// Claim a raw stream by HTTP verb prefix. Only entrypoints with a
    /// registered handler claim anything.
    pub async fn claim(
        &self,
        entrypoint: &str,
        stream: &mut PeekableStream<TcpStream>,
    ) -> bool {
        if !self.is_handler_registered(entrypoint) {
            return false;
        }
        match stream.peek(5).await {
            Ok(peeked) => sniff::looks_like_http(peeked.bytes),
            Err(_) => false,
        }
    }

    /// Serve exactly one connection. `tls` records whether the stream was
    /// terminated locally, so middlewares can tell the two apart.
    pub async fn handle_connection<S>(
        &self,
        entrypoint: &str,
        io: S,
        peer: SocketAddr,
        tls: bool,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let handler = self
            .handlers
            .read()
            .get(entrypoint)
            .cloned()
            .ok_or_else(|| Error::NoHandler(entrypoint.to_string()))?;

        let info = ConnInfo { peer, tls };
        let service = service_fn(move |mut req| {
            let handler = handler.clone();
            req.extensions_mut().insert(info);
            async move { Ok::<_, Infallible>(handler.serve(req).await) }
        });

        // A finished connection (client closed, keep-alive expired) is the
        // normal end of life here, never an error worth surfacing.
        if let Err(e) = Http::new()
            .serve_connection(io, service)
            .with_upgrades()
            .await
        {
            tracing::debug!(peer = %peer, error = %e, "HTTP connection ended with error");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use hyper::{Body, Response};
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn peer() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[tokio::test]
    async fn serves_one_connection_and_attaches_conn_info() {
        let runtime = HttpRuntime::new();
        runtime.register_handler(
            "web",
            handler_fn(|req| async move {
                let info = ConnInfo::of(&req).expect("conn info");
                Response::new(Body::from(format!("tls={}", info.tls)))
            }),
        );

        let (mut client, server) = duplex(4096);
        let serve = tokio::spawn(async move {
            let runtime = runtime;
            runtime
                .handle_connection("web", server, peer(), true)
                .await
        });

        client
            .write_all(b"GET / HTTP/1.1\r\nHost: h\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("HTTP/1.1 200"));
        assert!(text.contains("tls=true"));

        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missing_handler_is_an_error() {
        let runtime = HttpRuntime::new();
        let (_client, server) = duplex(64);
        let err = runtime
            .handle_connection("ghost", server, peer(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoHandler(_)));
    }

    #[tokio::test]
    async fn clean_client_close_is_not_an_error() {
        let runtime = HttpRuntime::new();
        runtime.register_handler(
            "web",
            handler_fn(|_req| async { Response::new(Body::empty()) }),
        );
        let (client, server) = duplex(64);
        drop(client);
        runtime
            .handle_connection("web", server, peer(), false)
            .await
            .unwrap();
    }
}
