//! Shared helpers for dispatcher integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mg_core::{EntryPoint, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Grab an ephemeral port. Racy by nature, fine for tests.
pub async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);
    port
}

/// Spawn a serving server and return it with its root cancellation token.
pub fn spawn_server() -> (Arc<Server>, CancellationToken) {
    let server = Arc::new(Server::new());
    let cancel = CancellationToken::new();
    {
        let server = server.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = server.serve(cancel).await;
        });
    }
    (server, cancel)
}

/// Register a TCP entrypoint on localhost and wait for it to accept.
pub async fn start_entrypoint(server: &Server, id: &str, port: u16) -> SocketAddr {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("addr");
    server.register_entry_point(EntryPoint::tcp(id, addr)).await;
    // The control loop starts the listener asynchronously; wait for it.
    let _ = connect(port).await;
    addr
}

/// Connect with retries while the listener comes up.
pub async fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("listener on port {port} never came up");
}

/// Send a minimal HTTP/1.1 request and return the raw response text.
pub async fn http_request(stream: &mut TcpStream, method: &str, path: &str, host: &str) -> String {
    let request = format!("{method} {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.expect("read");
    String::from_utf8_lossy(&out).into_owned()
}
