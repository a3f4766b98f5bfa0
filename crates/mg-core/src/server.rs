//! Server: entrypoint lifecycle and connection dispatch.
//!
//! One control loop owns the listener table; registration flows through two
//! bounded command channels, so the table needs no locking. Each entrypoint
//! gets an accept task under a child cancellation token; each accepted
//! socket gets its own task.
//!
//! Dispatch per connection: filter, wrap in a peekable stream, sniff the
//! first byte. `0x16` is TLS: the TCP runtime gets first claim on the raw
//! stream (SNI pass-through), otherwise a TLS config resolver must be
//! registered and the handshake is terminated locally for the HTTP runtime.
//! Anything else is raw: HTTP by verb prefix, then the TCP runtime's rules,
//! then close.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mg_tls::{ClientHelloInfo, TlsConfigResolver, TlsError};
use parking_lot::RwLock;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::conn::{PeekableStream, SharedConn};
use crate::entrypoint::{EntryPoint, Transport};
use crate::error::{Error, Result};
use crate::filter::ConnFilter;
use crate::http::{HttpRuntime, SharedHandler};
use crate::sniff;
use crate::tcp::{TcpContext, TcpHandler, TcpRuntime};

/// Capacity of the add/remove command channels. Registration blocks when
/// the control loop stalls with this many commands queued.
const COMMAND_BUFFER: usize = 100;

/// Delay before retrying a failed accept, so a persistent error does not
/// busy-loop the accept task.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

struct Shared {
    http: HttpRuntime,
    tcp: TcpRuntime,
    tls: RwLock<HashMap<String, Arc<dyn TlsConfigResolver>>>,
    filter: RwLock<Option<Arc<dyn ConnFilter>>>,
}

struct ActiveEntryPoint {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// The connection dispatcher.
pub struct Server {
    shared: Arc<Shared>,
    add_tx: mpsc::Sender<EntryPoint>,
    remove_tx: mpsc::Sender<String>,
    commands: Mutex<Option<(mpsc::Receiver<EntryPoint>, mpsc::Receiver<String>)>>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    pub fn new() -> Self {
        let (add_tx, add_rx) = mpsc::channel(COMMAND_BUFFER);
        let (remove_tx, remove_rx) = mpsc::channel(COMMAND_BUFFER);
        Self {
            shared: Arc::new(Shared {
                http: HttpRuntime::new(),
                tcp: TcpRuntime::new(),
                tls: RwLock::new(HashMap::new()),
                filter: RwLock::new(None),
            }),
            add_tx,
            remove_tx,
            commands: Mutex::new(Some((add_rx, remove_rx))),
        }
    }

    /// Enqueue an entrypoint start. Starting binds the address and launches
    /// the accept loop; a bind failure leaves the id unregistered, and
    /// re-registering an already-bound id is a no-op.
    pub async fn register_entry_point(&self, entrypoint: EntryPoint) {
        let _ = self.add_tx.send(entrypoint).await;
    }

    /// Enqueue an entrypoint stop: the listener closes and its accept loop
    /// exits. No ordering is guaranteed against a concurrently enqueued
    /// registration.
    pub async fn deregister_entry_point(&self, id: impl Into<String>) {
        let _ = self.remove_tx.send(id.into()).await;
    }

    pub fn register_http_handler(&self, entrypoint: impl Into<String>, handler: SharedHandler) {
        self.shared.http.register_handler(entrypoint, handler);
    }

    pub fn deregister_http_handler(&self, entrypoint: &str) {
        self.shared.http.deregister_handler(entrypoint);
    }

    pub fn register_tcp_handler(
        &self,
        entrypoint: impl Into<String>,
        handler: Arc<dyn TcpHandler>,
    ) {
        self.shared.tcp.register_handler(entrypoint, handler);
    }

    pub fn deregister_tcp_handler(&self, entrypoint: &str) {
        self.shared.tcp.deregister_handler(entrypoint);
    }

    pub fn register_tls_config_handler(
        &self,
        entrypoint: impl Into<String>,
        resolver: Arc<dyn TlsConfigResolver>,
    ) {
        self.shared.tls.write().insert(entrypoint.into(), resolver);
    }

    pub fn deregister_tls_config_handler(&self, entrypoint: &str) {
        self.shared.tls.write().remove(entrypoint);
    }

    pub fn set_filter(&self, filter: Arc<dyn ConnFilter>) {
        *self.shared.filter.write() = Some(filter);
    }

    /// Run the control loop until `cancel` fires. Consumes the command
    /// channels; `serve` can only run once per server.
    pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
        let Some((mut add_rx, mut remove_rx)) = self.commands.lock().await.take() else {
            tracing::warn!("server is already serving");
            return Ok(());
        };

        let mut active: HashMap<String, ActiveEntryPoint> = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(entrypoint) = add_rx.recv() => {
                    self.start_entry_point(&mut active, &cancel, entrypoint).await;
                }
                Some(id) = remove_rx.recv() => {
                    stop_entry_point(&mut active, &id);
                }
            }
        }

        for (id, entry) in active.drain() {
            tracing::debug!(entrypoint = %id, "stopping entrypoint on shutdown");
            entry.cancel.cancel();
            entry.task.abort();
        }
        Ok(())
    }

    async fn start_entry_point(
        &self,
        active: &mut HashMap<String, ActiveEntryPoint>,
        parent: &CancellationToken,
        entrypoint: EntryPoint,
    ) {
        if active.contains_key(&entrypoint.id) {
            return;
        }
        if entrypoint.transport != Transport::Tcp {
            tracing::warn!(
                entrypoint = %entrypoint.id,
                error = %Error::UnsupportedTransport(entrypoint.transport),
                "entrypoint not started"
            );
            return;
        }

        let listener = match TcpListener::bind(entrypoint.addr).await {
            Ok(l) => l,
            Err(e) => {
                let err = Error::Bind {
                    entrypoint: entrypoint.id.clone(),
                    source: e,
                };
                tracing::warn!(error = %err, "entrypoint not started");
                return;
            }
        };

        let cancel = parent.child_token();
        let shared = self.shared.clone();
        let id = entrypoint.id.clone();
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            accept_loop(shared, id, listener, loop_cancel).await;
        });

        active.insert(entrypoint.id, ActiveEntryPoint { cancel, task });
    }
}

fn stop_entry_point(active: &mut HashMap<String, ActiveEntryPoint>, id: &str) {
    if let Some(entry) = active.remove(id) {
        tracing::info!(entrypoint = %id, "stopping entrypoint");
        entry.cancel.cancel();
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    entrypoint: String,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    match listener.local_addr() {
        Ok(addr) => {
            tracing::info!(entrypoint = %entrypoint, addr = %addr, "entrypoint listening")
        }
        Err(_) => tracing::info!(entrypoint = %entrypoint, "entrypoint listening"),
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(entrypoint = %entrypoint, "accept loop exiting");
                return;
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, _peer)) => {
                        let shared = shared.clone();
                        let entrypoint = entrypoint.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            handle_connection(shared, entrypoint, socket, cancel).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(entrypoint = %entrypoint, error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }
    }
}

/// What the sniffing phase decided to do with a connection.
enum Classified {
    /// Verb-prefix match; serve cleartext HTTP.
    Http(PeekableStream<TcpStream>),
    /// The TCP runtime claimed the stream (TLS pass-through included).
    Tcp(PeekableStream<TcpStream>),
    /// TLS stream to terminate locally, then serve HTTP.
    TlsTerminate {
        stream: PeekableStream<TcpStream>,
        hello: ClientHelloInfo,
    },
}

async fn handle_connection(
    shared: Arc<Shared>,
    entrypoint: String,
    socket: TcpStream,
    cancel: CancellationToken,
) {
    let peer = match socket.peer_addr() {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(error = %e, "accepted socket has no peer address");
            return;
        }
    };

    if let Some(filter) = shared.filter.read().clone() {
        if !filter.keep_connection(&socket) {
            tracing::debug!(peer = %peer, "connection dropped by filter");
            return;
        }
    }

    tracing::debug!(peer = %peer, entrypoint = %entrypoint, "connection received");

    let stream = PeekableStream::new(socket);

    // Classification peeks and may block on the client; it races the
    // entrypoint's cancellation so a stopped entrypoint does not leave
    // half-sniffed connections behind. Streams already handed to a runtime
    // finish on their own terms.
    let classified = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(peer = %peer, "connection cancelled during classification");
            return;
        }
        classified = classify(&shared, &entrypoint, stream) => classified,
    };

    let result = match classified {
        Ok(Classified::Http(stream)) => {
            tracing::debug!(peer = %peer, "handling connection as HTTP");
            shared
                .http
                .handle_connection(&entrypoint, stream, peer, false)
                .await
        }
        Ok(Classified::Tcp(stream)) => {
            shared.tcp.handle(&entrypoint, stream, cancel.clone()).await
        }
        Ok(Classified::TlsTerminate { stream, hello }) => {
            terminate_tls(&shared, &entrypoint, stream, peer, hello).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {}
        Err(Error::Cancelled) => {
            tracing::debug!(peer = %peer, "connection cancelled");
        }
        Err(e) => {
            tracing::warn!(peer = %peer, entrypoint = %entrypoint, error = %e, "connection closed");
        }
    }
}

async fn classify(
    shared: &Arc<Shared>,
    entrypoint: &str,
    mut stream: PeekableStream<TcpStream>,
) -> Result<Classified> {
    let first = stream.peek(1).await.map_err(Error::Peek)?;
    if first.bytes.is_empty() {
        return Err(Error::Peek(std::io::ErrorKind::UnexpectedEof.into()));
    }

    if sniff::is_tls_client_hello(first.bytes[0]) {
        return classify_tls(shared, entrypoint, stream).await;
    }

    // Raw path: HTTP by verb prefix first, then the TCP runtime's rules.
    if shared.http.claim(entrypoint, &mut stream).await {
        return Ok(Classified::Http(stream));
    }

    let seat = SharedConn::new(stream);
    let ctx = TcpContext::capture(&seat).await?;
    if shared.tcp.claim(entrypoint, &ctx).await {
        let stream = reclaim(&seat).await?;
        return Ok(Classified::Tcp(stream));
    }

    tracing::debug!(entrypoint = %entrypoint, "no runtime claimed the connection");
    Err(Error::NoHandler(entrypoint.to_string()))
}

async fn classify_tls(
    shared: &Arc<Shared>,
    entrypoint: &str,
    stream: PeekableStream<TcpStream>,
) -> Result<Classified> {
    let peer = stream.peer_addr().map_err(Error::Peek)?;
    tracing::debug!(peer = %peer, "handling connection as TLS");

    let seat = SharedConn::new(stream);
    let ctx = TcpContext::capture(&seat).await?;

    // The TCP runtime gets first claim on the raw TLS stream; matching an
    // SNI rule means pass-through, no local decryption.
    if shared.tcp.claim(entrypoint, &ctx).await {
        tracing::debug!(peer = %peer, sni = %ctx.sni(), "TCP runtime claimed TLS stream");
        let stream = reclaim(&seat).await?;
        return Ok(Classified::Tcp(stream));
    }

    if !shared.tls.read().contains_key(entrypoint) {
        return Err(Error::NoTlsConfig(entrypoint.to_string()));
    }

    let hello = ctx
        .client_hello()
        .cloned()
        .ok_or(Error::TlsHandshake(TlsError::Truncated))?;
    let stream = reclaim(&seat).await?;
    Ok(Classified::TlsTerminate { stream, hello })
}

async fn reclaim(seat: &SharedConn) -> Result<PeekableStream<TcpStream>> {
    seat.take()
        .await
        .ok_or_else(|| Error::Peek(std::io::ErrorKind::NotConnected.into()))
}

async fn terminate_tls(
    shared: &Arc<Shared>,
    entrypoint: &str,
    stream: PeekableStream<TcpStream>,
    peer: std::net::SocketAddr,
    hello: ClientHelloInfo,
) -> Result<()> {
    let resolver = shared
        .tls
        .read()
        .get(entrypoint)
        .cloned()
        .ok_or_else(|| Error::NoTlsConfig(entrypoint.to_string()))?;

    let config = resolver.resolve(&hello).map_err(Error::TlsHandshake)?;

    // The peek buffer still holds the ClientHello, so the real handshake
    // replays it from the buffered stream.
    let acceptor = TlsAcceptor::from(config);
    let tls_stream = acceptor
        .accept(stream)
        .await
        .map_err(|e| Error::TlsHandshake(TlsError::Io(e)))?;

    tracing::debug!(peer = %peer, "TLS handshake complete, serving HTTP");
    shared
        .http
        .handle_connection(entrypoint, tls_stream, peer, true)
        .await
}
